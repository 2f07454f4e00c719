// Endpoint identity and handshake target construction.
use url::Url;

use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    host: String,
    port: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn describe(&self) -> String {
        format!("{}:{}", self.authority_host(), self.port)
    }

    pub fn port_number(&self) -> Result<u16, Error> {
        self.port.trim().parse::<u16>().map_err(|err| {
            Error::new(ErrorKind::Resolution)
                .with_message(format!("invalid port {:?}", self.port))
                .with_endpoint(self.describe())
                .with_source(err)
        })
    }

    /// Builds `ws://host:port<request>`; `request` carries the target path and query.
    pub fn handshake_url(&self, request: &str) -> Result<Url, Error> {
        let base = Url::parse(&format!("ws://{}/", self.describe())).map_err(|err| {
            Error::new(ErrorKind::Handshake)
                .with_message("endpoint does not form a valid websocket url")
                .with_endpoint(self.describe())
                .with_source(err)
        })?;
        let target = if request.starts_with('/') {
            request.to_string()
        } else {
            format!("/{request}")
        };
        base.join(&target).map_err(|err| {
            Error::new(ErrorKind::Handshake)
                .with_message(format!("invalid handshake target {request:?}"))
                .with_endpoint(self.describe())
                .with_source(err)
        })
    }

    fn authority_host(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        }
    }
}
