//! Purpose: Build handshake targets for Asterisk ARI event streams.
//! Exports: `EventsRequest`.
//! Role: Small value builder consumed by callers of `StreamConnection::connect`.
//! Invariants: Query values are form-encoded; parameter order is stable.

use url::form_urlencoded;

pub const EVENTS_PATH: &str = "/ari/events";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventsRequest {
    app: String,
    credentials: Option<(String, String)>,
    subscribe_all: bool,
}

impl EventsRequest {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            credentials: None,
            subscribe_all: false,
        }
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    pub fn subscribe_all(mut self, enabled: bool) -> Self {
        self.subscribe_all = enabled;
        self
    }

    pub fn target(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        if let Some((user, password)) = &self.credentials {
            query.append_pair("api_key", &format!("{user}:{password}"));
        }
        query.append_pair("app", &self.app);
        if self.subscribe_all {
            query.append_pair("subscribeAll", "true");
        }
        format!("{EVENTS_PATH}?{}", query.finish())
    }
}
