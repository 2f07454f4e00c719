//! Purpose: Implement `aristream watch`: connect, receive, and print events.
//! Exports: `WatchConfig`, `watch`.
//! Role: Thin wiring over `StreamConnection` and the `json` accessor.
//! Invariants: Callbacks only forward into a channel; all printing happens in the drive loop.
//! Invariants: The connection is closed (and its close frame flushed) before returning.
//! Notes: Payloads that fail to parse or lack `--field` become notices, not errors.

use std::io::{self, Write};
use std::time::Duration;

use serde_json::Map;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{info, warn};

use aristream::api::{Error, ErrorKind, Reactor, StreamConnection};
use aristream::json;

use crate::notice::{Notice, emit_notice};

const CLOSE_GRACE: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct WatchConfig {
    pub host: String,
    pub port: String,
    pub target: String,
    pub max_messages: Option<u64>,
    pub field: Option<Vec<String>>,
    pub use_color: bool,
}

enum WatchEvent {
    Connected(Result<(), Error>),
    Message(Result<String, Error>),
}

/// Runs until the stream ends, `max_messages` events are printed, or Ctrl-C.
/// Returns the number of events printed.
pub fn watch(config: WatchConfig) -> Result<u64, Error> {
    let reactor = Reactor::new()?;
    let mut conn = StreamConnection::new(reactor.handle(), &config.host, &config.port);
    let (tx, mut rx) = unbounded_channel();

    let connected = tx.clone();
    conn.connect(config.target.clone(), move |result| {
        let _ = connected.send(WatchEvent::Connected(result));
    })?;

    let result = reactor.block_on(drive(&mut conn, &config, &tx, &mut rx));
    conn.close();
    // Sleep must be created inside the runtime, so build it in the async block.
    reactor.block_on(async { tokio::time::sleep(CLOSE_GRACE).await });
    result
}

async fn drive(
    conn: &mut StreamConnection,
    config: &WatchConfig,
    tx: &UnboundedSender<WatchEvent>,
    rx: &mut UnboundedReceiver<WatchEvent>,
) -> Result<u64, Error> {
    let endpoint = conn.endpoint().describe();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut printed = 0u64;

    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = &mut interrupt => {
                info!(endpoint = %endpoint, "interrupted");
                return Ok(printed);
            }
        };
        let Some(event) = event else {
            return Ok(printed);
        };

        match event {
            WatchEvent::Connected(Ok(())) => {
                info!(endpoint = %endpoint, target = %config.target, "connected");
                let messages = tx.clone();
                conn.receive(move |result| {
                    let _ = messages.send(WatchEvent::Message(result));
                })?;
            }
            WatchEvent::Connected(Err(err)) => return Err(err),
            WatchEvent::Message(Ok(payload)) => {
                if print_event(&payload, config, &endpoint)? {
                    printed += 1;
                }
                if config.max_messages.is_some_and(|max| printed >= max) {
                    return Ok(printed);
                }
            }
            WatchEvent::Message(Err(err)) if err.kind().is_terminal_read() => {
                info!(endpoint = %endpoint, reason = %err, "stream finished");
                return Ok(printed);
            }
            WatchEvent::Message(Err(err)) => {
                warn!(endpoint = %endpoint, error = %err, "skipping unreadable message");
            }
        }
    }
}

/// Prints one event; returns false when it was skipped with a notice.
fn print_event(payload: &str, config: &WatchConfig, endpoint: &str) -> Result<bool, Error> {
    let tree = match json::parse(payload) {
        Ok(tree) => tree,
        Err(err) => {
            skip_notice(&err, endpoint, config.use_color);
            return Ok(false);
        }
    };
    let node = match &config.field {
        Some(path) => match json::lookup(&tree, path) {
            Ok(node) => node,
            Err(err) => {
                skip_notice(&err, endpoint, config.use_color);
                return Ok(false);
            }
        },
        None => &tree,
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", json::render(node, config.use_color))
        .and_then(|()| stdout.flush())
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write event")
                .with_source(err)
        })?;
    Ok(true)
}

fn skip_notice(err: &Error, endpoint: &str, use_color: bool) {
    let mut details = Map::new();
    details.insert("kind".to_string(), format!("{:?}", err.kind()).into());
    if let Some(path) = err.path() {
        details.insert("path".to_string(), path.into());
    }
    if let Some(hint) = err.hint() {
        details.insert("hint".to_string(), hint.into());
    }
    emit_notice(
        &Notice {
            kind: "skipped-event".to_string(),
            endpoint: endpoint.to_string(),
            message: err.message().unwrap_or("event skipped").to_string(),
            details,
        },
        use_color,
    );
}
