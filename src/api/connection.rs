//! Purpose: Persistent WebSocket client bound to one endpoint and one reactor.
//! Exports: `StreamConnection`, `ConnectionState`, `ConnectHandler`, `ReceiveHandler`.
//! Role: Drives resolve -> connect -> handshake -> receive and reports through callbacks.
//! Invariants: At most one connect sequence and one read are in flight per instance.
//! Invariants: `on_connect` fires exactly once per accepted `connect`.
//! Invariants: Every dispatch checks the session generation; `close` bumps it, so nothing
//! fires after `close` returns.
//! Notes: The read loop re-arms after ordinary read errors; only stream end and cancel stop it.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, lookup_host};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};

use crate::core::endpoint::Endpoint;
use crate::core::error::{Error, ErrorKind};
use crate::core::frame::{ReadOutcome, classify};
use crate::core::reactor::ReactorHandle;

type WsStream = WebSocketStream<TcpStream>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

pub type ConnectHandler = Box<dyn FnMut(Result<(), Error>)>;
pub type ReceiveHandler = Box<dyn FnMut(Result<String, Error>)>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Idle,
    Resolving,
    TcpConnecting,
    Handshaking,
    Open,
    Closed,
}

impl ConnectionState {
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ConnectionState::Resolving
                | ConnectionState::TcpConnecting
                | ConnectionState::Handshaking
        )
    }
}

/// A single-endpoint WebSocket client whose completions run on a [`Reactor`].
///
/// The instance is neither `Clone` nor `Send`: it owns its transport and is tied
/// to the reactor thread. Dropping it closes the connection.
///
/// [`Reactor`]: crate::api::Reactor
pub struct StreamConnection {
    reactor: ReactorHandle,
    endpoint: Endpoint,
    session: Rc<RefCell<Session>>,
}

struct Session {
    state: ConnectionState,
    generation: u64,
    request: String,
    on_connect: Option<ConnectHandler>,
    on_message: Option<ReceiveHandler>,
    connect_task: Option<JoinHandle<()>>,
    read_task: Option<JoinHandle<()>>,
    read_pending: bool,
    reader: Option<WsReader>,
    writer: Option<WsWriter>,
}

impl StreamConnection {
    pub fn new(reactor: ReactorHandle, host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            reactor,
            endpoint: Endpoint::new(host, port),
            session: Rc::new(RefCell::new(Session {
                state: ConnectionState::Idle,
                generation: 0,
                request: String::new(),
                on_connect: None,
                on_message: None,
                connect_task: None,
                read_task: None,
                read_pending: false,
                reader: None,
                writer: None,
            })),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.session.borrow().state
    }

    /// Starts resolve, connect, and handshake with `request` as the upgrade target.
    ///
    /// Accepted only from `Idle` or `Closed`. An accepted call invokes `on_connect`
    /// exactly once, on the reactor, with the outcome of the whole sequence.
    pub fn connect<F>(&mut self, request: impl Into<String>, on_connect: F) -> Result<(), Error>
    where
        F: FnMut(Result<(), Error>) + 'static,
    {
        let generation = {
            let mut session = self.session.borrow_mut();
            if !matches!(
                session.state,
                ConnectionState::Idle | ConnectionState::Closed
            ) {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("connect is not allowed while {:?}", session.state))
                    .with_endpoint(self.endpoint.describe())
                    .with_hint("Call close() before connecting again."));
            }
            session.generation += 1;
            session.request = request.into();
            session.on_connect = Some(Box::new(on_connect));
            session.state = ConnectionState::Resolving;
            session.generation
        };

        debug!(endpoint = %self.endpoint.describe(), "resolving");
        let task = self.reactor.spawn(connect_sequence(
            Rc::clone(&self.session),
            self.endpoint.clone(),
            generation,
        ));
        self.session.borrow_mut().connect_task = Some(task);
        Ok(())
    }

    /// Registers `on_message` and arms the read loop if it is not already running.
    ///
    /// Every completed read is reported; ordinary read errors re-arm the loop,
    /// `StreamEnded` and `Cancelled` end it.
    pub fn receive<F>(&mut self, on_message: F) -> Result<(), Error>
    where
        F: FnMut(Result<String, Error>) + 'static,
    {
        let (reader, generation) = {
            let mut session = self.session.borrow_mut();
            if session.state != ConnectionState::Open {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!("receive is not allowed while {:?}", session.state))
                    .with_endpoint(self.endpoint.describe())
                    .with_hint("Wait for a successful connect before calling receive()."));
            }
            session.on_message = Some(Box::new(on_message));
            if session.read_task.is_some() {
                return Ok(());
            }
            let Some(reader) = session.reader.take() else {
                return Err(Error::new(ErrorKind::Internal)
                    .with_message("open session has no reader")
                    .with_endpoint(self.endpoint.describe()));
            };
            (reader, session.generation)
        };

        let task = self.reactor.spawn(read_loop(
            Rc::clone(&self.session),
            self.endpoint.describe(),
            generation,
            reader,
        ));
        self.session.borrow_mut().read_task = Some(task);
        Ok(())
    }

    /// Tears the connection down. Idempotent and infallible.
    ///
    /// A pending connect or read is aborted and its callback receives
    /// `Cancelled` before this returns; nothing fires afterwards.
    pub fn close(&mut self) {
        let (on_connect, on_message, writer) = {
            let mut session = self.session.borrow_mut();
            if matches!(
                session.state,
                ConnectionState::Idle | ConnectionState::Closed
            ) {
                return;
            }
            let was_connecting = session.state.is_connecting();
            let was_reading = session.read_pending;
            session.generation += 1;
            session.state = ConnectionState::Closed;
            if let Some(task) = session.connect_task.take() {
                task.abort();
            }
            if let Some(task) = session.read_task.take() {
                task.abort();
            }
            let on_connect = session.on_connect.take().filter(|_| was_connecting);
            let on_message = session.on_message.take().filter(|_| was_reading);
            session.read_pending = false;
            session.reader = None;
            (on_connect, on_message, session.writer.take())
        };

        debug!(endpoint = %self.endpoint.describe(), "closing");
        if let Some(writer) = writer {
            self.reactor
                .spawn(send_close(writer, self.endpoint.describe()));
        }
        if let Some(mut on_connect) = on_connect {
            on_connect(Err(cancelled(&self.endpoint, "connect cancelled by close")));
        }
        if let Some(mut on_message) = on_message {
            on_message(Err(cancelled(&self.endpoint, "read cancelled by close")));
        }
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.close();
    }
}

fn cancelled(endpoint: &Endpoint, message: &str) -> Error {
    Error::new(ErrorKind::Cancelled)
        .with_message(message)
        .with_endpoint(endpoint.describe())
}

async fn connect_sequence(session: Rc<RefCell<Session>>, endpoint: Endpoint, generation: u64) {
    let result = establish(&session, &endpoint, generation).await;
    let outcome = {
        let mut guard = session.borrow_mut();
        if guard.generation != generation {
            return;
        }
        guard.connect_task = None;
        match result {
            Ok(stream) => {
                let (writer, reader) = stream.split();
                guard.writer = Some(writer);
                guard.reader = Some(reader);
                guard.state = ConnectionState::Open;
                Ok(())
            }
            Err(err) => {
                guard.state = ConnectionState::Idle;
                Err(err)
            }
        }
    };

    match &outcome {
        Ok(()) => debug!(endpoint = %endpoint.describe(), "connected"),
        Err(err) => debug!(endpoint = %endpoint.describe(), error = %err, "connect failed"),
    }

    let handler = {
        let mut guard = session.borrow_mut();
        if guard.generation != generation {
            return;
        }
        guard.on_connect.take()
    };
    if let Some(mut handler) = handler {
        handler(outcome);
    }
}

async fn establish(
    session: &Rc<RefCell<Session>>,
    endpoint: &Endpoint,
    generation: u64,
) -> Result<WsStream, Error> {
    let port = endpoint.port_number()?;
    let addrs: Vec<SocketAddr> = lookup_host((endpoint.host(), port))
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Resolution)
                .with_message("failed to resolve host")
                .with_endpoint(endpoint.describe())
                .with_source(err)
        })?
        .collect();
    if addrs.is_empty() {
        return Err(Error::new(ErrorKind::Resolution)
            .with_message("host resolved to no addresses")
            .with_endpoint(endpoint.describe()));
    }

    advance(session, endpoint, generation, ConnectionState::TcpConnecting)?;
    let tcp = connect_any(&addrs, endpoint).await?;

    advance(session, endpoint, generation, ConnectionState::Handshaking)?;
    let request = session.borrow().request.clone();
    let url = endpoint.handshake_url(&request)?;
    let (stream, response) = tokio_tungstenite::client_async(url.as_str(), tcp)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Handshake)
                .with_message("websocket handshake failed")
                .with_endpoint(endpoint.describe())
                .with_source(err)
        })?;
    debug!(
        endpoint = %endpoint.describe(),
        status = response.status().as_u16(),
        target = %request,
        "handshake complete"
    );
    Ok(stream)
}

fn advance(
    session: &Rc<RefCell<Session>>,
    endpoint: &Endpoint,
    generation: u64,
    next: ConnectionState,
) -> Result<(), Error> {
    let mut guard = session.borrow_mut();
    if guard.generation != generation {
        return Err(cancelled(endpoint, "connect superseded"));
    }
    debug!(endpoint = %endpoint.describe(), from = ?guard.state, to = ?next, "state transition");
    guard.state = next;
    Ok(())
}

async fn connect_any(addrs: &[SocketAddr], endpoint: &Endpoint) -> Result<TcpStream, Error> {
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(*addr).await {
            Ok(stream) => {
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(%addr, error = %err, "failed to set TCP_NODELAY");
                }
                return Ok(stream);
            }
            Err(err) => {
                debug!(%addr, error = %err, "connect attempt failed");
                last_err = Some(err);
            }
        }
    }
    let mut err = Error::new(ErrorKind::Transport)
        .with_message("failed to connect to any resolved address")
        .with_endpoint(endpoint.describe());
    if let Some(source) = last_err {
        err = err.with_source(source);
    }
    Err(err)
}

async fn read_loop(
    session: Rc<RefCell<Session>>,
    endpoint: String,
    generation: u64,
    mut reader: WsReader,
) {
    loop {
        if !set_read_pending(&session, generation, true) {
            return;
        }
        let item = reader.next().await;
        if !set_read_pending(&session, generation, false) {
            return;
        }

        let outcome = classify(item);
        let terminal = outcome.is_terminal();
        let result = match outcome {
            ReadOutcome::Control => continue,
            ReadOutcome::Payload(text) => {
                trace!(endpoint = %endpoint, payload = %text, "<==");
                Ok(text)
            }
            ReadOutcome::PeerClosed(err) => {
                debug!(endpoint = %endpoint, error = %err, "peer closed the stream");
                // The protocol layer queued the close reply; it leaves on the next flush.
                if let Some(writer) = finish_stream(&session, generation) {
                    tokio::task::spawn_local(acknowledge_close(writer, endpoint.clone()));
                }
                Err(err)
            }
            ReadOutcome::Failed(err) if terminal => {
                debug!(endpoint = %endpoint, error = %err, "stream ended");
                finish_stream(&session, generation);
                Err(err)
            }
            ReadOutcome::Failed(err) => {
                warn!(endpoint = %endpoint, error = %err, "read failed");
                Err(err)
            }
        };

        if !dispatch_message(&session, generation, result, !terminal) || terminal {
            return;
        }
    }
}

fn set_read_pending(session: &Rc<RefCell<Session>>, generation: u64, pending: bool) -> bool {
    let mut guard = session.borrow_mut();
    if guard.generation != generation {
        return false;
    }
    guard.read_pending = pending;
    true
}

/// Marks the session closed after a terminal read and hands back the write half.
fn finish_stream(session: &Rc<RefCell<Session>>, generation: u64) -> Option<WsWriter> {
    let mut guard = session.borrow_mut();
    if guard.generation != generation {
        return None;
    }
    guard.state = ConnectionState::Closed;
    guard.read_task = None;
    guard.read_pending = false;
    guard.writer.take()
}

/// Hands `result` to the registered message callback. Returns false once the
/// session has been closed (by the callback or otherwise).
fn dispatch_message(
    session: &Rc<RefCell<Session>>,
    generation: u64,
    result: Result<String, Error>,
    keep_handler: bool,
) -> bool {
    let handler = {
        let mut guard = session.borrow_mut();
        if guard.generation != generation {
            return false;
        }
        guard.on_message.take()
    };
    let Some(mut handler) = handler else {
        return true;
    };
    handler(result);

    let mut guard = session.borrow_mut();
    if guard.generation != generation {
        return false;
    }
    // receive() from inside the callback installs a replacement; keep it.
    if keep_handler && guard.on_message.is_none() {
        guard.on_message = Some(handler);
    }
    true
}

async fn acknowledge_close(mut writer: WsWriter, endpoint: String) {
    match writer.close().await {
        Ok(()) => trace!(endpoint = %endpoint, "close reply flushed"),
        Err(err) => debug!(endpoint = %endpoint, error = %err, "close reply not delivered"),
    }
}

async fn send_close(mut writer: WsWriter, endpoint: String) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    match writer.send(Message::Close(Some(frame))).await {
        Ok(()) => trace!(endpoint = %endpoint, "close notification sent"),
        Err(err) => warn!(endpoint = %endpoint, error = %err, "close notification not delivered"),
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionState, StreamConnection};
    use crate::api::Reactor;
    use crate::core::error::ErrorKind;

    #[test]
    fn receive_before_open_is_rejected() {
        let reactor = Reactor::new().expect("reactor");
        let mut conn = StreamConnection::new(reactor.handle(), "localhost", "8088");
        let err = conn.receive(|_| {}).expect_err("receive");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[test]
    fn second_connect_while_connecting_is_rejected() {
        let reactor = Reactor::new().expect("reactor");
        let mut conn = StreamConnection::new(reactor.handle(), "localhost", "8088");
        conn.connect("/ari/events?app=test", |_| {}).expect("connect");
        assert_eq!(conn.state(), ConnectionState::Resolving);
        let err = conn.connect("/again", |_| {}).expect_err("second connect");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn close_on_idle_is_a_no_op() {
        let reactor = Reactor::new().expect("reactor");
        let mut conn = StreamConnection::new(reactor.handle(), "localhost", "8088");
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[test]
    fn connecting_states_are_classified() {
        assert!(ConnectionState::Resolving.is_connecting());
        assert!(ConnectionState::TcpConnecting.is_connecting());
        assert!(ConnectionState::Handshaking.is_connecting());
        assert!(!ConnectionState::Idle.is_connecting());
        assert!(!ConnectionState::Open.is_connecting());
        assert!(!ConnectionState::Closed.is_connecting());
    }
}
