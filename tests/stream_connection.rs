//! Purpose: End-to-end tests for `StreamConnection` against loopback servers.
//! Exports: None (integration test module).
//! Role: Validate connect/receive/close callbacks, ordering, and cancellation over TCP.
//! Invariants: Servers run on the same reactor as the client; no extra threads.
//! Invariants: Bounded waits avoid test hangs.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use aristream::api::{ConnectionState, ErrorKind, Reactor, StreamConnection};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Recorder {
    connects: Vec<Result<(), ErrorKind>>,
    messages: Vec<Result<String, ErrorKind>>,
}

#[derive(Default)]
struct ServerLog {
    targets: Vec<String>,
    close_codes: Vec<Option<u16>>,
    finished: usize,
}

#[derive(Clone)]
enum Step {
    Text(&'static str),
    Binary(Vec<u8>),
    Ping,
    Pause(u64),
    Close,
}

fn drive_until(reactor: &Reactor, cond: impl Fn() -> bool) -> bool {
    reactor.block_on(async {
        let deadline = Instant::now() + WAIT;
        while !cond() {
            if Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    })
}

fn settle(reactor: &Reactor) {
    reactor.block_on(async { tokio::time::sleep(Duration::from_millis(100)).await });
}

fn bind(reactor: &Reactor) -> TestResult<(TcpListener, String)> {
    let listener = reactor.block_on(TcpListener::bind("127.0.0.1:0"))?;
    let port = listener.local_addr()?.port().to_string();
    Ok((listener, port))
}

/// Accepts websocket clients, plays `steps` to each, then reads until the client goes away.
fn spawn_ws_server(
    reactor: &Reactor,
    listener: TcpListener,
    steps: Vec<Step>,
) -> Rc<RefCell<ServerLog>> {
    let log = Rc::new(RefCell::new(ServerLog::default()));
    let server_log = Rc::clone(&log);
    reactor.spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            tokio::task::spawn_local(serve_session(tcp, steps.clone(), Rc::clone(&server_log)));
        }
    });
    log
}

async fn serve_session(tcp: TcpStream, steps: Vec<Step>, log: Rc<RefCell<ServerLog>>) {
    let target_log = Rc::clone(&log);
    let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        target_log.borrow_mut().targets.push(request.uri().to_string());
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(tcp, callback).await else {
        return;
    };
    for step in steps {
        let sent = match step {
            Step::Text(text) => ws.send(Message::Text(text.to_string())).await,
            Step::Binary(bytes) => ws.send(Message::Binary(bytes)).await,
            Step::Ping => ws.send(Message::Ping(Vec::new())).await,
            Step::Pause(ms) => {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }
            Step::Close => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                ws.close(Some(frame)).await
            }
        };
        if sent.is_err() {
            break;
        }
    }
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Close(frame) = message {
            log.borrow_mut()
                .close_codes
                .push(frame.map(|frame| u16::from(frame.code)));
        }
    }
    log.borrow_mut().finished += 1;
}

fn connect_recorded(conn: &mut StreamConnection, request: &str, rec: &Rc<RefCell<Recorder>>) {
    let rec = Rc::clone(rec);
    conn.connect(request, move |result| {
        rec.borrow_mut().connects.push(result.map_err(|err| err.kind()));
    })
    .expect("connect accepted");
}

fn receive_recorded(conn: &mut StreamConnection, rec: &Rc<RefCell<Recorder>>) {
    let rec = Rc::clone(rec);
    conn.receive(move |result| {
        rec.borrow_mut().messages.push(result.map_err(|err| err.kind()));
    })
    .expect("receive accepted");
}

fn open_connection(
    reactor: &Reactor,
    port: &str,
    rec: &Rc<RefCell<Recorder>>,
) -> StreamConnection {
    let mut conn = StreamConnection::new(reactor.handle(), "localhost", port);
    connect_recorded(&mut conn, "/ari/events?app=test", rec);
    assert!(drive_until(reactor, || !rec.borrow().connects.is_empty()));
    assert_eq!(rec.borrow().connects, vec![Ok(())]);
    assert_eq!(conn.state(), ConnectionState::Open);
    conn
}

#[test]
fn stasis_start_scenario_delivers_once_and_rearms() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    let log = spawn_ws_server(
        &reactor,
        listener,
        vec![
            Step::Text("{\"type\":\"StasisStart\"}"),
            Step::Pause(50),
            Step::Text("{\"type\":\"StasisEnd\"}"),
        ],
    );
    let rec = Rc::new(RefCell::new(Recorder::default()));

    let mut conn = open_connection(&reactor, &port, &rec);
    assert_eq!(log.borrow().targets, vec!["/ari/events?app=test".to_string()]);

    receive_recorded(&mut conn, &rec);
    assert!(drive_until(&reactor, || rec.borrow().messages.len() == 1));
    assert_eq!(
        rec.borrow().messages,
        vec![Ok("{\"type\":\"StasisStart\"}".to_string())]
    );
    assert_eq!(conn.state(), ConnectionState::Open);

    assert!(drive_until(&reactor, || rec.borrow().messages.len() == 2));
    assert_eq!(
        rec.borrow().messages[1],
        Ok("{\"type\":\"StasisEnd\"}".to_string())
    );

    conn.close();
    assert!(drive_until(&reactor, || log.borrow().finished == 1));
    assert_eq!(rec.borrow().connects.len(), 1);
    Ok(())
}

#[test]
fn frames_arrive_in_order_then_stream_end_stops_the_loop() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    let _log = spawn_ws_server(
        &reactor,
        listener,
        vec![
            Step::Text("one"),
            Step::Text("two"),
            Step::Text("three"),
            Step::Close,
        ],
    );
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = open_connection(&reactor, &port, &rec);

    receive_recorded(&mut conn, &rec);
    assert!(drive_until(&reactor, || rec.borrow().messages.len() == 4));
    settle(&reactor);

    assert_eq!(
        rec.borrow().messages,
        vec![
            Ok("one".to_string()),
            Ok("two".to_string()),
            Ok("three".to_string()),
            Err(ErrorKind::StreamEnded),
        ]
    );
    assert_eq!(conn.state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn read_errors_rearm_and_control_frames_are_silent() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    let _log = spawn_ws_server(
        &reactor,
        listener,
        vec![
            Step::Ping,
            Step::Binary(vec![0xff, 0xfe]),
            Step::Text("after"),
        ],
    );
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = open_connection(&reactor, &port, &rec);

    receive_recorded(&mut conn, &rec);
    assert!(drive_until(&reactor, || rec.borrow().messages.len() == 2));
    assert_eq!(
        rec.borrow().messages,
        vec![Err(ErrorKind::Read), Ok("after".to_string())]
    );
    assert_eq!(conn.state(), ConnectionState::Open);
    conn.close();
    Ok(())
}

#[test]
fn resolution_failure_reports_once_and_instance_stays_reusable() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = StreamConnection::new(reactor.handle(), "localhost", "not-a-port");

    connect_recorded(&mut conn, "/ari/events?app=test", &rec);
    assert!(drive_until(&reactor, || !rec.borrow().connects.is_empty()));
    settle(&reactor);
    assert_eq!(rec.borrow().connects, vec![Err(ErrorKind::Resolution)]);
    assert_eq!(conn.state(), ConnectionState::Idle);

    connect_recorded(&mut conn, "/ari/events?app=test", &rec);
    assert!(drive_until(&reactor, || rec.borrow().connects.len() == 2));
    assert_eq!(rec.borrow().connects[1], Err(ErrorKind::Resolution));
    Ok(())
}

#[test]
fn refused_connection_is_a_transport_error() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    drop(listener);
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = StreamConnection::new(reactor.handle(), "127.0.0.1", port);

    connect_recorded(&mut conn, "/ari/events?app=test", &rec);
    assert!(drive_until(&reactor, || !rec.borrow().connects.is_empty()));
    settle(&reactor);
    assert_eq!(rec.borrow().connects, vec![Err(ErrorKind::Transport)]);
    assert_eq!(conn.state(), ConnectionState::Idle);
    Ok(())
}

#[test]
fn rejected_upgrade_is_a_handshake_error() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    reactor.spawn(async move {
        let Ok((mut tcp, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        let _ = tcp.read(&mut buf).await;
        let _ = tcp
            .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
            .await;
        let _ = tcp.shutdown().await;
    });
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = StreamConnection::new(reactor.handle(), "127.0.0.1", port);

    connect_recorded(&mut conn, "/ari/events?app=test", &rec);
    assert!(drive_until(&reactor, || !rec.borrow().connects.is_empty()));
    settle(&reactor);
    assert_eq!(rec.borrow().connects, vec![Err(ErrorKind::Handshake)]);
    assert_eq!(conn.state(), ConnectionState::Idle);
    assert!(conn.receive(|_| {}).is_err());
    Ok(())
}

#[test]
fn close_during_handshake_cancels_connect_exactly_once() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    // Accepts TCP but never answers the upgrade request.
    reactor.spawn(async move {
        if let Ok((tcp, _)) = listener.accept().await {
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(tcp);
        }
    });
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = StreamConnection::new(reactor.handle(), "127.0.0.1", port);

    connect_recorded(&mut conn, "/ari/events?app=test", &rec);
    assert!(drive_until(&reactor, || conn.state()
        == ConnectionState::Handshaking));
    conn.close();
    assert_eq!(rec.borrow().connects, vec![Err(ErrorKind::Cancelled)]);
    assert_eq!(conn.state(), ConnectionState::Closed);

    settle(&reactor);
    assert_eq!(rec.borrow().connects.len(), 1);
    Ok(())
}

#[test]
fn close_during_read_cancels_and_sends_one_close_frame() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    let log = spawn_ws_server(&reactor, listener, Vec::new());
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = open_connection(&reactor, &port, &rec);

    receive_recorded(&mut conn, &rec);
    settle(&reactor);
    assert!(rec.borrow().messages.is_empty());

    conn.close();
    conn.close();
    assert_eq!(rec.borrow().messages, vec![Err(ErrorKind::Cancelled)]);

    assert!(drive_until(&reactor, || log.borrow().finished == 1));
    settle(&reactor);
    assert_eq!(log.borrow().close_codes, vec![Some(1000)]);
    assert_eq!(rec.borrow().messages.len(), 1);
    assert_eq!(rec.borrow().connects.len(), 1);
    Ok(())
}

#[test]
fn peer_close_is_acknowledged_before_the_transport_is_released() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    let log = spawn_ws_server(&reactor, listener, vec![Step::Text("one"), Step::Close]);
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = open_connection(&reactor, &port, &rec);

    receive_recorded(&mut conn, &rec);
    assert!(drive_until(&reactor, || log.borrow().finished == 1));
    settle(&reactor);

    assert_eq!(
        rec.borrow().messages,
        vec![Ok("one".to_string()), Err(ErrorKind::StreamEnded)]
    );
    assert_eq!(log.borrow().close_codes, vec![Some(1000)]);
    assert_eq!(conn.state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn dropping_mid_read_cancels_once_and_says_goodbye() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    let log = spawn_ws_server(
        &reactor,
        listener,
        vec![Step::Pause(300), Step::Text("late")],
    );
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = open_connection(&reactor, &port, &rec);

    receive_recorded(&mut conn, &rec);
    settle(&reactor);
    assert!(rec.borrow().messages.is_empty());

    drop(conn);
    assert_eq!(rec.borrow().messages, vec![Err(ErrorKind::Cancelled)]);

    assert!(drive_until(&reactor, || log.borrow().finished == 1));
    reactor.block_on(async { tokio::time::sleep(Duration::from_millis(400)).await });
    assert_eq!(rec.borrow().messages, vec![Err(ErrorKind::Cancelled)]);
    assert_eq!(log.borrow().close_codes, vec![Some(1000)]);
    Ok(())
}

#[test]
fn close_from_inside_the_message_callback_stops_delivery() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    let log = spawn_ws_server(
        &reactor,
        listener,
        vec![Step::Text("first"), Step::Text("second"), Step::Text("third")],
    );
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let conn = Rc::new(RefCell::new(open_connection(&reactor, &port, &rec)));

    let weak: Weak<RefCell<StreamConnection>> = Rc::downgrade(&conn);
    let seen = Rc::clone(&rec);
    conn.borrow_mut().receive(move |result| {
        seen.borrow_mut()
            .messages
            .push(result.map_err(|err| err.kind()));
        if let Some(conn) = weak.upgrade() {
            conn.borrow_mut().close();
        }
    })?;

    assert!(drive_until(&reactor, || log.borrow().finished == 1));
    settle(&reactor);
    assert_eq!(rec.borrow().messages, vec![Ok("first".to_string())]);
    assert_eq!(conn.borrow().state(), ConnectionState::Closed);
    Ok(())
}

#[test]
fn reconnect_after_close_opens_a_new_session() -> TestResult<()> {
    let reactor = Reactor::new()?;
    let (listener, port) = bind(&reactor)?;
    let log = spawn_ws_server(&reactor, listener, vec![Step::Text("hello")]);
    let rec = Rc::new(RefCell::new(Recorder::default()));
    let mut conn = open_connection(&reactor, &port, &rec);
    conn.close();
    assert!(drive_until(&reactor, || log.borrow().finished == 1));

    connect_recorded(&mut conn, "/ari/events?app=again", &rec);
    assert!(drive_until(&reactor, || rec.borrow().connects.len() == 2));
    assert_eq!(rec.borrow().connects[1], Ok(()));
    assert_eq!(conn.state(), ConnectionState::Open);

    receive_recorded(&mut conn, &rec);
    assert!(drive_until(&reactor, || !rec.borrow().messages.is_empty()));
    assert_eq!(rec.borrow().messages, vec![Ok("hello".to_string())]);
    assert_eq!(
        log.borrow().targets,
        vec![
            "/ari/events?app=test".to_string(),
            "/ari/events?app=again".to_string()
        ]
    );
    conn.close();
    Ok(())
}
