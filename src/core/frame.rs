// Inbound frame classification. A delivered payload is the receive buffer itself:
// the String moves out of the protocol message into the callback, never copied.
use std::io;

use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::core::error::{Error, ErrorKind};

#[derive(Debug)]
pub enum ReadOutcome {
    Payload(String),
    /// Ping, pong, and raw frames; answered by the protocol layer, never reported.
    Control,
    /// The peer sent a close frame; the reply is queued and still needs a flush.
    PeerClosed(Error),
    Failed(Error),
}

impl ReadOutcome {
    /// Outcomes after which the read loop must not re-arm.
    pub fn is_terminal(&self) -> bool {
        match self {
            ReadOutcome::PeerClosed(_) => true,
            ReadOutcome::Failed(err) => err.kind().is_terminal_read(),
            ReadOutcome::Payload(_) | ReadOutcome::Control => false,
        }
    }
}

/// Classifies one completed read of the inbound stream.
pub fn classify(item: Option<Result<Message, WsError>>) -> ReadOutcome {
    let message = match item {
        None => {
            return ReadOutcome::Failed(
                Error::new(ErrorKind::StreamEnded).with_message("end of stream"),
            );
        }
        Some(Err(err)) => return ReadOutcome::Failed(classify_read_error(err)),
        Some(Ok(message)) => message,
    };

    match message {
        Message::Text(text) => ReadOutcome::Payload(text),
        Message::Binary(data) => match String::from_utf8(data) {
            Ok(text) => ReadOutcome::Payload(text),
            Err(err) => ReadOutcome::Failed(
                Error::new(ErrorKind::Read)
                    .with_message("binary message is not valid utf-8")
                    .with_source(err),
            ),
        },
        Message::Close(frame) => {
            let mut err = Error::new(ErrorKind::StreamEnded).with_message("peer closed the stream");
            if let Some(frame) = frame {
                err = err.with_hint(format!("close code {}", u16::from(frame.code)));
            }
            ReadOutcome::PeerClosed(err)
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => ReadOutcome::Control,
    }
}

pub fn classify_read_error(err: WsError) -> Error {
    let kind = match &err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => ErrorKind::StreamEnded,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => ErrorKind::StreamEnded,
        WsError::Io(io_err) if is_stream_end(io_err.kind()) => ErrorKind::StreamEnded,
        _ => ErrorKind::Read,
    };
    let message = if kind == ErrorKind::StreamEnded {
        "stream closed"
    } else {
        "failed to read message"
    };
    Error::new(kind).with_message(message).with_source(err)
}

fn is_stream_end(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
