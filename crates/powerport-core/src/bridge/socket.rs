//! Frame adapters for the daemon side of a bridge.

use super::{CloseReason, Frame};
use crate::daemon::DaemonSocket;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
        }
    }
}

/// Ping and pong are answered by the socket itself and never relayed.
pub fn frame_from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
        Message::Close(frame) => Some(Frame::Close(frame.map(|f| CloseReason {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned(),
        }))),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

/// Split a daemon socket into the (sink, stream) pair [`super::Bridge::run`] takes.
pub fn split_daemon_socket(
    socket: DaemonSocket,
) -> (
    impl Sink<Frame, Error = WsError>,
    impl Stream<Item = Result<Frame, WsError>>,
) {
    let (tx, rx) = socket.split();
    let tx = tx.with(|frame: Frame| future::ready(Ok::<_, WsError>(Message::from(frame))));
    let rx = rx.filter_map(|message| {
        future::ready(match message {
            Ok(message) => frame_from_message(message).map(Ok),
            Err(e) => Some(Err(e)),
        })
    });
    (tx, rx)
}
