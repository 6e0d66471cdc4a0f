//! Console exec and resource stats WebSockets.
//!
//! Both endpoints upgrade first and then admit the session; refusals are
//! reported as close frames with a reason rather than HTTP errors.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Extension, Router,
};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use powerport_core::bridge::{gateway::Rejection, CloseReason, Frame};
use powerport_core::StreamKind;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::middleware::AuthContext;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/exec/{id}", get(exec_stream))
        .route("/stats/{id}", get(stats_stream))
}

async fn exec_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth.user_id, id, StreamKind::Exec))
}

async fn stats_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, auth.user_id, id, StreamKind::Stats))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    requester: Option<String>,
    instance_id: String,
    kind: StreamKind,
) {
    let (client_tx, client_rx) = split_client_socket(socket);

    let _permit = match state.streams.try_acquire() {
        Ok(permit) => permit,
        Err(rejection) => return reject(client_tx, &instance_id, rejection).await,
    };

    let target = match state.streams.authorize(requester.as_deref(), &instance_id) {
        Ok(target) => target,
        Err(rejection) => return reject(client_tx, &instance_id, rejection).await,
    };

    state.streams.serve(kind, target, (client_tx, client_rx)).await;
    debug!(instance_id = %instance_id, active = state.streams.active_sessions(), "Stream slot released");
}

async fn reject<S>(mut client_tx: S, instance_id: &str, rejection: Rejection)
where
    S: Sink<Frame> + Unpin,
{
    warn!(instance_id, reason = rejection.reason(), "Stream session refused");
    let _ = client_tx.send(rejection.close_frame()).await;
    let _ = client_tx.close().await;
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
            code: r.code,
            reason: r.reason.into(),
        })),
    }
}

/// Ping and pong are answered by axum and never relayed.
fn from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
        Message::Close(frame) => Some(Frame::Close(frame.map(|f| CloseReason {
            code: f.code,
            reason: f.reason.as_str().to_owned(),
        }))),
        Message::Ping(_) | Message::Pong(_) => None,
    }
}

fn split_client_socket(
    socket: WebSocket,
) -> (
    impl Sink<Frame, Error = axum::Error> + Unpin,
    impl Stream<Item = Result<Frame, axum::Error>>,
) {
    let (tx, rx) = socket.split();
    let tx = tx.with(|frame: Frame| future::ready(Ok::<_, axum::Error>(to_message(frame))));
    let rx = rx.filter_map(|message| {
        future::ready(match message {
            Ok(message) => from_message(message).map(Ok),
            Err(e) => Some(Err(e)),
        })
    });
    (tx, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_map_to_axum_messages() {
        let frame = Frame::Text("whoami".into());
        assert_eq!(from_message(to_message(frame.clone())), Some(frame));

        let frame = Frame::Binary(vec![1, 2, 3]);
        assert_eq!(from_message(to_message(frame.clone())), Some(frame));

        let frame = Rejection::InvalidInstance.close_frame();
        assert_eq!(from_message(to_message(frame.clone())), Some(frame));
    }

    #[test]
    fn test_pings_are_not_relayed() {
        assert_eq!(from_message(Message::Ping(vec![9].into())), None);
    }
}
