//! Duplex relay between a panel client socket and a daemon socket.
//!
//! [`Bridge::run`] is transport agnostic: each side is a `Stream` of
//! incoming [`Frame`]s plus a `Sink` for outgoing ones. Console exec and
//! resource stats share the same bridge and differ only in the daemon URL.
//!
//! Session rules:
//! - the optional auth frame goes to the daemon before anything else
//! - text and binary frames are relayed unmodified and in order
//! - when either side closes, the other side is closed too
//! - a daemon failure produces one notice frame to the client, then a close;
//!   the bridge never reconnects

pub mod gateway;
pub mod socket;

pub use gateway::StreamGateway;
pub use socket::split_daemon_socket;

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tracing::debug;

/// Notice sent to the client when the daemon side fails
pub const UNAVAILABLE_NOTICE: &str =
    "\x1b[31;1mThis instance is unavailable! \x1b[0mThe Daemon instance appears to be down. Retrying...";

/// WebSocket close codes used by the bridge
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const POLICY: u16 = 1008;
    pub const INTERNAL: u16 = 1011;
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Transport-neutral WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<CloseReason>),
}

impl Frame {
    /// `{"event":"auth","args":[apiKey]}`, the first frame every daemon stream expects
    pub fn auth(api_key: &str) -> Self {
        Frame::Text(serde_json::json!({ "event": "auth", "args": [api_key] }).to_string())
    }

    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Frame::Close(Some(CloseReason::new(code, reason)))
    }
}

/// Why a bridged session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEnd {
    ClientClosed,
    ClientError(String),
    DaemonClosed,
    DaemonError(String),
}

#[derive(Debug, Clone, Default)]
pub struct Bridge {
    auth_frame: Option<Frame>,
    unavailable_notice: Option<String>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame sent to the daemon as soon as the session starts
    pub fn with_auth_frame(mut self, frame: Frame) -> Self {
        self.auth_frame = Some(frame);
        self
    }

    /// Text sent once to the client when the daemon side fails
    pub fn with_unavailable_notice(mut self, notice: impl Into<String>) -> Self {
        self.unavailable_notice = Some(notice.into());
        self
    }

    /// Relay frames until either side ends, then close both.
    pub async fn run<CS, CR, DS, DR, CE, CSE, DE, DSE>(
        &self,
        client: (CS, CR),
        daemon: (DS, DR),
    ) -> BridgeEnd
    where
        CS: Sink<Frame, Error = CSE>,
        CR: Stream<Item = Result<Frame, CE>>,
        DS: Sink<Frame, Error = DSE>,
        DR: Stream<Item = Result<Frame, DE>>,
        CE: Display,
        CSE: Display,
        DE: Display,
        DSE: Display,
    {
        let (client_tx, client_rx) = client;
        let (daemon_tx, daemon_rx) = daemon;
        tokio::pin!(client_tx, client_rx, daemon_tx, daemon_rx);

        let mut end = None;
        if let Some(frame) = self.auth_frame.clone() {
            if let Err(e) = daemon_tx.send(frame).await {
                end = Some(BridgeEnd::DaemonError(e.to_string()));
            }
        }

        let end = match end {
            Some(end) => end,
            None => {
                let upstream = async {
                    loop {
                        match client_rx.next().await {
                            None | Some(Ok(Frame::Close(_))) => return BridgeEnd::ClientClosed,
                            Some(Err(e)) => return BridgeEnd::ClientError(e.to_string()),
                            Some(Ok(frame)) => {
                                if let Err(e) = daemon_tx.send(frame).await {
                                    return BridgeEnd::DaemonError(e.to_string());
                                }
                            }
                        }
                    }
                };
                let downstream = async {
                    loop {
                        match daemon_rx.next().await {
                            None | Some(Ok(Frame::Close(_))) => return BridgeEnd::DaemonClosed,
                            Some(Err(e)) => return BridgeEnd::DaemonError(e.to_string()),
                            Some(Ok(frame)) => {
                                if let Err(e) = client_tx.send(frame).await {
                                    return BridgeEnd::ClientError(e.to_string());
                                }
                            }
                        }
                    }
                };

                tokio::select! {
                    end = upstream => end,
                    end = downstream => end,
                }
            }
        };

        debug!(?end, "Bridge session ending");

        match &end {
            BridgeEnd::ClientClosed | BridgeEnd::ClientError(_) => {
                let _ = daemon_tx.send(Frame::close(close_code::NORMAL, "client closed")).await;
            }
            BridgeEnd::DaemonClosed => {
                let _ = client_tx
                    .send(Frame::close(close_code::NORMAL, "daemon closed the session"))
                    .await;
            }
            BridgeEnd::DaemonError(_) => self.notify_unavailable(client_tx.as_mut()).await,
        }
        let _ = daemon_tx.close().await;
        let _ = client_tx.close().await;

        end
    }

    /// Send the unavailable notice (if any) and a close frame to the client.
    pub async fn notify_unavailable<CS>(&self, mut client_tx: CS)
    where
        CS: Sink<Frame> + Unpin,
    {
        if let Some(notice) = &self.unavailable_notice {
            let _ = client_tx.send(Frame::Text(notice.clone())).await;
        }
        let _ = client_tx
            .send(Frame::close(close_code::INTERNAL, "daemon unavailable"))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::time::Duration;

    type Incoming = mpsc::UnboundedSender<Result<Frame, String>>;
    type Outgoing = mpsc::UnboundedReceiver<Frame>;

    /// One side of the bridge: what the bridge reads, what it writes.
    struct Side {
        sink: mpsc::UnboundedSender<Frame>,
        stream: mpsc::UnboundedReceiver<Result<Frame, String>>,
    }

    /// Remote end of a side, held by the test.
    struct Peer {
        send: Incoming,
        recv: Outgoing,
    }

    fn pair() -> (Side, Peer) {
        let (in_tx, in_rx) = mpsc::unbounded();
        let (out_tx, out_rx) = mpsc::unbounded();
        (
            Side {
                sink: out_tx,
                stream: in_rx,
            },
            Peer {
                send: in_tx,
                recv: out_rx,
            },
        )
    }

    fn spawn_bridge(bridge: Bridge) -> (Peer, Peer, tokio::task::JoinHandle<BridgeEnd>) {
        let (client, client_peer) = pair();
        let (daemon, daemon_peer) = pair();
        let handle = tokio::spawn(async move {
            bridge
                .run((client.sink, client.stream), (daemon.sink, daemon.stream))
                .await
        });
        (client_peer, daemon_peer, handle)
    }

    async fn recv(peer: &mut Peer) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(1), peer.recv.next())
            .await
            .expect("timed out waiting for frame")
    }

    #[test]
    fn test_auth_frame_shape() {
        let Frame::Text(text) = Frame::auth("secret") else {
            panic!("auth frame must be text");
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({"event": "auth", "args": ["secret"]}));
    }

    #[tokio::test]
    async fn test_auth_frame_sent_first() {
        let bridge = Bridge::new().with_auth_frame(Frame::auth("secret"));
        let (client, mut daemon, _handle) = spawn_bridge(bridge);

        client.send.unbounded_send(Ok(Frame::Text("ls".into()))).unwrap();

        assert_eq!(recv(&mut daemon).await, Some(Frame::auth("secret")));
        assert_eq!(recv(&mut daemon).await, Some(Frame::Text("ls".into())));
    }

    #[tokio::test]
    async fn test_frames_relayed_in_order_both_ways() {
        let (mut client, mut daemon, _handle) = spawn_bridge(Bridge::new());

        for i in 0..20 {
            client.send.unbounded_send(Ok(Frame::Text(format!("cmd {i}")))).unwrap();
            daemon
                .send
                .unbounded_send(Ok(Frame::Binary(vec![i as u8, 0xff])))
                .unwrap();
        }

        for i in 0..20 {
            assert_eq!(recv(&mut daemon).await, Some(Frame::Text(format!("cmd {i}"))));
            assert_eq!(recv(&mut client).await, Some(Frame::Binary(vec![i as u8, 0xff])));
        }
    }

    #[tokio::test]
    async fn test_client_close_closes_daemon() {
        let (client, mut daemon, handle) = spawn_bridge(Bridge::new());

        drop(client.send);

        assert_eq!(
            recv(&mut daemon).await,
            Some(Frame::close(close_code::NORMAL, "client closed"))
        );
        assert_eq!(recv(&mut daemon).await, None);
        assert_eq!(handle.await.unwrap(), BridgeEnd::ClientClosed);
    }

    #[tokio::test]
    async fn test_client_close_frame_ends_session() {
        let (client, mut daemon, handle) = spawn_bridge(Bridge::new());

        client.send.unbounded_send(Ok(Frame::Close(None))).unwrap();

        assert!(matches!(recv(&mut daemon).await, Some(Frame::Close(_))));
        assert_eq!(recv(&mut daemon).await, None);
        assert_eq!(handle.await.unwrap(), BridgeEnd::ClientClosed);
    }

    #[tokio::test]
    async fn test_daemon_close_closes_client() {
        let (mut client, daemon, handle) = spawn_bridge(Bridge::new());

        drop(daemon.send);

        assert_eq!(
            recv(&mut client).await,
            Some(Frame::close(close_code::NORMAL, "daemon closed the session"))
        );
        assert_eq!(recv(&mut client).await, None);
        assert_eq!(handle.await.unwrap(), BridgeEnd::DaemonClosed);
    }

    #[tokio::test]
    async fn test_daemon_error_sends_single_notice() {
        let bridge = Bridge::new().with_unavailable_notice("daemon unavailable, retrying...");
        let (mut client, daemon, handle) = spawn_bridge(bridge);

        daemon.send.unbounded_send(Ok(Frame::Text("cpu 3%".into()))).unwrap();
        daemon.send.unbounded_send(Err("connection reset".into())).unwrap();

        assert_eq!(recv(&mut client).await, Some(Frame::Text("cpu 3%".into())));
        assert_eq!(
            recv(&mut client).await,
            Some(Frame::Text("daemon unavailable, retrying...".into()))
        );
        assert_eq!(
            recv(&mut client).await,
            Some(Frame::close(close_code::INTERNAL, "daemon unavailable"))
        );
        assert_eq!(recv(&mut client).await, None);
        assert_eq!(
            handle.await.unwrap(),
            BridgeEnd::DaemonError("connection reset".into())
        );
    }

    #[tokio::test]
    async fn test_failed_auth_frame_notifies_client() {
        let bridge = Bridge::new()
            .with_auth_frame(Frame::auth("secret"))
            .with_unavailable_notice(UNAVAILABLE_NOTICE);
        let (client, daemon) = (pair(), pair());
        let ((client_side, mut client_peer), (daemon_side, daemon_peer)) = (client, daemon);

        // Daemon went away before the session started.
        drop(daemon_peer.recv);

        let end = bridge
            .run(
                (client_side.sink, client_side.stream),
                (daemon_side.sink, daemon_side.stream),
            )
            .await;

        assert!(matches!(end, BridgeEnd::DaemonError(_)));
        assert_eq!(
            recv(&mut client_peer).await,
            Some(Frame::Text(UNAVAILABLE_NOTICE.into()))
        );
        assert!(matches!(recv(&mut client_peer).await, Some(Frame::Close(_))));
        drop(daemon_peer.send);
    }
}
