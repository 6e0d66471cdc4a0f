//! Session setup for the exec and stats streams.
//!
//! A session is admitted in three steps: a permit from the session limit,
//! authorization of the requester against the instance, then the daemon
//! connection. Each refusal maps to a close frame sent to the client.

use super::{close_code, split_daemon_socket, Bridge, BridgeEnd, Frame, UNAVAILABLE_NOTICE};
use crate::auth::is_user_authorized_for_instance;
use crate::daemon::{DaemonClient, StreamKind};
use crate::store::{keys, Store};
use crate::types::{Instance, Node, User};
use futures::{Sink, SinkExt, Stream};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

/// Why a stream session was refused before relaying started
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    AuthorizationRequired,
    InvalidInstance,
    Unauthorized,
    TooManySessions,
    Internal,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::AuthorizationRequired => "Authorization required",
            Rejection::InvalidInstance => "Invalid instance or ID",
            Rejection::Unauthorized => "Unauthorized access",
            Rejection::TooManySessions => "too many sessions",
            Rejection::Internal => "internal error",
        }
    }

    pub fn close_frame(&self) -> Frame {
        let code = match self {
            Rejection::TooManySessions => close_code::TRY_AGAIN_LATER,
            Rejection::Internal => close_code::INTERNAL,
            _ => close_code::POLICY,
        };
        Frame::close(code, self.reason())
    }
}

/// Instance resolved for a session, with the node to dial
#[derive(Debug, Clone)]
pub struct StreamTarget {
    pub instance: Instance,
    pub node: Node,
}

impl StreamTarget {
    /// Stats streams are addressed by container and volume, exec by container only.
    fn volume(&self, kind: StreamKind) -> Option<&str> {
        match kind {
            StreamKind::Exec => None,
            StreamKind::Stats => Some(self.instance.volume_id.as_str()),
        }
    }
}

#[derive(Clone)]
pub struct StreamGateway {
    store: Store,
    daemon: DaemonClient,
    sessions: Arc<Semaphore>,
    capacity: usize,
}

impl StreamGateway {
    pub fn new(store: Store, daemon: DaemonClient, max_sessions: usize) -> Self {
        Self {
            store,
            daemon,
            sessions: Arc::new(Semaphore::new(max_sessions)),
            capacity: max_sessions,
        }
    }

    /// Reserve a session slot; the slot is released when the permit drops.
    pub fn try_acquire(&self) -> Result<OwnedSemaphorePermit, Rejection> {
        Arc::clone(&self.sessions)
            .try_acquire_owned()
            .map_err(|_| Rejection::TooManySessions)
    }

    pub fn active_sessions(&self) -> usize {
        self.capacity - self.sessions.available_permits()
    }

    /// Resolve `instance_id` and check that `requester` may attach to it.
    pub fn authorize(&self, requester: Option<&str>, instance_id: &str) -> Result<StreamTarget, Rejection> {
        let requester = requester
            .filter(|r| !r.is_empty())
            .ok_or(Rejection::AuthorizationRequired)?;

        if instance_id.is_empty() {
            return Err(Rejection::InvalidInstance);
        }
        let instance = self
            .store
            .get::<Instance>(&keys::instance(instance_id))
            .map_err(internal)?
            .ok_or(Rejection::InvalidInstance)?;

        let user = self
            .store
            .get_list::<User>(keys::USERS)
            .map_err(internal)?
            .into_iter()
            .find(|u| u.user_id == requester)
            .ok_or(Rejection::Unauthorized)?;
        if !is_user_authorized_for_instance(&user, &instance) {
            return Err(Rejection::Unauthorized);
        }

        // Prefer the live node record: its API key may have been rebound
        // since the instance snapshot was taken.
        let node = self
            .store
            .get::<Node>(&keys::node(&instance.node.id))
            .map_err(internal)?
            .unwrap_or_else(|| instance.node.clone());

        Ok(StreamTarget { instance, node })
    }

    fn bridge(&self, target: &StreamTarget) -> Bridge {
        Bridge::new()
            .with_auth_frame(Frame::auth(target.node.api_key.as_deref().unwrap_or_default()))
            .with_unavailable_notice(UNAVAILABLE_NOTICE)
    }

    /// Dial the daemon and relay until either side closes.
    pub async fn serve<CS, CR, CE, CSE>(
        &self,
        kind: StreamKind,
        target: StreamTarget,
        client: (CS, CR),
    ) -> BridgeEnd
    where
        CS: Sink<Frame, Error = CSE>,
        CR: Stream<Item = Result<Frame, CE>>,
        CE: Display,
        CSE: Display,
    {
        let bridge = self.bridge(&target);
        let instance_id = target.instance.id.as_str();
        let container_id = target.instance.container_id.as_str();

        let socket = match self
            .daemon
            .connect_stream(&target.node, kind, container_id, target.volume(kind))
            .await
        {
            Ok(socket) => socket,
            Err(e) => {
                warn!(instance_id, container_id, stream = kind.as_str(), error = %e, "Daemon stream unavailable");
                let (client_tx, _client_rx) = client;
                tokio::pin!(client_tx);
                bridge.notify_unavailable(client_tx.as_mut()).await;
                let _ = client_tx.close().await;
                return BridgeEnd::DaemonError(e.to_string());
            }
        };

        info!(instance_id, container_id, stream = kind.as_str(), "Stream session started");
        let end = bridge.run(client, split_daemon_socket(socket)).await;
        info!(instance_id, stream = kind.as_str(), ?end, "Stream session ended");
        end
    }
}

/// Reject a session on a store failure.
fn internal(e: crate::error::Error) -> Rejection {
    error!(error = %e, "Failed to resolve stream session");
    Rejection::Internal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonSettings;
    use futures::channel::mpsc;
    use futures::StreamExt;
    use serde_json::json;

    async fn seeded() -> StreamGateway {
        let store = Store::in_memory();
        let users: Vec<User> = serde_json::from_value(json!([
            {"userId": "owner", "username": "owner", "email": "o@x", "password": ""},
            {"userId": "stranger", "username": "s", "email": "s@x", "password": ""}
        ]))
        .unwrap();
        store.set(keys::USERS, &users).await.unwrap();

        let instance: Instance = serde_json::from_value(json!({
            "Id": "a1b2c3d4",
            "Name": "mc",
            "Node": {"id": "n1", "name": "n", "address": "127.0.0.1", "port": 1,
                     "apiKey": "stale", "status": "Online"},
            "User": "owner",
            "ContainerId": "c0ffee",
            "VolumeId": "vol-1",
            "Memory": 1024,
            "Cpu": 100,
            "Ports": "25565:25565",
            "Primary": "25565",
            "Image": "itzg/minecraft-server"
        }))
        .unwrap();
        store.set(&keys::instance("a1b2c3d4"), &instance).await.unwrap();

        let mut node = instance.node.clone();
        node.api_key = Some("fresh".into());
        store.set(&keys::node("n1"), &node).await.unwrap();

        let daemon = DaemonClient::new(DaemonSettings::default()).unwrap();
        StreamGateway::new(store, daemon, 2)
    }

    #[tokio::test]
    async fn test_authorize_rejections() {
        let gateway = seeded().await;

        assert_eq!(
            gateway.authorize(None, "a1b2c3d4").unwrap_err(),
            Rejection::AuthorizationRequired
        );
        assert_eq!(
            gateway.authorize(Some("owner"), "missing").unwrap_err(),
            Rejection::InvalidInstance
        );
        assert_eq!(
            gateway.authorize(Some("stranger"), "a1b2c3d4").unwrap_err(),
            Rejection::Unauthorized
        );
        assert_eq!(
            gateway.authorize(Some("ghost"), "a1b2c3d4").unwrap_err(),
            Rejection::Unauthorized
        );
    }

    #[tokio::test]
    async fn test_authorize_uses_live_node_record() {
        let gateway = seeded().await;
        let target = gateway.authorize(Some("owner"), "a1b2c3d4").unwrap();

        assert_eq!(target.node.api_key.as_deref(), Some("fresh"));
        assert_eq!(target.volume(StreamKind::Stats), Some("vol-1"));
        assert_eq!(target.volume(StreamKind::Exec), None);
    }

    #[test]
    fn test_rejection_close_codes() {
        assert_eq!(
            Rejection::Unauthorized.close_frame(),
            Frame::close(1008, "Unauthorized access")
        );
        assert_eq!(
            Rejection::TooManySessions.close_frame(),
            Frame::close(1013, "too many sessions")
        );
    }

    #[tokio::test]
    async fn test_session_limit() {
        let gateway = seeded().await;

        let first = gateway.try_acquire().unwrap();
        let _second = gateway.try_acquire().unwrap();
        assert_eq!(gateway.active_sessions(), 2);
        assert_eq!(gateway.try_acquire().unwrap_err(), Rejection::TooManySessions);

        drop(first);
        assert!(gateway.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_daemon_notifies_client() {
        let gateway = seeded().await;
        let target = gateway.authorize(Some("owner"), "a1b2c3d4").unwrap();

        let (client_tx, mut from_bridge) = mpsc::unbounded::<Frame>();
        let (_to_bridge, client_rx) = mpsc::unbounded::<Result<Frame, String>>();

        let end = gateway
            .serve(StreamKind::Exec, target, (client_tx, client_rx))
            .await;

        assert!(matches!(end, BridgeEnd::DaemonError(_)));
        assert_eq!(
            from_bridge.next().await,
            Some(Frame::Text(UNAVAILABLE_NOTICE.into()))
        );
        assert_eq!(
            from_bridge.next().await,
            Some(Frame::close(close_code::INTERNAL, "daemon unavailable"))
        );
        assert_eq!(from_bridge.next().await, None);
    }

    #[tokio::test]
    async fn test_serve_relays_through_daemon_socket() {
        use tokio::sync::oneshot;
        use tokio_tungstenite::accept_hdr_async;
        use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
        use tokio_tungstenite::tungstenite::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (path_tx, path_rx) = oneshot::channel::<String>();

        let daemon = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_hdr_async(stream, |req: &Request, resp: Response| {
                let _ = path_tx.send(req.uri().path().to_string());
                Ok(resp)
            })
            .await
            .unwrap();

            let auth = ws.next().await.unwrap().unwrap().into_text().unwrap();
            ws.send(Message::Text("daemon output".into())).await.unwrap();
            let relayed = ws.next().await.unwrap().unwrap().into_text().unwrap();
            let close = match ws.next().await.unwrap().unwrap() {
                Message::Close(Some(frame)) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                other => panic!("expected close, got {other:?}"),
            };
            (auth.as_str().to_owned(), relayed.as_str().to_owned(), close)
        });

        let gateway = seeded().await;
        let mut target = gateway.authorize(Some("owner"), "a1b2c3d4").unwrap();
        target.node.port = port;

        let (client_tx, mut from_bridge) = mpsc::unbounded::<Frame>();
        let (to_bridge, client_rx) = mpsc::unbounded::<Result<Frame, String>>();

        let serve = gateway.serve(StreamKind::Stats, target, (client_tx, client_rx));
        let client = async {
            assert_eq!(from_bridge.next().await, Some(Frame::Text("daemon output".into())));
            to_bridge.unbounded_send(Ok(Frame::Text("ls".into()))).unwrap();
            to_bridge.unbounded_send(Ok(Frame::close(close_code::NORMAL, "bye"))).unwrap();
        };
        let (end, ()) = tokio::join!(serve, client);
        assert_eq!(end, BridgeEnd::ClientClosed);

        let (auth, relayed, close) = daemon.await.unwrap();
        assert_eq!(path_rx.await.unwrap(), "/stats/c0ffee/vol-1");
        assert_eq!(auth, json!({"event": "auth", "args": ["fresh"]}).to_string());
        assert_eq!(relayed, "ls");
        assert_eq!(close, (close_code::NORMAL, "client closed".to_string()));
    }
}
