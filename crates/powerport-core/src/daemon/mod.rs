//! Client for node daemons.
//!
//! Every HTTP call carries the fixed service identity plus the node's API
//! key as basic-auth credentials and is bounded by a timeout. Transport
//! failures become [`Error::RemoteUnavailable`]; a daemon that answers with
//! an unexpected status is surfaced as [`Error::RemoteRejected`] with its
//! status and body untouched. A `201 Created` whose body cannot be read is
//! [`Error::RemoteMalformed`].

pub mod payload;

pub use payload::{translate_ports, DeploySpec, PortMap, ProvisionPayload};

use crate::error::{Error, Result};
use crate::types::{CreatedContainer, DaemonInfo, Node};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Service identity presented to daemons
pub const DEFAULT_SERVICE_USER: &str = "Skyport";

/// WebSocket connection to a daemon
pub type DaemonSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Daemon call settings
#[derive(Debug, Clone)]
pub struct DaemonSettings {
    /// Basic-auth username shared by all daemons
    pub username: String,
    /// Bound for health probes
    pub health_timeout: Duration,
    /// Bound for provisioning and deletion calls
    pub request_timeout: Duration,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            username: DEFAULT_SERVICE_USER.to_string(),
            health_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-instance stream exposed by a daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Console exec: `/exec/{containerId}`
    Exec,
    /// Resource stats: `/stats/{containerId}/{volumeId}`
    Stats,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Exec => "exec",
            StreamKind::Stats => "stats",
        }
    }
}

/// Remote operations the panel performs against a node's daemon.
#[async_trait]
pub trait DaemonApi: Send + Sync {
    /// `GET /`: liveness and version information
    async fn probe(&self, node: &Node) -> Result<DaemonInfo>;

    /// `POST /instances/create`: succeeds only on `201 Created`
    async fn create_instance(
        &self,
        node: &Node,
        payload: &ProvisionPayload,
    ) -> Result<CreatedContainer>;

    /// `GET /instances/{containerId}/delete`
    async fn delete_instance(&self, node: &Node, container_id: &str) -> Result<()>;
}

/// HTTP/WebSocket daemon client
#[derive(Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    settings: DaemonSettings,
}

impl DaemonClient {
    pub fn new(settings: DaemonSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &DaemonSettings {
        &self.settings
    }

    /// Client scoped to one node
    pub fn node<'a>(&'a self, node: &'a Node) -> NodeClient<'a> {
        NodeClient { client: self, node }
    }

    /// Open `ws://{address}:{port}/{exec|stats}/{containerId}[/{volumeId}]`
    pub async fn connect_stream(
        &self,
        node: &Node,
        kind: StreamKind,
        container_id: &str,
        volume_id: Option<&str>,
    ) -> Result<DaemonSocket> {
        let url = stream_url(node, kind, container_id, volume_id);
        debug!(%url, "Opening daemon stream");

        let connect = connect_async(url.as_str());
        let (socket, _response) = tokio::time::timeout(self.settings.request_timeout, connect)
            .await
            .map_err(|_| Error::RemoteUnavailable(format!("timed out connecting to {url}")))??;
        Ok(socket)
    }
}

/// WebSocket URL of a daemon stream
pub fn stream_url(
    node: &Node,
    kind: StreamKind,
    container_id: &str,
    volume_id: Option<&str>,
) -> String {
    match volume_id {
        Some(volume) => format!(
            "ws://{}/{}/{}/{}",
            node.authority(),
            kind.as_str(),
            container_id,
            volume
        ),
        None => format!("ws://{}/{}/{}", node.authority(), kind.as_str(), container_id),
    }
}

/// Daemon client bound to a single node
pub struct NodeClient<'a> {
    client: &'a DaemonClient,
    node: &'a Node,
}

impl NodeClient<'_> {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.node.authority(), path)
    }

    fn request(&self, method: reqwest::Method, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.client
            .http
            .request(method, self.url(path))
            .basic_auth(
                &self.client.settings.username,
                Some(self.node.api_key.as_deref().unwrap_or_default()),
            )
            .timeout(timeout)
    }

    pub async fn probe(&self) -> Result<DaemonInfo> {
        let resp = self
            .request(reqwest::Method::GET, "/", self.client.settings.health_timeout)
            .send()
            .await?;

        let resp = expect_status(resp, None).await?;
        Ok(resp.json::<DaemonInfo>().await?)
    }

    pub async fn create_instance(&self, payload: &ProvisionPayload) -> Result<CreatedContainer> {
        let resp = self
            .request(
                reqwest::Method::POST,
                "/instances/create",
                self.client.settings.request_timeout,
            )
            .json(payload)
            .send()
            .await?;

        let resp = expect_status(resp, Some(StatusCode::CREATED)).await?;
        let text = resp.text().await?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
        serde_json::from_value::<CreatedContainer>(body.clone()).map_err(|e| {
            // The daemon did create something; leave a trace so it can be cleaned up.
            let orphan = body.get("containerId").and_then(Value::as_str).unwrap_or("unknown");
            warn!(
                node_id = %self.node.id,
                container_id = orphan,
                error = %e,
                "Daemon created a container but returned an unusable body"
            );
            Error::RemoteMalformed(e.to_string())
        })
    }

    pub async fn delete_instance(&self, container_id: &str) -> Result<()> {
        let path = format!("/instances/{}/delete", container_id);
        let resp = self
            .request(reqwest::Method::GET, &path, self.client.settings.request_timeout)
            .send()
            .await?;

        expect_status(resp, None).await?;
        Ok(())
    }
}

/// Pass the response through when its status is acceptable, otherwise turn it
/// into `RemoteRejected` carrying the daemon's body.
///
/// `expected = None` accepts any 2xx.
async fn expect_status(
    resp: reqwest::Response,
    expected: Option<StatusCode>,
) -> Result<reqwest::Response> {
    let status = resp.status();
    let ok = match expected {
        Some(code) => status == code,
        None => status.is_success(),
    };
    if ok {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    Err(Error::RemoteRejected {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl DaemonApi for DaemonClient {
    async fn probe(&self, node: &Node) -> Result<DaemonInfo> {
        self.node(node).probe().await
    }

    async fn create_instance(
        &self,
        node: &Node,
        payload: &ProvisionPayload,
    ) -> Result<CreatedContainer> {
        self.node(node).create_instance(payload).await
    }

    async fn delete_instance(&self, node: &Node, container_id: &str) -> Result<()> {
        self.node(node).delete_instance(container_id).await
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted daemon used by registry and orchestrator tests.

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum Reply<T> {
        Ok(T),
        Rejected(u16, Value),
        Unavailable,
    }

    impl<T: Clone> Reply<T> {
        fn into_result(self) -> Result<T> {
            match self {
                Reply::Ok(v) => Ok(v),
                Reply::Rejected(status, body) => Err(Error::RemoteRejected { status, body }),
                Reply::Unavailable => Err(Error::RemoteUnavailable("connection refused".into())),
            }
        }
    }

    pub struct MockDaemon {
        pub probe: Mutex<Reply<DaemonInfo>>,
        pub create: Mutex<Reply<CreatedContainer>>,
        pub delete: Mutex<Reply<()>>,
        pub created: Mutex<Vec<Value>>,
        pub deleted: Mutex<Vec<String>>,
    }

    impl MockDaemon {
        pub fn healthy() -> Self {
            Self {
                probe: Mutex::new(Reply::Ok(DaemonInfo {
                    version_family: Some("1".into()),
                    version_release: Some("skyportd 0.2.2".into()),
                    online: Some(true),
                    remote: None,
                    docker: None,
                })),
                create: Mutex::new(Reply::Ok(CreatedContainer {
                    container_id: "c0ffee".into(),
                    volume_id: Some("vol-1".into()),
                    env: serde_json::json!(["EULA=true"]),
                    state: Value::String("installing".into()),
                })),
                delete: Mutex::new(Reply::Ok(())),
                created: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
            }
        }

        pub fn set_create(&self, reply: Reply<CreatedContainer>) {
            *self.create.lock().unwrap() = reply;
        }

        pub fn set_delete(&self, reply: Reply<()>) {
            *self.delete.lock().unwrap() = reply;
        }

        pub fn set_probe(&self, reply: Reply<DaemonInfo>) {
            *self.probe.lock().unwrap() = reply;
        }
    }

    #[async_trait]
    impl DaemonApi for MockDaemon {
        async fn probe(&self, _node: &Node) -> Result<DaemonInfo> {
            self.probe.lock().unwrap().clone().into_result()
        }

        async fn create_instance(
            &self,
            _node: &Node,
            payload: &ProvisionPayload,
        ) -> Result<CreatedContainer> {
            self.created
                .lock()
                .unwrap()
                .push(serde_json::to_value(payload).unwrap());
            self.create.lock().unwrap().clone().into_result()
        }

        async fn delete_instance(&self, _node: &Node, container_id: &str) -> Result<()> {
            let reply = self.delete.lock().unwrap().clone();
            if matches!(reply, Reply::Ok(())) {
                self.deleted.lock().unwrap().push(container_id.to_string());
            }
            reply.into_result()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeStatus;

    fn node(address: &str, port: u16) -> Node {
        Node {
            id: "n1".into(),
            name: "node-1".into(),
            tags: Value::Null,
            ram: 0,
            disk: 0,
            processor: String::new(),
            address: address.into(),
            port,
            api_key: Some("secret".into()),
            configure_key: None,
            status: NodeStatus::Online,
            version_family: None,
            version_release: None,
            remote: None,
            docker: None,
            last_checked: None,
            last_error: None,
            created_at: None,
        }
    }

    #[test]
    fn test_stream_urls() {
        let n = node("10.0.0.5", 3002);
        assert_eq!(
            stream_url(&n, StreamKind::Exec, "c0ffee", None),
            "ws://10.0.0.5:3002/exec/c0ffee"
        );
        assert_eq!(
            stream_url(&n, StreamKind::Stats, "c0ffee", Some("vol-1")),
            "ws://10.0.0.5:3002/stats/c0ffee/vol-1"
        );
    }

    #[test]
    fn test_default_settings() {
        let settings = DaemonSettings::default();
        assert_eq!(settings.username, "Skyport");
        assert_eq!(settings.health_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_remote_unavailable() {
        let client = DaemonClient::new(DaemonSettings {
            health_timeout: Duration::from_secs(2),
            ..DaemonSettings::default()
        })
        .unwrap();

        // Port 1 on loopback is closed on any sane test host.
        let err = client.probe(&node("127.0.0.1", 1)).await.unwrap_err();
        assert!(matches!(err, Error::RemoteUnavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_connect_stream_unreachable() {
        let client = DaemonClient::new(DaemonSettings::default()).unwrap();
        let result = client
            .connect_stream(&node("127.0.0.1", 1), StreamKind::Exec, "c0ffee", None)
            .await;
        assert!(matches!(result, Err(Error::RemoteUnavailable(_))));
    }

    /// One-shot HTTP daemon answering with a canned response.
    async fn stub_daemon(status_line: &'static str, body: &'static str) -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            // Drain headers and the declared body before answering.
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            if name.eq_ignore_ascii_case("content-length") {
                                value.trim().parse::<usize>().ok()
                            } else {
                                None
                            }
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        addr
    }

    fn payload() -> ProvisionPayload {
        let spec = DeploySpec {
            name: "survival".into(),
            image: "ghcr.io/powerport/paper:latest".into(),
            image_name: None,
            memory: 1024,
            cpu: 100,
            disk: None,
            ports: "25565:25565".into(),
            primary: "25565".into(),
            variables: Default::default(),
        };
        ProvisionPayload::build("ab12cd34", &spec, None).unwrap()
    }

    #[tokio::test]
    async fn test_create_instance_reads_created_body() {
        let addr = stub_daemon(
            "HTTP/1.1 201 Created",
            r#"{"containerId": "c0ffee", "volumeId": "vol-1", "Env": [], "state": "running"}"#,
        )
        .await;
        let client = DaemonClient::new(DaemonSettings::default()).unwrap();

        let created = client
            .create_instance(&node("127.0.0.1", addr.port()), &payload())
            .await
            .unwrap();
        assert_eq!(created.container_id, "c0ffee");
        assert_eq!(created.volume_id.as_deref(), Some("vol-1"));
    }

    #[tokio::test]
    async fn test_created_with_unusable_body_is_server_error() {
        let addr = stub_daemon("HTTP/1.1 201 Created", "{}").await;
        let client = DaemonClient::new(DaemonSettings::default()).unwrap();

        let err = client
            .create_instance(&node("127.0.0.1", addr.port()), &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteMalformed(_)), "got {err:?}");
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_rejected_create_keeps_daemon_status_and_body() {
        let addr = stub_daemon("HTTP/1.1 422 Unprocessable Entity", r#"{"error": "image pull failed"}"#).await;
        let client = DaemonClient::new(DaemonSettings::default()).unwrap();

        let err = client
            .create_instance(&node("127.0.0.1", addr.port()), &payload())
            .await
            .unwrap_err();
        match err {
            Error::RemoteRejected { status, body } => {
                assert_eq!(status, 422);
                assert_eq!(body["error"], "image pull failed");
            }
            other => panic!("expected RemoteRejected, got {other:?}"),
        }
    }
}
