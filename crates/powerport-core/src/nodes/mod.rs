//! Node registry and health checks.
//!
//! A node's `status` is a cache: it changes only when [`NodeRegistry::check`]
//! probes the daemon. Probes never touch instance records.

use crate::daemon::DaemonApi;
use crate::error::{Error, Result};
use crate::store::{keys, Store};
use crate::types::{is_truthy, parse_u64, Instance, Node, NodeStatus};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Node creation request, as posted by the panel.
///
/// Every field is required; values are kept loose so that form posts with
/// numeric strings are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewNode {
    pub name: Option<Value>,
    pub tags: Option<Value>,
    pub ram: Option<Value>,
    pub disk: Option<Value>,
    pub processor: Option<Value>,
    pub address: Option<Value>,
    pub port: Option<Value>,
}

impl NewNode {
    fn validate(&self) -> Result<()> {
        let required = [
            &self.name,
            &self.tags,
            &self.ram,
            &self.disk,
            &self.processor,
            &self.address,
            &self.port,
        ];
        if required.iter().all(|v| is_truthy(v.as_ref())) {
            Ok(())
        } else {
            Err(Error::validation("Missing required parameters"))
        }
    }
}

pub struct NodeRegistry {
    store: Store,
    daemon: Arc<dyn DaemonApi>,
}

impl NodeRegistry {
    pub fn new(store: Store, daemon: Arc<dyn DaemonApi>) -> Self {
        Self { store, daemon }
    }

    /// Register a node and probe it once.
    pub async fn create(&self, spec: NewNode) -> Result<Node> {
        spec.validate()?;

        let port = spec
            .port
            .as_ref()
            .and_then(parse_u64)
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| Error::validation("Invalid port"))?;

        let node = Node {
            id: uuid::Uuid::new_v4().to_string(),
            name: text(spec.name.as_ref()),
            tags: spec.tags.clone().unwrap_or(Value::Null),
            ram: spec.ram.as_ref().and_then(parse_u64).unwrap_or(0),
            disk: spec.disk.as_ref().and_then(parse_u64).unwrap_or(0),
            processor: text(spec.processor.as_ref()),
            address: text(spec.address.as_ref()),
            port,
            api_key: None,
            configure_key: Some(uuid::Uuid::new_v4().to_string()),
            status: NodeStatus::Unconfigured,
            version_family: None,
            version_release: None,
            remote: None,
            docker: None,
            last_checked: None,
            last_error: None,
            created_at: Some(now()),
        };

        self.store.set(&keys::node(&node.id), &node).await?;
        let node = self.check_node(node).await?;

        let id = node.id.clone();
        self.store
            .update::<Vec<String>, _, _>(keys::NODES, move |ids| {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            })
            .await?;

        info!(node_id = %node.id, status = %node.status, "Node created");
        Ok(node)
    }

    pub fn get(&self, id: &str) -> Result<Node> {
        self.store
            .get(&keys::node(id))?
            .ok_or_else(|| Error::not_found("Node"))
    }

    /// All registered nodes, in registration order
    pub fn list(&self) -> Result<Vec<Node>> {
        let ids: Vec<String> = self.store.get_list(keys::NODES)?;
        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get::<Node>(&keys::node(&id))? {
                Some(node) => nodes.push(node),
                None => warn!(node_id = %id, "Node listed but record missing"),
            }
        }
        Ok(nodes)
    }

    /// Remove a node.
    ///
    /// Refused while any instance still lives on the node.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let node = self.get(id)?;

        let instances: Vec<Instance> = self.store.get_list(keys::INSTANCES)?;
        let hosted = instances.iter().filter(|i| i.node.id == node.id).count();
        if hosted > 0 {
            return Err(Error::Conflict(format!(
                "Node still hosts {} instance(s); delete them first",
                hosted
            )));
        }

        self.store
            .update::<Vec<String>, _, _>(keys::NODES, |ids| ids.retain(|n| n != id))
            .await?;
        self.store.delete(&keys::node(id)).await?;

        info!(node_id = %id, "Node deleted");
        Ok(())
    }

    /// Issue a fresh configure key, invalidating the previous one.
    pub async fn rotate_configure_key(&self, id: &str) -> Result<Node> {
        let key = uuid::Uuid::new_v4().to_string();
        self.store
            .update_existing::<Node, _, _>(&keys::node(id), move |node| {
                node.configure_key = Some(key);
                node.clone()
            })
            .await?
            .ok_or_else(|| Error::not_found("Node"))
    }

    /// Command an operator runs on the daemon host to bind it to this node.
    pub async fn configure_command(&self, id: &str, panel_url: &str) -> Result<String> {
        let node = self.rotate_configure_key(id).await?;
        let key = node.configure_key.unwrap_or_default();
        Ok(format!(
            "cd /etc/skyport && npm run configure -- --panel {} --key {}",
            panel_url.trim_end_matches('/'),
            key
        ))
    }

    /// Bind a daemon to the node holding `configure_key`: store the daemon's
    /// access key, consume the configure key and probe the node.
    pub async fn bind_daemon(&self, configure_key: &str, api_key: &str) -> Result<Node> {
        if configure_key.is_empty() || api_key.is_empty() {
            return Err(Error::validation("Missing configureKey or authKey"));
        }

        let node = self
            .list()?
            .into_iter()
            .find(|n| n.configure_key.as_deref() == Some(configure_key))
            .ok_or_else(|| Error::Unauthorized("Invalid configure key".into()))?;

        let api_key = api_key.to_string();
        let expected = configure_key.to_string();
        let bound = self
            .store
            .update_existing::<Node, _, _>(&keys::node(&node.id), move |node| {
                // Lost a race with a rotation or another bind.
                if node.configure_key.as_deref() != Some(expected.as_str()) {
                    return None;
                }
                node.api_key = Some(api_key);
                node.configure_key = None;
                Some(node.clone())
            })
            .await?
            .flatten()
            .ok_or_else(|| Error::Unauthorized("Invalid configure key".into()))?;

        info!(node_id = %bound.id, "Daemon bound to node");
        self.check_node(bound).await
    }

    /// Probe a node by id and persist the outcome.
    pub async fn check(&self, id: &str) -> Result<Node> {
        let node = self.get(id)?;
        self.check_node(node).await
    }

    /// Probe every registered node. Returns the refreshed records.
    pub async fn check_all(&self) -> Result<Vec<Node>> {
        let mut refreshed = Vec::new();
        for node in self.list()? {
            refreshed.push(self.check_node(node).await?);
        }
        Ok(refreshed)
    }

    /// Probe `node` and write the result to its record.
    ///
    /// The probe runs without holding any store lock; only the final write
    /// is serialized. A node deleted while the probe was in flight stays
    /// deleted.
    async fn check_node(&self, node: Node) -> Result<Node> {
        let outcome = self.daemon.probe(&node).await;
        let checked_at = now();

        let apply = move |record: &mut Node| {
            match &outcome {
                Ok(info) => {
                    record.status = NodeStatus::Online;
                    record.version_family = info.version_family.clone();
                    record.version_release = info.version_release.clone();
                    record.remote = info.remote.clone();
                    record.docker = info.docker.clone();
                    record.last_error = None;
                }
                Err(e) => {
                    record.status = NodeStatus::Offline;
                    record.last_error = Some(probe_error_message(e));
                }
            }
            record.last_checked = Some(checked_at.clone());
        };

        let mut snapshot = node.clone();
        match self
            .store
            .update_existing::<Node, _, _>(&keys::node(&node.id), |record| {
                apply(record);
                record.clone()
            })
            .await?
        {
            Some(updated) => {
                debug!(node_id = %updated.id, status = %updated.status, "Health check complete");
                Ok(updated)
            }
            None => {
                apply(&mut snapshot);
                Ok(snapshot)
            }
        }
    }
}

fn probe_error_message(err: &Error) -> String {
    let message = match err {
        Error::RemoteUnavailable(m) => m.clone(),
        other => other.to_string(),
    };
    if message.is_empty() {
        "Daemon unreachable".to_string()
    } else {
        message
    }
}

fn text(value: Option<&Value>) -> String {
    value.map(crate::daemon::payload::scalar_to_string).unwrap_or_default()
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
