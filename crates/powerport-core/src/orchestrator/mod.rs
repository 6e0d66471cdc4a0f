//! Instance orchestration.
//!
//! Lifecycle: `Provisioning → Running ↔ Suspended → Deleting → (removed)`.
//! Nothing is written while provisioning: the three views are written only
//! after the daemon answers `201`, and removed only after it acknowledges
//! deletion. Suspension is panel-local and never contacts the daemon.

pub mod index;

pub use index::{Mutation, View, ALL_VIEWS};

use crate::daemon::{DaemonApi, DeploySpec, ProvisionPayload};
use crate::error::{Error, Result};
use crate::store::{keys, Store};
use crate::types::{is_truthy, parse_u64, Image, Instance, Node};
use crate::users::user_exists;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Which views suspend/unsuspend update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuspendScope {
    /// Record, global list and owner list stay in agreement
    #[default]
    AllViews,
    /// Record and global list only; the owner list keeps its old flag
    RecordAndGlobal,
}

impl SuspendScope {
    fn views(&self) -> &'static [View] {
        match self {
            SuspendScope::AllViews => &ALL_VIEWS,
            SuspendScope::RecordAndGlobal => &[View::Record, View::Global],
        }
    }
}

/// Deployment request as posted by the panel
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub user_id: Option<Value>,
    pub node_id: Option<Value>,
    pub name: Option<Value>,
    pub image: Option<Value>,
    #[serde(alias = "imagename")]
    pub image_name: Option<Value>,
    pub memory: Option<Value>,
    pub cpu: Option<Value>,
    pub disk: Option<Value>,
    pub ports: Option<Value>,
    pub primary: Option<Value>,
    pub variables: Option<Value>,
}

/// Deployment request with every required field present and typed
#[derive(Debug, Clone)]
pub struct ValidDeploy {
    pub user_id: String,
    pub node_id: String,
    pub spec: DeploySpec,
}

impl DeployRequest {
    pub fn validate(&self) -> Result<ValidDeploy> {
        let required = [
            &self.image,
            &self.memory,
            &self.cpu,
            &self.ports,
            &self.node_id,
            &self.name,
            &self.user_id,
            &self.primary,
        ];
        if !required.iter().all(|v| is_truthy(v.as_ref())) {
            return Err(Error::validation("Missing required parameters"));
        }

        let memory = integer(&self.memory, "memory")?;
        let cpu = integer(&self.cpu, "cpu")?;
        let disk = match self.disk.as_ref().filter(|d| !d.is_null()) {
            Some(d) => Some(parse_u64(d).ok_or_else(|| Error::validation("disk must be an integer"))?),
            None => None,
        };

        Ok(ValidDeploy {
            user_id: text(&self.user_id),
            node_id: text(&self.node_id),
            spec: DeploySpec {
                name: text(&self.name),
                image: text(&self.image),
                image_name: self
                    .image_name
                    .as_ref()
                    .filter(|v| is_truthy(Some(*v)))
                    .map(crate::daemon::payload::scalar_to_string),
                memory,
                cpu,
                disk,
                ports: text(&self.ports),
                primary: text(&self.primary),
                variables: variables(self.variables.as_ref())?,
            },
        })
    }
}

fn text(value: &Option<Value>) -> String {
    value
        .as_ref()
        .map(crate::daemon::payload::scalar_to_string)
        .unwrap_or_default()
}

fn integer(value: &Option<Value>, field: &str) -> Result<u64> {
    value
        .as_ref()
        .and_then(parse_u64)
        .ok_or_else(|| Error::validation(format!("{field} must be an integer")))
}

/// Variables arrive either as an object or as its JSON encoding.
fn variables(value: Option<&Value>) -> Result<BTreeMap<String, String>> {
    let object = match value {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(BTreeMap::new()),
        Some(Value::String(s)) => serde_json::from_str::<Value>(s)
            .map_err(|_| Error::validation("variables must be a JSON object"))?,
        Some(other) => other.clone(),
    };

    match object {
        Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), crate::daemon::payload::scalar_to_string(v)))
            .collect()),
        _ => Err(Error::validation("variables must be a JSON object")),
    }
}

pub struct InstanceOrchestrator {
    store: Store,
    daemon: Arc<dyn DaemonApi>,
    suspend_scope: SuspendScope,
}

impl InstanceOrchestrator {
    pub fn new(store: Store, daemon: Arc<dyn DaemonApi>) -> Self {
        Self {
            store,
            daemon,
            suspend_scope: SuspendScope::default(),
        }
    }

    pub fn with_suspend_scope(mut self, scope: SuspendScope) -> Self {
        self.suspend_scope = scope;
        self
    }

    /// Provision an instance on a node and record it.
    pub async fn deploy(&self, request: &DeployRequest) -> Result<Instance> {
        let ValidDeploy {
            user_id,
            node_id,
            spec,
        } = request.validate()?;

        if !user_exists(&self.store, &user_id)? {
            return Err(Error::not_found("User"));
        }
        let node: Node = self
            .store
            .get(&keys::node(&node_id))?
            .ok_or_else(|| Error::not_found("Node"))?;
        let image = match &spec.image_name {
            Some(name) => Some(self.find_image(name)?),
            None => None,
        };

        let id = self.allocate_id()?;
        let payload = ProvisionPayload::build(&id, &spec, image.as_ref())?;

        info!(instance_id = %id, node_id = %node.id, "Provisioning instance");
        let created = self.daemon.create_instance(&node, &payload).await.map_err(|e| {
            warn!(instance_id = %id, node_id = %node.id, error = %e, "Provisioning failed");
            e
        })?;

        let instance = Instance {
            volume_id: created.volume_id.clone().unwrap_or_else(|| id.clone()),
            id,
            name: spec.name,
            node,
            user: user_id,
            container_id: created.container_id,
            memory: spec.memory,
            cpu: spec.cpu,
            disk: spec.disk,
            ports: spec.ports,
            primary: spec.primary,
            image: spec.image,
            alt_images: payload.alt_images,
            stop_command: payload.stop_command,
            env: created.env,
            state: created.state,
            suspended: false,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        };

        index::apply(&self.store, &instance, &Mutation::Upsert, &ALL_VIEWS).await?;

        info!(
            instance_id = %instance.id,
            container_id = %instance.container_id,
            "Instance deployed"
        );
        Ok(instance)
    }

    pub fn get(&self, id: &str) -> Result<Instance> {
        self.store
            .get(&keys::instance(id))?
            .ok_or_else(|| Error::not_found("Instance"))
    }

    /// Global instance list
    pub fn list(&self) -> Result<Vec<Instance>> {
        self.store.get_list(keys::INSTANCES)
    }

    /// Instances owned by `user_id`
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Instance>> {
        if !user_exists(&self.store, user_id)? {
            return Err(Error::not_found("User"));
        }
        self.store.get_list(&keys::user_instances(user_id))
    }

    pub async fn suspend(&self, id: &str) -> Result<Instance> {
        self.set_suspended(id, true).await
    }

    pub async fn unsuspend(&self, id: &str) -> Result<Instance> {
        self.set_suspended(id, false).await
    }

    async fn set_suspended(&self, id: &str, suspended: bool) -> Result<Instance> {
        let mut instance = self.get(id)?;
        index::apply(
            &self.store,
            &instance,
            &Mutation::SetSuspended(suspended),
            self.suspend_scope.views(),
        )
        .await?;

        info!(instance_id = %id, suspended, "Instance suspension changed");
        instance.suspended = suspended;
        Ok(instance)
    }

    /// Delete on the daemon, then drop every view.
    ///
    /// A daemon failure leaves all views untouched.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let instance = self.get(id)?;
        // The snapshot may carry a stale API key if the daemon was rebound.
        let node = self
            .store
            .get::<Node>(&keys::node(&instance.node.id))?
            .unwrap_or_else(|| instance.node.clone());

        self.daemon
            .delete_instance(&node, &instance.container_id)
            .await
            .map_err(|e| {
                warn!(instance_id = %id, error = %e, "Daemon refused deletion");
                e
            })?;

        index::apply(&self.store, &instance, &Mutation::Remove, &ALL_VIEWS).await?;

        info!(instance_id = %id, container_id = %instance.container_id, "Instance deleted");
        Ok(())
    }

    fn find_image(&self, name: &str) -> Result<Image> {
        let images: Vec<Image> = self.store.get_list(keys::IMAGES)?;
        images
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::not_found("Image"))
    }

    /// Short panel-side id, independent of the daemon's container id.
    fn allocate_id(&self) -> Result<String> {
        for _ in 0..8 {
            let uuid = uuid::Uuid::new_v4().simple().to_string();
            let id = uuid[..8].to_string();
            if self.store.get::<Value>(&keys::instance(&id))?.is_none() {
                return Ok(id);
            }
        }
        Err(Error::Other("Could not allocate an instance id".into()))
    }
}
