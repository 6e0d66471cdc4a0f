//! Shared data model for PowerPort.
//!
//! Field names follow the persisted JSON layout: users and nodes are
//! camelCase, instances and catalog images are PascalCase.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

// ─────────────────────────────────────────────────────────────────────────────
// Users
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: String,
    #[serde(rename = "password")]
    pub password_hash: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub access_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// User as exposed on the API (no password hash)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub admin: bool,
    pub access_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            admin: user.admin,
            access_to: user.access_to.clone(),
            created_at: user.created_at.clone(),
            updated_at: user.updated_at.clone(),
        }
    }
}

/// API key record stored under the `apiKeys` list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Nodes
// ─────────────────────────────────────────────────────────────────────────────

/// Last known reachability of a node's daemon.
///
/// Only ever changed by an explicit health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Unconfigured,
    Online,
    Offline,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Unconfigured => write!(f, "Unconfigured"),
            NodeStatus::Online => write!(f, "Online"),
            NodeStatus::Offline => write!(f, "Offline"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Value,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub ram: u64,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub disk: u64,
    #[serde(default)]
    pub processor: String,
    pub address: String,
    #[serde(deserialize_with = "lenient_u16")]
    pub port: u16,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub configure_key: Option<String>,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl Node {
    /// `address:port` of the node's daemon
    pub fn authority(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Body returned by a daemon's root endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub version_family: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub version_release: Option<String>,
    #[serde(default)]
    pub online: Option<bool>,
    #[serde(default)]
    pub remote: Option<Value>,
    #[serde(default)]
    pub docker: Option<Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Instances
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Snapshot of the node at deploy time
    pub node: Node,
    pub user: String,
    pub container_id: String,
    pub volume_id: String,
    pub memory: u64,
    pub cpu: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<u64>,
    pub ports: String,
    pub primary: String,
    pub image: String,
    #[serde(default)]
    pub alt_images: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub env: Value,
    #[serde(default)]
    pub state: Value,
    #[serde(rename = "suspended", default)]
    pub suspended: bool,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Daemon response body for a successful `POST /instances/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedContainer {
    #[serde(rename = "containerId")]
    pub container_id: String,
    #[serde(rename = "volumeId", default)]
    pub volume_id: Option<String>,
    #[serde(rename = "Env", default)]
    pub env: Value,
    #[serde(default)]
    pub state: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Image catalog
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Image {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub env: Value,
    #[serde(default)]
    pub scripts: Value,
    #[serde(default)]
    pub alt_images: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_command: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Panel identity
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PanelInfo {
    #[serde(rename = "PowerPortID")]
    pub powerport_id: String,
    #[serde(rename = "setupTime")]
    pub setup_time: i64,
    #[serde(rename = "originalVersion")]
    pub original_version: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Lenient numeric fields
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts `4096`, `"4096"` or `4096.0`; form posts send numbers as strings.
pub fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        }
        _ => None,
    }
}

/// JavaScript-style truthiness used for "required field" checks: absent,
/// `null`, `false`, `0` and `""` all count as missing.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(0);
    }
    parse_u64(&value).ok_or_else(|| serde::de::Error::custom(format!("expected integer, got {value}")))
}

fn lenient_u16<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let value = Value::deserialize(deserializer)?;
    parse_u64(&value)
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("expected port number, got {value}")))
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
