//! powerport-core - Core library for the PowerPort panel
//!
//! This crate holds everything the panel server needs apart from HTTP wiring:
//!
//! - **store**: key-value State Store with per-key serialized updates
//! - **daemon**: authenticated HTTP/WebSocket client for node daemons
//! - **nodes**: Node Registry and health checks
//! - **orchestrator**: instance deploy/suspend/delete across the three views
//! - **bridge**: duplex relay for the exec and stats streams
//! - **users**: panel user directory
//! - **auth**: API keys, password hashes, instance access predicate

pub mod auth;
pub mod bridge;
pub mod daemon;
pub mod error;
pub mod nodes;
pub mod orchestrator;
pub mod panel;
pub mod store;
pub mod types;
pub mod users;

// Re-export commonly used types
pub use bridge::StreamGateway;
pub use daemon::{DaemonApi, DaemonClient, DaemonSettings, StreamKind};
pub use error::{Error, Result};
pub use nodes::{NewNode, NodeRegistry};
pub use orchestrator::{DeployRequest, InstanceOrchestrator, SuspendScope};
pub use store::{SqliteKv, Store};
pub use users::UserDirectory;
