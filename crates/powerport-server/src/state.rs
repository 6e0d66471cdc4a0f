//! Application state.

use powerport_core::{
    DaemonApi, DaemonClient, InstanceOrchestrator, NodeRegistry, Store, StreamGateway,
    UserDirectory,
};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// State store shared by every service
    pub store: Store,
    pub users: UserDirectory,
    pub nodes: NodeRegistry,
    pub instances: InstanceOrchestrator,
    /// Exec/stats session admission and relaying
    pub streams: StreamGateway,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state talking to real daemons
    pub fn new(config: Config, store: Store) -> anyhow::Result<Arc<Self>> {
        let client = DaemonClient::new(config.daemon_settings())?;
        Ok(Self::with_daemon(config, store, client.clone(), Arc::new(client)))
    }

    /// Create application state with an explicit daemon transport for the
    /// registry and orchestrator.
    pub fn with_daemon(
        config: Config,
        store: Store,
        stream_client: DaemonClient,
        daemon: Arc<dyn DaemonApi>,
    ) -> Arc<Self> {
        let instances = InstanceOrchestrator::new(store.clone(), Arc::clone(&daemon))
            .with_suspend_scope(config.suspend_scope());

        Arc::new(Self {
            users: UserDirectory::new(store.clone()),
            nodes: NodeRegistry::new(store.clone(), daemon),
            instances,
            streams: StreamGateway::new(store.clone(), stream_client, config.max_stream_sessions),
            config: Arc::new(config),
            store,
            start_time: Instant::now(),
        })
    }
}
