//! NodePoller - periodic node health checks
//!
//! Re-runs the registry health check for every node on a fixed interval.
//! Checks never touch instance state; they only refresh each node's cached
//! `status`, `lastChecked` and `lastError`.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::state::AppState;

/// NodePoller owns the background polling task
pub struct NodePoller {
    state: Arc<AppState>,
    handle: Mutex<Option<tokio::task::AbortHandle>>,
}

impl NodePoller {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            handle: Mutex::new(None),
        }
    }

    /// Start polling every `every`, replacing any running poll.
    pub async fn start(&self, every: Duration) {
        let mut handle = self.handle.lock().await;
        if let Some(existing) = handle.take() {
            existing.abort();
        }

        info!(interval_secs = every.as_secs(), "Starting node health polling");

        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                match state.nodes.check_all().await {
                    Ok(nodes) => {
                        let offline = nodes
                            .iter()
                            .filter(|n| n.status == powerport_core::types::NodeStatus::Offline)
                            .count();
                        debug!(checked = nodes.len(), offline, "Node health poll complete");
                    }
                    Err(e) => {
                        error!(error = %e, "Node health poll failed");
                    }
                }
            }
        });

        *handle = Some(task.abort_handle());
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
            info!("Stopped node health polling");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use powerport_core::Store;

    #[tokio::test]
    async fn test_start_and_stop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = Config::with_dir(temp_dir.path().to_path_buf());
        let state = AppState::new(config, Store::in_memory()).unwrap();
        let poller = NodePoller::new(state);

        assert!(!poller.is_running().await);
        poller.start(Duration::from_secs(3600)).await;
        assert!(poller.is_running().await);

        poller.stop().await;
        assert!(!poller.is_running().await);
    }
}
