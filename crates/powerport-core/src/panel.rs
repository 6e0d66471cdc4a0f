//! Panel identity, written once on first start.

use crate::error::Result;
use crate::store::{keys, Store};
use crate::types::PanelInfo;
use serde_json::Value;
use tracing::{info, warn};

/// Load the panel record, creating it on first start.
pub async fn init(store: &Store, version: &str) -> Result<PanelInfo> {
    if let Some(existing) = store.get::<PanelInfo>(keys::PANEL)? {
        info!(panel_id = %existing.powerport_id, "Panel already initialized");
        return Ok(existing);
    }

    info!("First start of PowerPort, initializing panel");
    if store.get::<Value>(keys::IMAGES)?.is_none() {
        warn!("Image catalog is empty; deployments will fail until the `images` list is seeded");
    }

    let panel = PanelInfo {
        powerport_id: uuid::Uuid::new_v4().to_string(),
        setup_time: chrono::Utc::now().timestamp_millis(),
        original_version: version.to_string(),
    };
    store.set(keys::PANEL, &panel).await?;

    info!(panel_id = %panel.powerport_id, "Initialized PowerPort panel");
    Ok(panel)
}
