//! Credentials for PowerPort.
//!
//! Covers:
//! - API keys (clients of the `/api/v1` surface)
//! - Password hashes for panel users
//! - The instance access predicate used by the stream endpoints

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::store::{keys, Store};
use crate::types::{ApiKey, Instance, User};
use rand::RngCore;

/// Random 256-bit secret, hex encoded
pub fn generate_key() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// bcrypt work factor for panel user passwords
pub const PASSWORD_COST: u32 = 10;

/// bcrypt hash of `password`, computed off the async runtime.
pub async fn hash_password(password: &str) -> Result<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, PASSWORD_COST))
        .await
        .map_err(|e| Error::Other(format!("Password hashing task failed: {e}")))?
        .map_err(|e| Error::Other(format!("Password hashing failed: {e}")))
}

/// Malformed stored hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    bcrypt::verify(password, stored).unwrap_or(false)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Look up `candidate` in the `apiKeys` list.
pub fn validate_api_key(store: &Store, candidate: &str) -> Result<ApiKey> {
    if candidate.is_empty() {
        return Err(Error::Unauthorized("API key is required".into()));
    }
    store
        .get_list::<ApiKey>(keys::API_KEYS)?
        .into_iter()
        .find(|k| constant_time_eq(k.key.as_bytes(), candidate.as_bytes()))
        .ok_or_else(|| Error::Unauthorized("Invalid API key".into()))
}

/// Append a freshly generated key to the `apiKeys` list.
pub async fn issue_api_key(store: &Store, name: &str) -> Result<ApiKey> {
    let key = ApiKey {
        key: generate_key(),
        name: Some(name.to_string()),
        created_at: Some(chrono::Utc::now().to_rfc3339()),
    };
    let issued = key.clone();
    store
        .update::<Vec<ApiKey>, _, _>(keys::API_KEYS, move |list| list.push(key))
        .await?;
    Ok(issued)
}

/// Issue a first key when none exist and write it to `path` (mode 0600).
///
/// Returns `None` when the store already holds keys; the file is left alone.
pub async fn bootstrap_api_key(store: &Store, path: &Path) -> Result<Option<ApiKey>> {
    if !store.get_list::<ApiKey>(keys::API_KEYS)?.is_empty() {
        return Ok(None);
    }
    let key = issue_api_key(store, "bootstrap").await?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &key.key)?;
    fs::set_permissions(path, Permissions::from_mode(0o600))?;
    Ok(Some(key))
}

/// Admins, the owner and users whose `accessTo` names the instance are allowed.
pub fn is_user_authorized_for_instance(user: &User, instance: &Instance) -> bool {
    user.admin || user.user_id == instance.user || user.access_to.iter().any(|id| *id == instance.id)
}
