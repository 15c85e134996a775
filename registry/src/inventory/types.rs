//! Types shared by the per-kind managers.

use indexmap::IndexMap;
pub use rmcp::model::JsonObject;
use tracing::warn;

use crate::{
    core::config::DuplicatePolicy,
    error::{CapabilityKind, RegistryError, RegistryResult},
};

/// Validates and coerces a raw argument map against a capability's schema
/// before it reaches the handler.
pub trait ArgumentValidator: Send + Sync {
    fn validate(&self, schema: &JsonObject, arguments: JsonObject) -> Result<JsonObject, String>;
}

/// Accepts every argument map unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughValidator;

impl ArgumentValidator for PassthroughValidator {
    fn validate(&self, _schema: &JsonObject, arguments: JsonObject) -> Result<JsonObject, String> {
        Ok(arguments)
    }
}

/// Insert `entry` under `key`, resolving collisions with `policy`.
///
/// Returns the entry that ends up stored under `key`.
pub(crate) fn insert_with_policy<T: Clone>(
    map: &mut IndexMap<String, T>,
    kind: CapabilityKind,
    key: String,
    entry: T,
    policy: DuplicatePolicy,
) -> RegistryResult<T> {
    if let Some(existing) = map.get_mut(&key) {
        match policy {
            DuplicatePolicy::Warn => {
                warn!("{} already exists: {}", kind, key);
                return Ok(existing.clone());
            }
            DuplicatePolicy::Ignore => return Ok(existing.clone()),
            DuplicatePolicy::Error => return Err(RegistryError::Duplicate { kind, key }),
            DuplicatePolicy::Replace => {
                *existing = entry.clone();
                return Ok(entry);
            }
        }
    }
    map.insert(key, entry.clone());
    Ok(entry)
}
