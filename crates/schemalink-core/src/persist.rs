//! Registry persistence as a JSON snapshot

use crate::store::RegistryState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Registry directory: .schemalink/
pub const REGISTRY_DIR: &str = ".schemalink";

/// Registry snapshot file
pub const REGISTRY_FILE: &str = "registry.json";

/// Get registry snapshot path under a root
pub fn registry_path(root: &Path) -> PathBuf {
    root.join(REGISTRY_DIR).join(REGISTRY_FILE)
}

/// On-disk envelope around the registry tables.
#[derive(Debug, Serialize, Deserialize)]
struct SavedRegistry {
    format_version: String,
    saved_at: chrono::DateTime<chrono::Utc>,
    state: RegistryState,
}

/// Write the whole registry to `path`, creating parent directories.
pub fn save_registry(state: &RegistryState, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let saved = SavedRegistry {
        format_version: env!("CARGO_PKG_VERSION").to_string(),
        saved_at: chrono::Utc::now(),
        state: state.clone(),
    };

    let json_str = serde_json::to_string_pretty(&saved)?;
    std::fs::write(path, json_str)?;

    tracing::debug!("Registry saved: {}", path.display());
    Ok(())
}

/// Load the registry from `path`, or `None` if nothing was saved yet.
pub fn load_registry(path: &Path) -> anyhow::Result<Option<RegistryState>> {
    if !path.exists() {
        return Ok(None);
    }

    let json_str = std::fs::read_to_string(path)?;
    let saved: SavedRegistry = serde_json::from_str(&json_str)?;

    tracing::debug!(
        "Registry loaded from {} (saved {} by v{})",
        path.display(),
        saved.saved_at.to_rfc3339(),
        saved.format_version
    );
    Ok(Some(saved.state))
}

/// Remove a saved registry
pub fn clear_registry(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
