//! Registry configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tunables for the registry and its linkers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Deepest layout subtree a link mutation will walk before refusing.
    pub max_layout_depth: usize,
    /// Buffer size of the broadcast channel used by `BroadcastNotifier`.
    pub event_channel_capacity: usize,
    /// Where the registry snapshot is persisted, relative to the working root.
    pub snapshot_path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_layout_depth: 64,
            event_channel_capacity: 256,
            snapshot_path: crate::persist::registry_path(Path::new(".")),
        }
    }
}

impl RegistryConfig {
    /// Read a TOML config file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: RegistryConfig = toml::from_str(&text)?;
        tracing::debug!("Loaded registry config from {}", path.display());
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => Self::load(p),
            Some(p) => {
                tracing::warn!("Config file {} not found, using defaults", p.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: RegistryConfig = toml::from_str("max_layout_depth = 8").unwrap();
        assert_eq!(config.max_layout_depth, 8);
        assert_eq!(config.event_channel_capacity, 256);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("schemalink.toml");
        std::fs::write(&path, "event_channel_capacity = 16\nsnapshot_path = \"reg.json\"\n").unwrap();

        let config = RegistryConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.event_channel_capacity, 16);
        assert_eq!(config.snapshot_path, PathBuf::from("reg.json"));

        let missing = RegistryConfig::load_or_default(Some(&dir.path().join("nope.toml"))).unwrap();
        assert_eq!(missing, RegistryConfig::default());
    }
}
