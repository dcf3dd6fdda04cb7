//! Daemon settings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{EvcError, EvcResult};

/// Default base URL of the path-computation service.
pub const DEFAULT_PATHFINDER_URL: &str = "http://localhost:8181/api/pathfinder/v2";

/// Default base URL of the flow-manager service.
pub const DEFAULT_FLOW_MANAGER_URL: &str = "http://localhost:8181/api/flow_manager/v2";

/// Default dispatch-loop period in seconds.
pub const DEFAULT_DISPATCH_PERIOD_SECS: u64 = 1;

/// Runtime settings for the EVC manager daemon.
///
/// The VLAN pool override restricts the service-tag pool of the links
/// attached to a given port. Keys are switch dpids mapping port numbers
/// to the explicit set of usable VLAN values on that port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base URL of the path-computation service.
    pub pathfinder_url: String,

    /// Base URL of the flow-manager service.
    pub flow_manager_url: String,

    /// Dispatch-loop period in seconds.
    pub dispatch_period_secs: u64,

    /// Path of the circuit store file.
    pub store_path: String,

    /// Per-port VLAN pool override: dpid -> port -> usable values.
    pub vlan_pool_override: HashMap<String, HashMap<u32, Vec<u16>>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            pathfinder_url: DEFAULT_PATHFINDER_URL.to_string(),
            flow_manager_url: DEFAULT_FLOW_MANAGER_URL.to_string(),
            dispatch_period_secs: DEFAULT_DISPATCH_PERIOD_SECS,
            store_path: "circuits.json".to_string(),
            vlan_pool_override: HashMap::new(),
        }
    }
}

impl Settings {
    /// Loads settings from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> EvcResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| EvcError::storage("read settings", e.to_string()))?;
        serde_json::from_str(&contents)
            .map_err(|e| EvcError::storage("parse settings", e.to_string()))
    }

    /// Returns the VLAN pool override for one port, if configured.
    pub fn pool_for_port(&self, dpid: &str, port: u32) -> Option<&Vec<u16>> {
        self.vlan_pool_override.get(dpid)?.get(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.pathfinder_url, DEFAULT_PATHFINDER_URL);
        assert_eq!(settings.flow_manager_url, DEFAULT_FLOW_MANAGER_URL);
        assert_eq!(settings.dispatch_period_secs, 1);
        assert!(settings.vlan_pool_override.is_empty());
    }

    #[test]
    fn test_pool_for_port() {
        let mut settings = Settings::default();
        settings
            .vlan_pool_override
            .entry("00:00:00:00:00:00:00:01".to_string())
            .or_default()
            .insert(1, vec![101, 102, 103]);

        assert_eq!(
            settings.pool_for_port("00:00:00:00:00:00:00:01", 1),
            Some(&vec![101, 102, 103])
        );
        assert_eq!(settings.pool_for_port("00:00:00:00:00:00:00:01", 2), None);
        assert_eq!(settings.pool_for_port("00:00:00:00:00:00:00:02", 1), None);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let settings = Settings::load("does-not-exist.json").unwrap();
        assert_eq!(settings.pathfinder_url, DEFAULT_PATHFINDER_URL);
    }

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::default();
        settings.pathfinder_url = "http://controller:8181/pathfinder".to_string();
        std::fs::write(&path, serde_json::to_string(&settings).unwrap()).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.pathfinder_url, "http://controller:8181/pathfinder");
    }
}
