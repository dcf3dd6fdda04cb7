//! Circuit persistence boundary.
//!
//! The durable engine is an external collaborator; this module defines
//! the persisted record shape and a JSON-file store used by the daemon.
//! Saves are whole-collection read-modify-write, serialized behind a
//! mutex so concurrent circuit saves cannot lose updates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

use chrono::{DateTime, Utc};
use eline_types::Tag;

use crate::error::{EvcError, EvcResult};
use crate::scheduler::CircuitSchedule;

/// Timestamp format of persisted dates.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Serde adapter for mandatory persisted dates.
pub mod date_format {
    use super::DATE_FORMAT;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(DATE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let value = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&value, DATE_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional persisted dates.
pub mod date_format_opt {
    use super::DATE_FORMAT;
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        date: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => serializer.serialize_str(&date.format(DATE_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        value
            .map(|value| {
                NaiveDateTime::parse_from_str(&value, DATE_FORMAT)
                    .map(|naive| naive.and_utc())
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

/// Persisted form of a UNI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniRecord {
    /// Full interface id.
    pub interface_id: String,
    /// User tag, if tagged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<Tag>,
}

/// Persisted form of a link: its endpoint pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Endpoint A interface id.
    pub endpoint_a: String,
    /// Endpoint B interface id.
    pub endpoint_b: String,
}

/// Persisted form of a circuit: one record per circuit id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvcRecord {
    /// Circuit id.
    pub id: String,
    /// Circuit name.
    pub name: String,
    /// Endpoint A.
    pub uni_a: UniRecord,
    /// Endpoint Z.
    pub uni_z: UniRecord,
    /// Registration date.
    #[serde(with = "date_format")]
    pub start_date: DateTime<Utc>,
    /// Final date, if bounded.
    #[serde(default, with = "date_format_opt", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Requested bandwidth.
    pub bandwidth: u64,
    /// Requested primary constituent links.
    pub primary_links: Vec<LinkRecord>,
    /// Requested backup constituent links.
    pub backup_links: Vec<LinkRecord>,
    /// Path installed at save time.
    pub current_path: Vec<LinkRecord>,
    /// Primary path.
    pub primary_path: Vec<LinkRecord>,
    /// Backup path.
    pub backup_path: Vec<LinkRecord>,
    /// Dynamic-discovery opt-in.
    pub dynamic_backup_path: bool,
    /// Activation time.
    #[serde(with = "date_format")]
    pub creation_time: DateTime<Utc>,
    /// When the user request arrived.
    #[serde(with = "date_format")]
    pub request_time: DateTime<Utc>,
    /// Circuit owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// Service priority.
    pub priority: i32,
    /// Administrative state.
    pub enabled: bool,
    /// Operational state.
    pub active: bool,
    /// Schedule entries.
    #[serde(default)]
    pub circuit_scheduler: Vec<CircuitSchedule>,
}

/// Boundary for the durable circuit store.
pub trait CircuitStore: Send + Sync {
    /// Saves (inserts or replaces) one circuit record.
    fn save(&self, record: &EvcRecord) -> EvcResult<()>;

    /// Deletes one circuit record.
    fn delete(&self, circuit_id: &str) -> EvcResult<()>;

    /// Returns one circuit record, if stored.
    fn get(&self, circuit_id: &str) -> EvcResult<Option<EvcRecord>>;

    /// Returns every stored record.
    fn load_all(&self) -> EvcResult<Vec<EvcRecord>>;
}

/// In-memory store for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    circuits: Mutex<BTreeMap<String, EvcRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CircuitStore for MemoryStore {
    fn save(&self, record: &EvcRecord) -> EvcResult<()> {
        self.circuits
            .lock()
            .expect("store lock poisoned")
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, circuit_id: &str) -> EvcResult<()> {
        self.circuits
            .lock()
            .expect("store lock poisoned")
            .remove(circuit_id);
        Ok(())
    }

    fn get(&self, circuit_id: &str) -> EvcResult<Option<EvcRecord>> {
        Ok(self
            .circuits
            .lock()
            .expect("store lock poisoned")
            .get(circuit_id)
            .cloned())
    }

    fn load_all(&self) -> EvcResult<Vec<EvcRecord>> {
        Ok(self
            .circuits
            .lock()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect())
    }
}

/// JSON-file store: the whole collection lives in one file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    circuits: Mutex<BTreeMap<String, EvcRecord>>,
}

impl JsonFileStore {
    /// Opens a store, loading any existing collection from disk.
    pub fn open(path: impl Into<PathBuf>) -> EvcResult<Self> {
        let path = path.into();
        let circuits = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| EvcError::storage("read", e.to_string()))?;
            serde_json::from_str(&contents)
                .map_err(|e| EvcError::storage("parse", e.to_string()))?
        } else {
            BTreeMap::new()
        };

        info!(
            "Opened circuit store at {} with {} circuits",
            path.display(),
            circuits.len()
        );
        Ok(Self {
            path,
            circuits: Mutex::new(circuits),
        })
    }

    fn persist(&self, circuits: &BTreeMap<String, EvcRecord>) -> EvcResult<()> {
        let contents = serde_json::to_string_pretty(circuits)
            .map_err(|e| EvcError::storage("serialize", e.to_string()))?;
        std::fs::write(&self.path, contents)
            .map_err(|e| EvcError::storage("write", e.to_string()))?;
        debug!("Persisted {} circuits", circuits.len());
        Ok(())
    }
}

impl CircuitStore for JsonFileStore {
    fn save(&self, record: &EvcRecord) -> EvcResult<()> {
        let mut circuits = self.circuits.lock().expect("store lock poisoned");
        circuits.insert(record.id.clone(), record.clone());
        self.persist(&circuits)
    }

    fn delete(&self, circuit_id: &str) -> EvcResult<()> {
        let mut circuits = self.circuits.lock().expect("store lock poisoned");
        circuits.remove(circuit_id);
        self.persist(&circuits)
    }

    fn get(&self, circuit_id: &str) -> EvcResult<Option<EvcRecord>> {
        Ok(self
            .circuits
            .lock()
            .expect("store lock poisoned")
            .get(circuit_id)
            .cloned())
    }

    fn load_all(&self) -> EvcResult<Vec<EvcRecord>> {
        Ok(self
            .circuits
            .lock()
            .expect("store lock poisoned")
            .values()
            .cloned()
            .collect())
    }
}
