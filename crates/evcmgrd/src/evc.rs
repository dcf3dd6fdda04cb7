//! The EVC aggregate: a point-to-point circuit between two UNIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use eline_types::{EntityStatus, Interface, Link, LinkRef, Path, Tag};

use crate::error::{EvcError, EvcResult};
use crate::scheduler::CircuitSchedule;
use crate::storage::{EvcRecord, LinkRecord, UniRecord};
use crate::topology::TopologyApi;

/// A User Network Interface: the circuit's attachment point plus the
/// optional user tag presented there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uni {
    /// The attachment interface.
    pub interface: Interface,
    /// The user (C) tag, absent for untagged attachment.
    pub user_tag: Option<Tag>,
}

impl Uni {
    /// Creates a UNI.
    pub fn new(interface: Interface, user_tag: Option<Tag>) -> Self {
        Self {
            interface,
            user_tag,
        }
    }

    /// Returns the user tag value, if tagged.
    pub fn user_tag_value(&self) -> Option<u16> {
        self.user_tag.map(|tag| tag.value)
    }

    /// Returns the persisted form.
    pub fn to_record(&self) -> UniRecord {
        UniRecord {
            interface_id: self.interface.id.clone(),
            tag: self.user_tag,
        }
    }
}

/// Parameters for creating a circuit.
///
/// `name`, `uni_a` and `uni_z` are mandatory; everything else has a
/// default. Missing mandatory fields fail `Evc::new`, not a later step.
#[derive(Debug, Default, Clone)]
pub struct EvcRequest {
    /// Circuit name.
    pub name: Option<String>,
    /// Endpoint A.
    pub uni_a: Option<Uni>,
    /// Endpoint Z.
    pub uni_z: Option<Uni>,
    /// Date the circuit was registered; defaults to now.
    pub start_date: Option<DateTime<Utc>>,
    /// Final date of the circuit, if bounded.
    pub end_date: Option<DateTime<Utc>>,
    /// Requested bandwidth.
    pub bandwidth: u64,
    /// Constituent links requested for the primary circuit.
    pub primary_links: Vec<LinkRef>,
    /// Constituent links requested for the backup circuit.
    pub backup_links: Vec<LinkRef>,
    /// Pre-computed primary path.
    pub primary_path: Vec<LinkRef>,
    /// Pre-computed backup path.
    pub backup_path: Vec<LinkRef>,
    /// Opt in to on-demand path discovery when neither static path is
    /// usable.
    pub dynamic_backup_path: bool,
    /// When the circuit should be activated; defaults to now.
    pub creation_time: Option<DateTime<Utc>>,
    /// Administrative state.
    pub enabled: bool,
    /// Operational state.
    pub active: bool,
    /// Circuit owner.
    pub owner: Option<String>,
    /// Service priority.
    pub priority: i32,
    /// Schedule entries for this circuit.
    pub circuit_scheduler: Vec<CircuitSchedule>,
    /// When the user request arrived; defaults to now.
    pub request_time: Option<DateTime<Utc>>,
}

/// Fields a circuit update may change.
///
/// `name`, `uni_a` and `uni_z` define circuit identity; a patch naming
/// any of them is rejected as a whole.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct EvcPatch {
    /// Rejected: identity field.
    pub name: Option<String>,
    /// Rejected: identity field.
    pub uni_a: Option<Uni>,
    /// Rejected: identity field.
    pub uni_z: Option<Uni>,
    /// New bandwidth.
    pub bandwidth: Option<u64>,
    /// New priority.
    pub priority: Option<i32>,
    /// New owner.
    pub owner: Option<String>,
    /// New start date.
    pub start_date: Option<DateTime<Utc>>,
    /// New end date.
    pub end_date: Option<DateTime<Utc>>,
    /// New activation time.
    pub creation_time: Option<DateTime<Utc>>,
    /// Toggle dynamic path discovery.
    pub dynamic_backup_path: Option<bool>,
    /// New administrative state.
    pub enabled: Option<bool>,
}

/// An Ethernet Virtual Connection.
///
/// Administrative state (`enabled`) and operational state (`active`)
/// are independent: a disabled circuit is never deployed even when a
/// path becomes available, and an enabled circuit becomes active only
/// once its rules are installed.
pub struct Evc {
    id: String,
    cookie: u64,
    name: String,
    uni_a: Uni,
    uni_z: Uni,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    bandwidth: u64,
    primary_links: Path,
    backup_links: Path,
    current_path: Path,
    primary_path: Path,
    backup_path: Path,
    dynamic_backup_path: bool,
    creation_time: DateTime<Utc>,
    owner: Option<String>,
    priority: i32,
    circuit_scheduler: Vec<CircuitSchedule>,
    enabled: bool,
    active: bool,
    request_time: DateTime<Utc>,
}

fn cookie_from_id(id: &str) -> EvcResult<u64> {
    let half = &id[id.len() / 2..];
    u64::from_str_radix(half, 16)
        .map_err(|_| EvcError::internal(format!("Circuit id '{}' is not hexadecimal", id)))
}

fn validate_uni(uni: &Uni, field: &str, topology: &dyn TopologyApi) -> EvcResult<()> {
    if let Some(tag) = uni.user_tag {
        if !topology.is_user_tag_available(&uni.interface.id, tag.value) {
            return Err(EvcError::validation(
                field,
                format!("VLAN tag {} is not available in {}", tag.value, field),
            ));
        }
    }
    Ok(())
}

impl Evc {
    /// Creates a circuit from a validated request.
    ///
    /// A missing name or UNI, or a UNI whose requested tag is already
    /// taken on its interface, fails the construction.
    pub fn new(request: EvcRequest, topology: &dyn TopologyApi) -> EvcResult<Self> {
        let name = match request.name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(EvcError::validation("name", "name is required")),
        };
        let uni_a = request
            .uni_a
            .ok_or_else(|| EvcError::validation("uni_a", "uni_a is required"))?;
        let uni_z = request
            .uni_z
            .ok_or_else(|| EvcError::validation("uni_z", "uni_z is required"))?;

        validate_uni(&uni_a, "uni_a", topology)?;
        validate_uni(&uni_z, "uni_z", topology)?;

        let id = Uuid::new_v4().simple().to_string();
        let cookie = cookie_from_id(&id)?;
        let now = Utc::now();

        Ok(Self {
            id,
            cookie,
            name,
            uni_a,
            uni_z,
            start_date: request.start_date.unwrap_or(now),
            end_date: request.end_date,
            bandwidth: request.bandwidth,
            primary_links: Path::new(request.primary_links),
            backup_links: Path::new(request.backup_links),
            current_path: Path::empty(),
            primary_path: Path::new(request.primary_path),
            backup_path: Path::new(request.backup_path),
            dynamic_backup_path: request.dynamic_backup_path,
            creation_time: request.creation_time.unwrap_or(now),
            owner: request.owner,
            priority: request.priority,
            circuit_scheduler: request.circuit_scheduler,
            enabled: request.enabled,
            active: request.active,
            request_time: request.request_time.unwrap_or(now),
        })
    }

    /// Returns the circuit id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the circuit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns endpoint A.
    pub fn uni_a(&self) -> &Uni {
        &self.uni_a
    }

    /// Returns endpoint Z.
    pub fn uni_z(&self) -> &Uni {
        &self.uni_z
    }

    /// Returns the cookie identifying this circuit's rules.
    ///
    /// Derived from the second half of the hex id so every rule of one
    /// circuit can be withdrawn as a set.
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Returns the requested bandwidth.
    pub fn bandwidth(&self) -> u64 {
        self.bandwidth
    }

    /// Returns the owner, if set.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    /// Returns the service priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns the activation time.
    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    /// Returns the registration date.
    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    /// Returns the final date, if bounded.
    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    /// Returns when the user request arrived.
    pub fn request_time(&self) -> DateTime<Utc> {
        self.request_time
    }

    /// Returns true if dynamic path discovery is enabled.
    pub fn dynamic_backup_path(&self) -> bool {
        self.dynamic_backup_path
    }

    /// Returns this circuit's schedule entries.
    pub fn circuit_scheduler(&self) -> &[CircuitSchedule] {
        &self.circuit_scheduler
    }

    /// Administrative state.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Operational state.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Sets the administrative state to enabled.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Sets the administrative state to disabled.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Marks the circuit operationally active.
    pub fn activate(&mut self) {
        self.active = true;
    }

    /// Marks the circuit operationally inactive.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Returns the path installed right now (empty if none).
    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// Returns the primary path.
    pub fn primary_path(&self) -> &Path {
        &self.primary_path
    }

    /// Returns the backup path.
    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Returns the requested primary constituent links.
    pub fn primary_links(&self) -> &Path {
        &self.primary_links
    }

    /// Returns the requested backup constituent links.
    pub fn backup_links(&self) -> &Path {
        &self.backup_links
    }

    /// Replaces the installed path.
    pub fn set_current_path(&mut self, path: Path) {
        self.current_path = path;
    }

    /// Replaces the primary path.
    pub fn set_primary_path(&mut self, path: Path) {
        self.primary_path = path;
    }

    /// Replaces the backup path.
    pub fn set_backup_path(&mut self, path: Path) {
        self.backup_path = path;
    }

    /// Replaces the requested primary constituent links.
    pub fn set_primary_links(&mut self, path: Path) {
        self.primary_links = path;
    }

    /// Returns true if the installed path is the primary path.
    pub fn is_using_primary_path(&self) -> bool {
        self.current_path == self.primary_path
    }

    /// Returns true if the installed path is the backup path.
    pub fn is_using_backup_path(&self) -> bool {
        self.current_path == self.backup_path
    }

    /// Returns true if the installed path is a discovered one and up.
    pub fn is_using_dynamic_path(&self) -> bool {
        !self.is_using_primary_path()
            && !self.is_using_backup_path()
            && self.current_path.status() == EntityStatus::Up
    }

    /// Returns true if the installed path contains `link`.
    pub fn is_affected_by(&self, link: &Link) -> bool {
        self.current_path.is_affected_by(link)
    }

    /// Applies an update, rejecting changes to identity fields.
    pub fn update(&mut self, patch: EvcPatch) -> EvcResult<()> {
        for (field, attempted) in [
            ("name", patch.name.is_some()),
            ("uni_a", patch.uni_a.is_some()),
            ("uni_z", patch.uni_z.is_some()),
        ] {
            if attempted {
                return Err(EvcError::validation(field, "cannot be updated"));
            }
        }

        if let Some(bandwidth) = patch.bandwidth {
            self.bandwidth = bandwidth;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(owner) = patch.owner {
            self.owner = Some(owner);
        }
        if let Some(start_date) = patch.start_date {
            self.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = Some(end_date);
        }
        if let Some(creation_time) = patch.creation_time {
            self.creation_time = creation_time;
        }
        if let Some(dynamic) = patch.dynamic_backup_path {
            self.dynamic_backup_path = dynamic;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        Ok(())
    }

    fn path_to_records(path: &Path) -> Vec<LinkRecord> {
        path.links()
            .iter()
            .map(|link| LinkRecord {
                endpoint_a: link.endpoint_a().id.clone(),
                endpoint_b: link.endpoint_b().id.clone(),
            })
            .collect()
    }

    fn records_to_path(records: &[LinkRecord], topology: &dyn TopologyApi) -> EvcResult<Path> {
        let mut links = Vec::with_capacity(records.len());
        for record in records {
            let a = resolve_interface(&record.endpoint_a, topology)?;
            let b = resolve_interface(&record.endpoint_b, topology)?;
            links.push(topology.link(&a, &b));
        }
        Ok(Path::new(links))
    }

    /// Returns the persisted form of this circuit.
    pub fn to_record(&self) -> EvcRecord {
        EvcRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            uni_a: self.uni_a.to_record(),
            uni_z: self.uni_z.to_record(),
            start_date: self.start_date,
            end_date: self.end_date,
            bandwidth: self.bandwidth,
            primary_links: Self::path_to_records(&self.primary_links),
            backup_links: Self::path_to_records(&self.backup_links),
            current_path: Self::path_to_records(&self.current_path),
            primary_path: Self::path_to_records(&self.primary_path),
            backup_path: Self::path_to_records(&self.backup_path),
            dynamic_backup_path: self.dynamic_backup_path,
            creation_time: self.creation_time,
            request_time: self.request_time,
            owner: self.owner.clone(),
            priority: self.priority,
            enabled: self.enabled,
            active: self.active,
            circuit_scheduler: self.circuit_scheduler.clone(),
        }
    }

    /// Reconstructs a circuit from its persisted form.
    ///
    /// Identity fields are taken as stored; user-tag availability is
    /// not re-checked.
    pub fn from_record(record: &EvcRecord, topology: &dyn TopologyApi) -> EvcResult<Self> {
        let cookie = cookie_from_id(&record.id)?;

        let uni_a = Uni::new(
            resolve_interface(&record.uni_a.interface_id, topology)?,
            record.uni_a.tag,
        );
        let uni_z = Uni::new(
            resolve_interface(&record.uni_z.interface_id, topology)?,
            record.uni_z.tag,
        );

        Ok(Self {
            id: record.id.clone(),
            cookie,
            name: record.name.clone(),
            uni_a,
            uni_z,
            start_date: record.start_date,
            end_date: record.end_date,
            bandwidth: record.bandwidth,
            primary_links: Self::records_to_path(&record.primary_links, topology)?,
            backup_links: Self::records_to_path(&record.backup_links, topology)?,
            current_path: Self::records_to_path(&record.current_path, topology)?,
            primary_path: Self::records_to_path(&record.primary_path, topology)?,
            backup_path: Self::records_to_path(&record.backup_path, topology)?,
            dynamic_backup_path: record.dynamic_backup_path,
            creation_time: record.creation_time,
            owner: record.owner.clone(),
            priority: record.priority,
            circuit_scheduler: record.circuit_scheduler.clone(),
            enabled: record.enabled,
            active: record.active,
            request_time: record.request_time,
        })
    }
}

/// Resolves an interface id through the topology, falling back to
/// parsing the id when the registry does not know it yet.
fn resolve_interface(interface_id: &str, topology: &dyn TopologyApi) -> EvcResult<Interface> {
    if let Some(interface) = topology.get_interface(interface_id) {
        return Ok(interface);
    }
    Interface::from_id(interface_id).map_err(|_| EvcError::interface_not_found(interface_id))
}

impl PartialEq for Evc {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.uni_a == other.uni_a
            && self.uni_z == other.uni_z
            && self.owner == other.owner
            && self.bandwidth == other.bandwidth
    }
}

impl fmt::Display for Evc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EVC({}, {})", self.id, self.name)
    }
}

impl fmt::Debug for Evc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evc")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("active", &self.active)
            .field("current_path", &self.current_path)
            .finish()
    }
}
