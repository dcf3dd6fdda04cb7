//! Links between switch interfaces.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};

use crate::{EntityStatus, Interface, TagPool};

/// Shared handle to a link.
///
/// Links are shared between the topology, paths and circuits; a status
/// change made through one handle is observed by every path holding the
/// link.
pub type LinkRef = Arc<Link>;

/// A bidirectional segment between two interfaces on two switches.
///
/// Identity is the unordered endpoint pair: two links with the same
/// endpoints compare equal regardless of direction. The link owns the
/// VLAN pool used to allocate one service tag per traversal.
pub struct Link {
    endpoint_a: Interface,
    endpoint_b: Interface,
    status: RwLock<EntityStatus>,
    pool: Mutex<TagPool>,
}

impl Link {
    /// Creates a link with the full default tag pool, initially up.
    pub fn new(endpoint_a: Interface, endpoint_b: Interface) -> Self {
        Self::with_pool(endpoint_a, endpoint_b, TagPool::new())
    }

    /// Creates a link with an explicit tag pool.
    pub fn with_pool(endpoint_a: Interface, endpoint_b: Interface, pool: TagPool) -> Self {
        Self {
            endpoint_a,
            endpoint_b,
            status: RwLock::new(EntityStatus::Up),
            pool: Mutex::new(pool),
        }
    }

    /// Stable identity for the unordered endpoint pair.
    pub fn pair_id(a: &str, b: &str) -> String {
        if a <= b {
            format!("{}--{}", a, b)
        } else {
            format!("{}--{}", b, a)
        }
    }

    /// Returns this link's identity string.
    pub fn id(&self) -> String {
        Self::pair_id(&self.endpoint_a.id, &self.endpoint_b.id)
    }

    /// Returns endpoint A.
    pub fn endpoint_a(&self) -> &Interface {
        &self.endpoint_a
    }

    /// Returns endpoint B.
    pub fn endpoint_b(&self) -> &Interface {
        &self.endpoint_b
    }

    /// Returns this link's endpoint on the given switch, if any.
    ///
    /// Links are bidirectional; callers that need "the interface at
    /// switch X" must not assume which endpoint that is.
    pub fn endpoint_on(&self, switch: &str) -> Option<&Interface> {
        if self.endpoint_a.switch == switch {
            Some(&self.endpoint_a)
        } else if self.endpoint_b.switch == switch {
            Some(&self.endpoint_b)
        } else {
            None
        }
    }

    /// Returns the current operational status.
    pub fn status(&self) -> EntityStatus {
        *self.status.read().expect("link status lock poisoned")
    }

    /// Updates the operational status.
    pub fn set_status(&self, status: EntityStatus) {
        *self.status.write().expect("link status lock poisoned") = status;
    }

    /// Takes the next available service tag out of this link's pool and
    /// marks it used, atomically.
    pub fn acquire_tag(&self) -> Option<u16> {
        self.pool.lock().expect("link pool lock poisoned").acquire()
    }

    /// Marks a specific service tag as used.
    pub fn use_tag(&self, value: u16) -> bool {
        self.pool
            .lock()
            .expect("link pool lock poisoned")
            .use_value(value)
    }

    /// Returns the number of service tags still available.
    pub fn available_tags(&self) -> usize {
        self.pool.lock().expect("link pool lock poisoned").remaining()
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Link {}

impl Hash for Link {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("endpoint_a", &self.endpoint_a.id)
            .field("endpoint_b", &self.endpoint_b.id)
            .field("status", &self.status())
            .finish()
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.endpoint_a.id, self.endpoint_b.id)
    }
}
