//! Topology registry boundary.
//!
//! The inventory of live switches, interfaces and links is owned by an
//! external collaborator. The daemon consumes it through `TopologyApi`;
//! the in-memory `Topology` is the concrete registry populated from
//! topology events.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use eline_types::{Interface, Link, LinkRef, TagPool};
use tracing::debug;

/// Resolves interface ids and link endpoints, and tracks user-tag
/// availability per interface.
pub trait TopologyApi: Send + Sync {
    /// Resolves a full interface id to a live interface.
    fn get_interface(&self, interface_id: &str) -> Option<Interface>;

    /// Returns the shared link between two interfaces, creating it if
    /// this endpoint pair has not been seen yet.
    fn link(&self, a: &Interface, b: &Interface) -> LinkRef;

    /// Looks up a link by its identity string.
    fn get_link(&self, link_id: &str) -> Option<LinkRef>;

    /// Returns true if a user tag is free on an interface.
    fn is_user_tag_available(&self, interface_id: &str, tag: u16) -> bool;

    /// Reserves a user tag on an interface.
    ///
    /// Returns false if the tag was already taken.
    fn reserve_user_tag(&self, interface_id: &str, tag: u16) -> bool;
}

/// In-memory topology registry.
pub struct Topology {
    interfaces: RwLock<HashMap<String, Interface>>,
    links: RwLock<HashMap<String, LinkRef>>,
    used_user_tags: RwLock<HashMap<String, Vec<u16>>>,
    /// Per-port service-VLAN pool override: dpid -> port -> values.
    pool_override: HashMap<String, HashMap<u32, Vec<u16>>>,
}

impl Topology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::with_pool_override(HashMap::new())
    }

    /// Creates an empty topology with a service-VLAN pool override.
    pub fn with_pool_override(pool_override: HashMap<String, HashMap<u32, Vec<u16>>>) -> Self {
        Self {
            interfaces: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            used_user_tags: RwLock::new(HashMap::new()),
            pool_override,
        }
    }

    /// Registers an interface, returning it.
    pub fn add_interface(&self, switch: &str, port_number: u32) -> Interface {
        let iface = Interface::new(switch, port_number);
        self.interfaces
            .write()
            .expect("topology lock poisoned")
            .insert(iface.id.clone(), iface.clone());
        iface
    }

    /// Picks the pool for a new link from the per-port override, if any.
    ///
    /// Endpoint A's override wins when both ports carry one.
    fn pool_for_link(&self, a: &Interface, b: &Interface) -> TagPool {
        for iface in [a, b] {
            if let Some(values) = self
                .pool_override
                .get(&iface.switch)
                .and_then(|ports| ports.get(&iface.port_number))
            {
                return TagPool::with_values(values.iter().copied());
            }
        }
        TagPool::new()
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyApi for Topology {
    fn get_interface(&self, interface_id: &str) -> Option<Interface> {
        self.interfaces
            .read()
            .expect("topology lock poisoned")
            .get(interface_id)
            .cloned()
    }

    fn link(&self, a: &Interface, b: &Interface) -> LinkRef {
        let id = Link::pair_id(&a.id, &b.id);
        let mut links = self.links.write().expect("topology lock poisoned");
        Arc::clone(links.entry(id.clone()).or_insert_with(|| {
            debug!("Registering link {}", id);
            let pool = self.pool_for_link(a, b);
            Arc::new(Link::with_pool(a.clone(), b.clone(), pool))
        }))
    }

    fn get_link(&self, link_id: &str) -> Option<LinkRef> {
        self.links
            .read()
            .expect("topology lock poisoned")
            .get(link_id)
            .map(Arc::clone)
    }

    fn is_user_tag_available(&self, interface_id: &str, tag: u16) -> bool {
        !self
            .used_user_tags
            .read()
            .expect("topology lock poisoned")
            .get(interface_id)
            .map(|tags| tags.contains(&tag))
            .unwrap_or(false)
    }

    fn reserve_user_tag(&self, interface_id: &str, tag: u16) -> bool {
        let mut used = self.used_user_tags.write().expect("topology lock poisoned");
        let tags = used.entry(interface_id.to_string()).or_default();
        if tags.contains(&tag) {
            return false;
        }
        tags.push(tag);
        true
    }
}
