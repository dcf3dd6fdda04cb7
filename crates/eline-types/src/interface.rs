//! Switch interface identifiers.
//!
//! An interface id has the form `<dpid>:<port>`, where the dpid is the
//! 23-character colon-hex datapath id (`00:00:00:00:00:00:00:01`). Hop
//! lists returned by the path-computation service mix switch-only hops
//! (bare dpids) with interface hops; only the latter can be paired into
//! links.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Length of a datapath id in its colon-hex form.
pub const DPID_LEN: usize = 23;

/// Errors raised while parsing interface identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterfaceIdError {
    /// The id does not have a `<dpid>:<port>` shape.
    #[error("Malformed interface id '{0}'")]
    Malformed(String),

    /// The port component is not a number.
    #[error("Invalid port number in interface id '{0}'")]
    InvalidPort(String),
}

/// Returns true if a hop string refers to an interface rather than a
/// bare switch dpid.
pub fn is_interface_hop(hop: &str) -> bool {
    hop.len() > DPID_LEN
}

/// A switch interface: the attachment point for UNIs and link endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interface {
    /// Full interface id (`<dpid>:<port>`).
    pub id: String,
    /// Owning switch dpid.
    pub switch: String,
    /// Port number on the switch.
    pub port_number: u32,
}

impl Interface {
    /// Creates an interface from its switch dpid and port number.
    pub fn new(switch: impl Into<String>, port_number: u32) -> Self {
        let switch = switch.into();
        Self {
            id: format!("{}:{}", switch, port_number),
            switch,
            port_number,
        }
    }

    /// Parses a full interface id into its switch and port parts.
    pub fn from_id(id: &str) -> Result<Self, InterfaceIdError> {
        let (switch, port) = id
            .rsplit_once(':')
            .ok_or_else(|| InterfaceIdError::Malformed(id.to_string()))?;

        if switch.is_empty() || port.is_empty() {
            return Err(InterfaceIdError::Malformed(id.to_string()));
        }

        let port_number: u32 = port
            .parse()
            .map_err(|_| InterfaceIdError::InvalidPort(id.to_string()))?;

        Ok(Self {
            id: id.to_string(),
            switch: switch.to_string(),
            port_number,
        })
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
