//! eline-types - Core domain types for the E-Line EVC manager
//!
//! Value types shared by the EVC provisioning daemon: entity status,
//! interface identifiers, VLAN tags and per-link tag pools, links and
//! paths.

mod interface;
mod link;
mod path;
mod status;
mod tag;

pub use interface::*;
pub use link::*;
pub use path::*;
pub use status::*;
pub use tag::*;
