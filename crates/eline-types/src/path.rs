//! Ordered paths of links.

use std::collections::HashSet;
use std::fmt;

use crate::{EntityStatus, Link, LinkRef};

/// An ordered, directed (A to Z) sequence of links.
///
/// The link-membership set is cached at construction for O(1)
/// affectedness queries; a path must not be mutated after it is built.
/// Building a changed path means constructing a new one.
#[derive(Clone, Default)]
pub struct Path {
    links: Vec<LinkRef>,
    members: HashSet<String>,
}

impl Path {
    /// Builds a path from an ordered link sequence.
    pub fn new(links: Vec<LinkRef>) -> Self {
        let members = links.iter().map(|link| link.id()).collect();
        Self { links, members }
    }

    /// Returns the empty path.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Aggregate status of the path.
    ///
    /// An empty path is `Disabled`. Otherwise the path is `Up` iff every
    /// link is up; the first non-up link decides the status.
    pub fn status(&self) -> EntityStatus {
        if self.links.is_empty() {
            return EntityStatus::Disabled;
        }

        for link in &self.links {
            let status = link.status();
            if status != EntityStatus::Up {
                return status;
            }
        }
        EntityStatus::Up
    }

    /// Returns true if `link` is part of this path.
    pub fn is_affected_by(&self, link: &Link) -> bool {
        self.members.contains(&link.id())
    }

    /// Returns the ordered links.
    pub fn links(&self) -> &[LinkRef] {
        &self.links
    }

    /// Returns true if the path has no links.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Returns the number of links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Returns the first link, if any.
    pub fn first(&self) -> Option<&LinkRef> {
        self.links.first()
    }

    /// Returns the last link, if any.
    pub fn last(&self) -> Option<&LinkRef> {
        self.links.last()
    }

    /// Returns every switch dpid touched by the path.
    pub fn switches(&self) -> HashSet<String> {
        let mut switches = HashSet::new();
        for link in &self.links {
            switches.insert(link.endpoint_a().switch.clone());
            switches.insert(link.endpoint_b().switch.clone());
        }
        switches
    }

    /// Iterates over consecutive link pairs, in order.
    pub fn adjacent_pairs(&self) -> impl Iterator<Item = (&LinkRef, &LinkRef)> {
        self.links.iter().zip(self.links.iter().skip(1))
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.links.len() == other.links.len()
            && self
                .links
                .iter()
                .zip(other.links.iter())
                .all(|(a, b)| a == b)
    }
}

impl Eq for Path {}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.links.iter().map(|link| link.id()))
            .finish()
    }
}
