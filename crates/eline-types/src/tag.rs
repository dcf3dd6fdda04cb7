//! VLAN tags and per-link tag pools.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Smallest usable VLAN id.
pub const VLAN_MIN: u16 = 1;

/// Largest usable VLAN id.
pub const VLAN_MAX: u16 = 4095;

/// Kind of isolation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagType {
    /// Service (outer) tag, allocated per link.
    #[serde(rename = "s")]
    S,
    /// Customer (inner) tag, presented by the user at a UNI.
    #[serde(rename = "c")]
    C,
}

impl TagType {
    /// Returns the tag type as the wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TagType::S => "s",
            TagType::C => "c",
        }
    }
}

/// A VLAN tag with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// Kind of tag.
    pub tag_type: TagType,
    /// VLAN id value.
    pub value: u16,
}

impl Tag {
    /// Creates a new tag.
    pub fn new(tag_type: TagType, value: u16) -> Self {
        Self { tag_type, value }
    }

    /// Creates a customer (user) tag.
    pub fn customer(value: u16) -> Self {
        Self::new(TagType::C, value)
    }

    /// Creates a service tag.
    pub fn service(value: u16) -> Self {
        Self::new(TagType::S, value)
    }
}

/// Pool of available VLAN values for one link.
///
/// Values are handed out smallest-first. There is no release step:
/// once a value is taken it stays taken for the lifetime of the pool.
#[derive(Debug, Clone)]
pub struct TagPool {
    available: BTreeSet<u16>,
}

impl TagPool {
    /// Creates a pool covering the full usable VLAN range.
    pub fn new() -> Self {
        Self::with_values(VLAN_MIN..=VLAN_MAX)
    }

    /// Creates a pool from an explicit set of values.
    pub fn with_values(values: impl IntoIterator<Item = u16>) -> Self {
        Self {
            available: values.into_iter().collect(),
        }
    }

    /// Takes the next available value out of the pool.
    pub fn acquire(&mut self) -> Option<u16> {
        let value = *self.available.iter().next()?;
        self.available.remove(&value);
        Some(value)
    }

    /// Marks a specific value as used.
    ///
    /// Returns false if the value was already taken or never in the pool.
    pub fn use_value(&mut self, value: u16) -> bool {
        self.available.remove(&value)
    }

    /// Returns the number of values still available.
    pub fn remaining(&self) -> usize {
        self.available.len()
    }

    /// Returns true if no values are left.
    pub fn is_exhausted(&self) -> bool {
        self.available.is_empty()
    }
}

impl Default for TagPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_smallest_first() {
        let mut pool = TagPool::with_values([20, 10, 30]);
        assert_eq!(pool.acquire(), Some(10));
        assert_eq!(pool.acquire(), Some(20));
        assert_eq!(pool.acquire(), Some(30));
        assert_eq!(pool.acquire(), None);
        assert!(pool.is_exhausted());
    }

    #[test]
    fn test_use_value() {
        let mut pool = TagPool::with_values([10, 11]);
        assert!(pool.use_value(10));
        assert!(!pool.use_value(10));
        assert_eq!(pool.acquire(), Some(11));
    }

    #[test]
    fn test_default_range() {
        let pool = TagPool::new();
        assert_eq!(pool.remaining(), (VLAN_MAX - VLAN_MIN + 1) as usize);
    }

    #[test]
    fn test_tag_constructors() {
        assert_eq!(Tag::customer(100), Tag::new(TagType::C, 100));
        assert_eq!(Tag::service(20).tag_type.as_str(), "s");
    }
}
