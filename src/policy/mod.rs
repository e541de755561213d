//! Server localities and the replication policy engine.
//!
//! A locality describes where a log server sits (zone, datacenter, and
//! so on) as an attribute map. Policies constrain how a set of servers
//! must spread across those attributes, and are consulted on every
//! placement decision, push confirmation, quorum read, and recovery.

pub mod replication;

pub use replication::ReplicationPolicy;

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Locality attributes of a log server process. Keys and values are
/// opaque to the subsystem; the well-known keys below are merely the
/// conventional ones policies name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    attributes: BTreeMap<String, String>,
}

impl Locality {
    pub const ZONE: &'static str = "zone";
    pub const DATACENTER: &'static str = "datacenter";
    pub const PROCESS: &'static str = "process";

    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style attribute assignment.
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.attributes.insert(key.to_string(), value.to_string());
        self
    }

    /// A locality with just a zone, the common test and single-DC shape.
    pub fn zone(value: &str) -> Self {
        Self::new().with(Self::ZONE, value)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl std::fmt::Display for Locality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in &self.attributes {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// The candidate set a policy selects replicas from: the currently
/// present servers of a log set, each entry pairing the caller's index
/// (a position in the log set's server vector) with that server's
/// locality. Absent servers are omitted.
#[derive(Clone, Debug, Default)]
pub struct LocalitySet {
    entries: Vec<(usize, Locality)>,
}

impl LocalitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, index: usize, locality: Locality) {
        debug_assert!(!self.contains(index), "duplicate locality entry {index}");
        self.entries.push((index, locality));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.entries.iter().any(|(i, _)| *i == index)
    }

    /// The locality recorded for a caller index, if present.
    pub fn locality(&self, index: usize) -> Option<&Locality> {
        self.entries.iter().find(|(i, _)| *i == index).map(|(_, l)| l)
    }

    /// Iterates (index, locality) pairs in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &Locality)> {
        self.entries.iter().map(|(i, l)| (*i, l))
    }
}

/// Accumulates the localities of servers actually used (confirming a
/// push, or replying to a read) for checking against a policy.
#[derive(Clone, Debug, Default)]
pub struct LocalityGroup {
    localities: Vec<Locality>,
}

impl LocalityGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, locality: &Locality) {
        self.localities.push(locality.clone());
    }

    pub fn clear(&mut self) {
        self.localities.clear();
    }

    pub fn len(&self) -> usize {
        self.localities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.localities.is_empty()
    }

    /// True if the accumulated servers satisfy the policy.
    pub fn satisfies(&self, policy: &ReplicationPolicy) -> bool {
        policy.validate(&self.localities.iter().collect::<Vec<_>>())
    }
}
