use crate::encoding;
use crate::policy::{Locality, ReplicationPolicy};
use super::interface::ServerId;
use super::message::{Epoch, Version};
use super::set::BestPolicy;

use serde_derive::{Deserialize, Serialize};

/// A log set descriptor within the core state: enough to rebuild the
/// set's topology once the named servers are resolved to handles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoreLogSet {
    pub servers: Vec<ServerId>,
    /// Localities by server, aligned with `servers`.
    pub localities: Vec<Locality>,
    pub replication_factor: usize,
    pub anti_quorum: usize,
    pub policy: ReplicationPolicy,
    pub best_policy: BestPolicy,
    pub locality: i8,
    pub is_local: bool,
}

/// A prior epoch retained so reads can span epoch boundaries: its log
/// sets plus the version range it covers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OldEpochState {
    pub epoch: Epoch,
    pub log_sets: Vec<CoreLogSet>,
    pub begin_version: Version,
    /// The first version of the next epoch; reads from this epoch stop
    /// strictly below it.
    pub end_version: Version,
}

/// The minimum durable state the coordinator service persists for the
/// log subsystem: everything needed to reconstruct the topology after a
/// crash and to fence the old epoch during recovery. Written atomically
/// by the coordinator (persistence itself is out of scope); a live
/// [`super::LogSystem`] can always project itself to one of these via
/// `to_core_state`, and be rebuilt from one via `from_core_state`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreState {
    pub log_sets: Vec<CoreLogSet>,
    /// Prior epochs still readable, oldest first.
    pub old_epochs: Vec<OldEpochState>,
    /// How many recoveries this configuration has been through; doubles
    /// as the epoch number.
    pub recovery_count: Epoch,
    /// The version at which this epoch began.
    pub begin_version: Version,
    pub primary_locality: i8,
    pub remote_locality: i8,
    /// How many log-router tags remote-bound messages spread over.
    pub log_router_tags: u32,
}

impl encoding::Value for CoreState {}

impl Default for CoreLogSet {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            localities: Vec::new(),
            replication_factor: 1,
            anti_quorum: 0,
            policy: ReplicationPolicy::One,
            best_policy: BestPolicy::Id,
            locality: 0,
            is_local: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Value as _;

    /// Core state must round-trip through its durable encoding, since a
    /// recovery reads back what a prior incarnation wrote.
    #[test]
    fn core_state_encoding_roundtrip() {
        let state = CoreState {
            log_sets: vec![CoreLogSet {
                servers: vec![1, 2, 3],
                localities: vec![
                    Locality::zone("a"),
                    Locality::zone("b"),
                    Locality::zone("c"),
                ],
                replication_factor: 3,
                anti_quorum: 1,
                policy: ReplicationPolicy::across_zones(2),
                best_policy: BestPolicy::Id,
                locality: 0,
                is_local: true,
            }],
            old_epochs: vec![OldEpochState {
                epoch: 3,
                log_sets: vec![CoreLogSet::default()],
                begin_version: 10,
                end_version: 31,
            }],
            recovery_count: 4,
            begin_version: 31,
            primary_locality: 0,
            remote_locality: 1,
            log_router_tags: 0,
        };
        assert_eq!(CoreState::decode(&state.encode()).unwrap(), state);
    }
}
