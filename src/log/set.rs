use crate::policy::{Locality, LocalitySet, ReplicationPolicy};
use super::interface::ServerHandle;
use super::message::{Tag, TAG_LOCALITY_LOG_ROUTER, TAG_LOCALITY_SPECIAL, TXS_TAG, TXS_TAG_OLD_ID};

use serde_derive::{Deserialize, Serialize};

/// How a log set picks the preferred (hashed) server for a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BestPolicy {
    /// No preferred placement: the replication policy alone picks
    /// servers, and peeks must merge a full quorum.
    None,
    /// Hash the tag id onto the server vector. Peeks for a tag can then
    /// be served from one known server in the common case.
    Id,
}

/// A replication group: an ordered set of log servers, their localities,
/// and the policy governing placement and quorums within the group.
///
/// Log sets are created when an epoch begins and are immutable for its
/// lifetime, except that individual servers may become absent and later
/// rejoin; the derived locality set tracks only present servers and is
/// rebuilt on every membership change.
///
/// Invariants, checked at construction:
///
/// * `replication_factor >= 1` and `0 <= anti_quorum < replication_factor`.
/// * There are at least `replication_factor` servers.
/// * `localities` corresponds to `log_servers` by index.
#[derive(Clone, Debug)]
pub struct LogSet {
    /// Handles to the member servers. Handles stay in place (and keep
    /// their ids) while servers are absent.
    pub log_servers: Vec<ServerHandle>,
    /// Localities by server index; same length and order as log_servers.
    pub localities: Vec<Locality>,
    pub replication_factor: usize,
    /// How many of the replication factor may be omitted from a
    /// confirmation before it counts as durable.
    pub anti_quorum: usize,
    pub policy: ReplicationPolicy,
    pub best_policy: BestPolicy,
    /// The tag locality scope this set serves.
    pub locality: i8,
    /// True for the region-local set; local sets also serve log-router
    /// tags on their way to remote regions.
    pub is_local: bool,
    /// Present servers only; see [`Self::update_locality_set`].
    locality_set: LocalitySet,
}

impl LogSet {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        log_servers: Vec<ServerHandle>,
        localities: Vec<Locality>,
        replication_factor: usize,
        anti_quorum: usize,
        policy: ReplicationPolicy,
        best_policy: BestPolicy,
        locality: i8,
        is_local: bool,
    ) -> Self {
        assert!(replication_factor >= 1, "replication factor must be at least 1");
        assert!(
            anti_quorum < replication_factor,
            "anti-quorum {anti_quorum} must be below replication factor {replication_factor}"
        );
        assert!(
            log_servers.len() >= replication_factor,
            "log set has {} servers for replication factor {replication_factor}",
            log_servers.len()
        );
        assert_eq!(
            localities.len(),
            log_servers.len(),
            "every log server must have a locality"
        );
        let mut set = Self {
            log_servers,
            localities,
            replication_factor,
            anti_quorum,
            policy,
            best_policy,
            locality,
            is_local,
            locality_set: LocalitySet::new(),
        };
        set.update_locality_set();
        set
    }

    /// The number of confirming servers a durable write (and therefore a
    /// safe read) must reach.
    pub fn read_quorum(&self) -> usize {
        self.replication_factor - self.anti_quorum
    }

    /// The preferred server index for a tag, or None when the policy
    /// engine alone places messages.
    pub fn best_location_for(&self, tag: Tag) -> Option<usize> {
        match self.best_policy {
            BestPolicy::None => None,
            // The txs tag keeps the placement id it had before tag
            // localities existed, so upgraded clusters find transaction
            // state where the previous release put it.
            BestPolicy::Id if tag == TXS_TAG => {
                Some(TXS_TAG_OLD_ID as usize % self.log_servers.len())
            }
            BestPolicy::Id => Some(tag.id as usize % self.log_servers.len()),
        }
    }

    /// Rebuilds the derived locality set from the currently-present
    /// handles. Must be called whenever presence changes; entries for
    /// absent servers are omitted.
    pub fn update_locality_set(&mut self) {
        let mut set = LocalitySet::new();
        for (index, server) in self.log_servers.iter().enumerate() {
            if server.is_present() {
                set.add(index, self.localities[index].clone());
            }
        }
        self.locality_set = set;
    }

    /// True if this set stores (and serves peeks for) the tag.
    pub fn serves(&self, tag: Tag) -> bool {
        tag.locality == self.locality
            || tag.locality == TAG_LOCALITY_SPECIAL
            || self.locality == TAG_LOCALITY_SPECIAL
            || (self.is_local && tag.locality == TAG_LOCALITY_LOG_ROUTER)
    }

    /// Computes where a message with the given tags must be placed: the
    /// preferred (hashed) server of every in-scope tag, plus whatever
    /// the replication policy needs on top of those to be satisfied.
    /// Chosen indexes are shifted by `offset` and appended to
    /// `locations`, so a caller merging several log sets can give each
    /// a disjoint index range in one output vector.
    ///
    /// Panics if the present servers cannot satisfy the policy: the
    /// caller must guarantee enough healthy servers before pushing.
    pub fn get_push_locations(&self, tags: &[Tag], locations: &mut Vec<usize>, offset: usize) {
        let mut preferred = Vec::new();
        for &tag in tags {
            if self.serves(tag) {
                if let Some(best) = self.best_location_for(tag) {
                    preferred.push(best);
                }
            }
        }
        preferred.sort_unstable();
        preferred.dedup();

        for &location in &preferred {
            assert!(
                self.locality_set.contains(location),
                "preferred log server {location} is absent"
            );
            locations.push(offset + location);
        }

        let mut selected = Vec::new();
        let satisfied = self.policy.select_replicas(&self.locality_set, &preferred, &mut selected);
        assert!(satisfied, "replication policy {} cannot be satisfied", self.policy);
        for location in selected {
            locations.push(offset + location);
        }
    }

    /// True if the given confirming server indexes are enough for a
    /// push to count as durable: at least the read quorum, and spread
    /// such that the policy is satisfied.
    pub fn satisfies(&self, confirmed: &[usize]) -> bool {
        if confirmed.len() < self.read_quorum() {
            return false;
        }
        let localities: Vec<&Locality> = confirmed.iter().map(|&i| &self.localities[i]).collect();
        self.policy.validate(&localities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::interface::{LogServerClient, ServerHandle};
    use crate::log::message::TAG_LOCALITY_TXS;

    fn test_set(zones: &[&str], replication_factor: usize, anti_quorum: usize) -> LogSet {
        let localities: Vec<Locality> = zones.iter().map(|z| Locality::zone(z)).collect();
        let servers = localities
            .iter()
            .enumerate()
            .map(|(id, locality)| {
                let (client, _requests) = LogServerClient::channel(id as u64, locality.clone());
                ServerHandle::fixed(client)
            })
            .collect();
        LogSet::new(
            servers,
            localities,
            replication_factor,
            anti_quorum,
            ReplicationPolicy::across_zones(replication_factor - anti_quorum),
            BestPolicy::Id,
            0,
            true,
        )
    }

    /// Placement must include the tag's hashed server and spread the
    /// rest across zones per the policy.
    #[test]
    fn push_locations_cover_policy() {
        // Five servers: 0,1 in zone a; 2,3 in zone b; 4 in zone c.
        let set = test_set(&["a", "a", "b", "b", "c"], 3, 0);
        let tag = Tag::new(0, 7);
        assert_eq!(set.best_location_for(tag), Some(2)); // 7 % 5

        let mut locations = Vec::new();
        set.get_push_locations(&[tag], &mut locations, 0);
        assert!(locations.contains(&2));
        let zones: std::collections::BTreeSet<&str> = locations
            .iter()
            .map(|&i| set.localities[i].get(Locality::ZONE).unwrap())
            .collect();
        assert_eq!(zones.into_iter().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    /// The location offset shifts every chosen index, giving callers
    /// disjoint ranges per log set.
    #[test]
    fn push_locations_apply_offset() {
        let set = test_set(&["a", "b", "c"], 3, 0);
        let mut locations = Vec::new();
        set.get_push_locations(&[Tag::new(0, 1)], &mut locations, 10);
        locations.sort_unstable();
        assert_eq!(locations, vec![10, 11, 12]);
    }

    /// Out-of-scope tags contribute no preferred location, but the
    /// policy still places the message.
    #[test]
    fn out_of_scope_tags_use_policy_only() {
        let set = test_set(&["a", "b", "c"], 2, 0);
        let mut locations = Vec::new();
        set.get_push_locations(&[Tag::new(5, 0)], &mut locations, 0);
        assert_eq!(locations.len(), 2);
    }

    /// The txs tag hashes by its legacy id rather than its own.
    #[test]
    fn txs_tag_uses_legacy_id() {
        let set = test_set(&["a", "b", "c"], 2, 0);
        assert_eq!(set.best_location_for(TXS_TAG), Some(TXS_TAG_OLD_ID as usize % 3));
        // A regular tag with the same id in the txs locality hashes
        // normally.
        assert_eq!(set.best_location_for(Tag::new(TAG_LOCALITY_TXS, 2)), Some(2));
    }

    #[test]
    #[should_panic(expected = "anti-quorum")]
    fn anti_quorum_must_be_below_replication_factor() {
        test_set(&["a", "b", "c"], 3, 3);
    }

    /// Confirmation needs both the count and the spread.
    #[test]
    fn satisfies_needs_quorum_and_policy() {
        let set = test_set(&["a", "a", "b", "b", "c"], 3, 1);
        assert!(!set.satisfies(&[0])); // below quorum
        assert!(!set.satisfies(&[0, 1])); // quorum met, single zone
        assert!(set.satisfies(&[0, 2])); // two zones
    }
}
