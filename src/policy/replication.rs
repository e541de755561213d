use super::{Locality, LocalitySet};

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A replication policy: a predicate over a set of server localities,
/// plus the ability to extend a partial set until the predicate holds.
///
/// Policies compose: "two servers in each of three zones" is
/// `Across { count: 3, attribute: zone, inner: Across { count: 2,
/// attribute: process, inner: One } }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationPolicy {
    /// Any single server.
    One,
    /// `count` distinct values of `attribute`, with the servers sharing
    /// each value satisfying `inner`.
    Across { count: usize, attribute: String, inner: Box<ReplicationPolicy> },
    /// All of the inner policies simultaneously.
    And(Vec<ReplicationPolicy>),
}

impl ReplicationPolicy {
    /// `count` servers across as many zones, the common configuration.
    pub fn across_zones(count: usize) -> Self {
        Self::Across {
            count,
            attribute: Locality::ZONE.to_string(),
            inner: Box::new(Self::One),
        }
    }

    /// True if the given localities satisfy the policy.
    pub fn validate(&self, localities: &[&Locality]) -> bool {
        let (achieved, target) = self.score(localities);
        achieved >= target
    }

    /// Progress toward satisfaction as (achieved, target), with achieved
    /// capped at target per clause so that sums compose under And.
    fn score(&self, localities: &[&Locality]) -> (usize, usize) {
        match self {
            Self::One => (localities.len().min(1), 1),
            Self::Across { count, attribute, inner } => {
                let mut groups: BTreeMap<&str, Vec<&Locality>> = BTreeMap::new();
                for &locality in localities {
                    if let Some(value) = locality.get(attribute) {
                        groups.entry(value).or_default().push(locality);
                    }
                }
                let satisfied = groups.values().filter(|group| inner.validate(group)).count();
                (satisfied.min(*count), *count)
            }
            Self::And(policies) => policies
                .iter()
                .map(|policy| policy.score(localities))
                .fold((0, 0), |(a, t), (pa, pt)| (a + pa, t + pt)),
        }
    }

    /// Selects additional servers from `set` such that the union with
    /// the already-chosen `also` entries satisfies the policy, appending
    /// the chosen indexes to `out`. Selection is a deterministic greedy
    /// first-fit in entry order, keeping a candidate only when it makes
    /// progress, so the result is minimal for the flat policies used in
    /// practice. Returns false if the present servers cannot satisfy the
    /// policy.
    pub fn select_replicas(
        &self,
        set: &LocalitySet,
        also: &[usize],
        out: &mut Vec<usize>,
    ) -> bool {
        let mut chosen: Vec<&Locality> = Vec::with_capacity(also.len());
        for &index in also {
            // Absent also-servers can't count toward the policy.
            if let Some(locality) = set.locality(index) {
                chosen.push(locality);
            }
        }
        for &index in out.iter() {
            if let Some(locality) = set.locality(index) {
                chosen.push(locality);
            }
        }

        let (mut achieved, target) = self.score(&chosen);
        if achieved >= target {
            return true;
        }
        for (index, locality) in set.entries() {
            if also.contains(&index) || out.contains(&index) {
                continue;
            }
            chosen.push(locality);
            let (next, _) = self.score(&chosen);
            if next > achieved {
                achieved = next;
                out.push(index);
                if achieved >= target {
                    return true;
                }
            } else {
                chosen.pop();
            }
        }
        false
    }
}

impl std::fmt::Display for ReplicationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One => write!(f, "one"),
            Self::Across { count, attribute, inner } => {
                write!(f, "across({count} × {attribute}: {inner})")
            }
            Self::And(policies) => {
                write!(f, "and(")?;
                for (i, policy) in policies.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{policy}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones(values: &[&str]) -> Vec<Locality> {
        values.iter().map(|z| Locality::zone(z)).collect()
    }

    fn set(localities: &[Locality]) -> LocalitySet {
        let mut set = LocalitySet::new();
        for (i, locality) in localities.iter().enumerate() {
            set.add(i, locality.clone());
        }
        set
    }

    #[test]
    fn validate_across_zones() {
        let policy = ReplicationPolicy::across_zones(3);
        let abc = zones(&["a", "b", "c"]);
        let aab = zones(&["a", "a", "b"]);
        assert!(policy.validate(&abc.iter().collect::<Vec<_>>()));
        assert!(!policy.validate(&aab.iter().collect::<Vec<_>>()));
        assert!(!policy.validate(&[]));
    }

    #[test]
    fn validate_nested_across() {
        // Two servers in each of two zones.
        let policy = ReplicationPolicy::Across {
            count: 2,
            attribute: Locality::ZONE.to_string(),
            inner: Box::new(ReplicationPolicy::Across {
                count: 2,
                attribute: Locality::PROCESS.to_string(),
                inner: Box::new(ReplicationPolicy::One),
            }),
        };
        let make = |zone: &str, process: &str| {
            Locality::zone(zone).with(Locality::PROCESS, process)
        };
        let full = [make("a", "1"), make("a", "2"), make("b", "3"), make("b", "4")];
        let thin = [make("a", "1"), make("a", "2"), make("b", "3")];
        assert!(policy.validate(&full.iter().collect::<Vec<_>>()));
        assert!(!policy.validate(&thin.iter().collect::<Vec<_>>()));
    }

    #[test]
    fn select_fills_missing_zones() {
        // Servers 0,1 in a; 2,3 in b; 4 in c. Server 2 already chosen.
        let localities = zones(&["a", "a", "b", "b", "c"]);
        let set = set(&localities);
        let policy = ReplicationPolicy::across_zones(3);

        let mut out = Vec::new();
        assert!(policy.select_replicas(&set, &[2], &mut out));
        // First-fit picks 0 (zone a) and 4 (zone c), skipping redundant
        // servers in already-covered zones.
        assert_eq!(out, vec![0, 4]);
    }

    #[test]
    fn select_is_noop_when_satisfied() {
        let localities = zones(&["a", "b", "c"]);
        let set = set(&localities);
        let policy = ReplicationPolicy::across_zones(3);
        let mut out = Vec::new();
        assert!(policy.select_replicas(&set, &[0, 1, 2], &mut out));
        assert!(out.is_empty());
    }

    #[test]
    fn select_fails_without_enough_zones() {
        let localities = zones(&["a", "a", "b"]);
        let set = set(&localities);
        let policy = ReplicationPolicy::across_zones(3);
        let mut out = Vec::new();
        assert!(!policy.select_replicas(&set, &[], &mut out));
    }

    #[test]
    fn select_ignores_absent_also_servers() {
        // The also-server 9 is not in the present set, so it contributes
        // nothing and three present zones must be chosen.
        let localities = zones(&["a", "b", "c"]);
        let set = set(&localities);
        let policy = ReplicationPolicy::across_zones(3);
        let mut out = Vec::new();
        assert!(policy.select_replicas(&set, &[9], &mut out));
        assert_eq!(out, vec![0, 1, 2]);
    }
}
