//! Epoch recovery: fencing the previous epoch's log servers, learning
//! their durable frontiers, and assembling a read-only log system for
//! the epoch's recoverable prefix.

use crate::error::Result;
use crate::policy::{Locality, LocalityGroup};
use super::interface::{LogServerClient, ServerHandle, ServerId};
use super::message::Version;
use super::state::CoreState;
use super::system::LogSystem;

use ::log::{debug, info};
use futures::stream::{FuturesUnordered, StreamExt as _};
use itertools::Itertools as _;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// A log server from the previous epoch announcing itself to recovery.
/// Producing these (worker registration, failure detection) is out of
/// scope; recovery consumes whatever stream the process wiring provides.
#[derive(Clone, Debug)]
pub struct Rejoin {
    pub id: ServerId,
    pub client: LogServerClient,
}

/// Recovers the epoch described by `old_state` and ends it.
///
/// Every rejoining server named by the old core state is fenced (so
/// pushes of the old epoch can never complete), and its durable end
/// version collected. Whenever the fenced set can newly prove a longer
/// recoverable prefix, a fresh read-only [`LogSystem`] for that prefix
/// is published into `out`; the caller restarts its recovery reads from
/// the latest published system, and calls `new_epoch` on it once
/// recruitment finishes.
///
/// Runs until the rejoin stream closes or the output watch is dropped.
pub async fn recover_and_end_epoch(
    out: &watch::Sender<Option<Arc<LogSystem>>>,
    old_state: CoreState,
    mut rejoins: mpsc::UnboundedReceiver<Rejoin>,
) -> Result<()> {
    // Servers named by the old epoch, across all of its log sets.
    let members: HashMap<ServerId, Locality> = old_state
        .log_sets
        .iter()
        .chain(old_state.old_epochs.iter().flat_map(|old| old.log_sets.iter()))
        .flat_map(|set| set.servers.iter().copied().zip(set.localities.iter().cloned()))
        .collect();
    // Fence with the epoch recovery is creating, so the old epoch's
    // pushes are refused from here on.
    let fence_epoch = old_state.recovery_count + 1;

    let mut locks = FuturesUnordered::new();
    let mut durable: HashMap<ServerId, Version> = HashMap::new();
    let mut clients: HashMap<ServerId, LogServerClient> = HashMap::new();
    let mut published_end: Option<Version> = None;

    loop {
        tokio::select! {
            rejoin = rejoins.recv() => {
                let Some(rejoin) = rejoin else {
                    debug!("recovery rejoin stream closed");
                    return Ok(());
                };
                if !members.contains_key(&rejoin.id) {
                    debug!("ignoring rejoin from unknown log server {}", rejoin.id);
                    continue;
                }
                let client = rejoin.client.clone();
                locks.push(async move {
                    let reply = client.lock(fence_epoch).await;
                    (rejoin, reply)
                });
            }

            Some((rejoin, reply)) = locks.next() => {
                let reply = match reply {
                    Ok(reply) => reply,
                    // The server died mid-lock; it can rejoin again.
                    Err(err) => {
                        debug!("failed to fence log server {}: {err}", rejoin.id);
                        continue;
                    }
                };
                debug!(
                    "fenced log server {} at durable version {}",
                    rejoin.id,
                    reply.end_version.saturating_sub(1),
                );
                durable.insert(rejoin.id, reply.end_version.saturating_sub(1));
                clients.insert(rejoin.id, rejoin.client);

                let Some(end) = end_version(&old_state, &durable) else { continue };
                if published_end == Some(end) {
                    continue;
                }
                published_end = Some(end);
                info!(
                    "recovered epoch {} through version {} from {} servers",
                    old_state.recovery_count,
                    end.saturating_sub(1),
                    durable.len(),
                );
                let system = LogSystem::recovered(&old_state, end, |id, _| {
                    match clients.get(&id) {
                        Some(client) => ServerHandle::fixed(client.clone()),
                        None => ServerHandle::new(id, None).1,
                    }
                });
                if out.send(Some(system)).is_err() {
                    return Ok(()); // caller is gone
                }
            }
        }
    }
}

/// The first unrecoverable version: one past the greatest version `v`
/// such that, in every log set of the old epoch, the fenced servers
/// durable through `v` satisfy the set's policy. None until every set
/// can prove some prefix.
pub(super) fn end_version(
    state: &CoreState,
    durable: &HashMap<ServerId, Version>,
) -> Option<Version> {
    state
        .log_sets
        .iter()
        .map(|set| {
            // Walk this set's fenced servers from the most durable down,
            // accumulating localities until the policy holds; everything
            // through that server's durable version is then recoverable.
            let mut group = LocalityGroup::new();
            for (version, index) in set
                .servers
                .iter()
                .enumerate()
                .filter_map(|(i, id)| durable.get(id).map(|v| (*v, i)))
                .sorted()
                .rev()
            {
                group.add(&set.localities[index]);
                if group.satisfies(&set.policy) {
                    return Some(version + 1);
                }
            }
            None
        })
        .try_fold(Version::MAX, |end, set_end| set_end.map(|v| end.min(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::set::BestPolicy;
    use crate::log::state::CoreLogSet;
    use crate::policy::ReplicationPolicy;

    fn old_state(durables: usize) -> CoreState {
        CoreState {
            log_sets: vec![CoreLogSet {
                servers: (0..durables as u64).collect(),
                localities: (0..durables).map(|i| Locality::zone(&format!("z{i}"))).collect(),
                replication_factor: 3,
                anti_quorum: 1,
                policy: ReplicationPolicy::across_zones(2),
                best_policy: BestPolicy::Id,
                locality: 0,
                is_local: true,
            }],
            recovery_count: 7,
            begin_version: 1,
            ..CoreState::default()
        }
    }

    /// With durable versions {100, 100, 90} and an any-2-of-3 policy,
    /// everything through 100 is recoverable from the two leaders, so
    /// the first unreadable version is 101.
    #[test]
    fn end_version_takes_policy_prefix() {
        let state = old_state(3);
        let durable = HashMap::from([(0, 100), (1, 100), (2, 90)]);
        assert_eq!(end_version(&state, &durable), Some(101));
    }

    /// A single fenced server can't satisfy the two-zone policy.
    #[test]
    fn end_version_needs_policy_quorum() {
        let state = old_state(3);
        let durable = HashMap::from([(0, 100)]);
        assert_eq!(end_version(&state, &durable), None);
    }

    /// More servers can only grow the recoverable prefix.
    #[test]
    fn end_version_is_monotone_in_servers() {
        let state = old_state(3);
        let mut durable = HashMap::from([(0, 80), (1, 70)]);
        let first = end_version(&state, &durable).unwrap();
        durable.insert(2, 100);
        let second = end_version(&state, &durable).unwrap();
        assert_eq!(first, 71);
        assert_eq!(second, 81);
        assert!(second >= first);
    }
}
