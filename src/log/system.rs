use crate::error::{Error, Result};
use crate::policy::{Locality, ReplicationPolicy};
use super::cursor::{MergedCursor, MultiCursor, PeekCursor, ServerCursor, SetCursor};
use super::interface::{PushRequest, ServerHandle, ServerId};
use super::message::{Epoch, MessageVersion, Tag, Version, TAG_LOCALITY_LOG_ROUTER};
use super::push::PushData;
use super::set::{BestPolicy, LogSet};
use super::state::{CoreLogSet, CoreState, OldEpochState};

use ::log::{debug, info};
use futures::stream::{FuturesUnordered, StreamExt as _};
use rand::Rng as _;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// A prior epoch retained in memory so reads can span epoch boundaries.
#[derive(Clone, Debug)]
pub struct OldEpoch {
    pub epoch: Epoch,
    pub sets: Vec<LogSet>,
    pub begin_version: Version,
    /// The first version of the successor epoch.
    pub end_version: Version,
}

/// Configuration for a new epoch's log sets.
#[derive(Clone, Debug)]
pub struct EpochConfig {
    pub replication_factor: usize,
    pub anti_quorum: usize,
    pub policy: ReplicationPolicy,
    pub best_policy: BestPolicy,
    /// How many log-router tags remote-bound messages spread over; 0
    /// disables remote routing.
    pub log_router_tags: u32,
    pub remote: Option<RemoteConfig>,
}

/// Replication settings for the remote region's log set.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub replication_factor: usize,
    pub policy: ReplicationPolicy,
}

/// A recruited log worker for a new epoch.
#[derive(Clone, Debug)]
pub struct WorkerRecruit {
    pub handle: ServerHandle,
    pub locality: Locality,
}

/// One epoch of the replicated log: owns the epoch's log sets (and its
/// predecessors' for reads), dispatches pushes and peeks, and exposes
/// the epoch lifecycle.
///
/// A log system is shared between push producers and peek consumers via
/// `Arc`; cursors hold only the server handles they read from, not the
/// system itself. All mutable state is behind short non-async critical
/// sections, so pushes, peeks, and recovery interleave freely at their
/// await points.
pub struct LogSystem {
    id: u64,
    epoch: Epoch,
    begin_version: Version,
    /// Set on systems produced by recovery: the first unreadable
    /// version. Such systems are read-only until new_epoch.
    epoch_end: Option<Version>,
    primary_locality: i8,
    remote_locality: i8,
    log_router_tags: u32,
    sets: Mutex<Vec<LogSet>>,
    old_epochs: Mutex<Vec<OldEpoch>>,
    /// The push gate: the last version handed to the servers. A push
    /// waits here for its predecessor, which is what keeps per-server
    /// deliveries in version order.
    version: watch::Sender<Version>,
    stopped: watch::Sender<bool>,
    core_written: AtomicBool,
    config_changed: watch::Sender<u64>,
    core_changed: watch::Sender<u64>,
    error: watch::Sender<Option<Error>>,
}

/// Never resolves. Pushes and confirmations park here once they can no
/// longer complete in this epoch, per the contract that they never
/// return rather than fail.
async fn never<T>() -> T {
    futures::future::pending().await
}

impl LogSystem {
    /// Reconstructs a log system from durable core state, resolving
    /// server ids to handles via `resolve` (cluster membership is out of
    /// scope and injected). The result accepts pushes.
    pub fn from_core_state(
        state: &CoreState,
        resolve: impl Fn(ServerId, &Locality) -> ServerHandle,
    ) -> Arc<Self> {
        Self::assemble(state, None, &resolve)
    }

    /// Reconstructs a recovered (read-only) log system that can peek
    /// everything strictly below `end_version`. Produced by recovery;
    /// writes are refused until [`Self::new_epoch`].
    pub fn recovered(
        state: &CoreState,
        end_version: Version,
        resolve: impl Fn(ServerId, &Locality) -> ServerHandle,
    ) -> Arc<Self> {
        Self::assemble(state, Some(end_version), &resolve)
    }

    fn assemble(
        state: &CoreState,
        epoch_end: Option<Version>,
        resolve: &dyn Fn(ServerId, &Locality) -> ServerHandle,
    ) -> Arc<Self> {
        assert!(!state.log_sets.is_empty(), "core state has no log sets");
        let build_set = |core: &CoreLogSet| {
            assert_eq!(
                core.servers.len(),
                core.localities.len(),
                "core state server and locality counts differ"
            );
            let handles = core
                .servers
                .iter()
                .zip(&core.localities)
                .map(|(id, locality)| resolve(*id, locality))
                .collect();
            LogSet::new(
                handles,
                core.localities.clone(),
                core.replication_factor,
                core.anti_quorum,
                core.policy.clone(),
                core.best_policy,
                core.locality,
                core.is_local,
            )
        };
        let sets = state.log_sets.iter().map(&build_set).collect();
        let old_epochs = state
            .old_epochs
            .iter()
            .map(|old| OldEpoch {
                epoch: old.epoch,
                sets: old.log_sets.iter().map(&build_set).collect(),
                begin_version: old.begin_version,
                end_version: old.end_version,
            })
            .collect();
        Arc::new(Self {
            id: rand::random(),
            epoch: state.recovery_count,
            begin_version: state.begin_version,
            epoch_end,
            primary_locality: state.primary_locality,
            remote_locality: state.remote_locality,
            log_router_tags: state.log_router_tags,
            sets: Mutex::new(sets),
            old_epochs: Mutex::new(old_epochs),
            version: watch::channel(state.begin_version.saturating_sub(1)).0,
            stopped: watch::channel(false).0,
            core_written: AtomicBool::new(false),
            config_changed: watch::channel(0).0,
            core_changed: watch::channel(0).0,
            error: watch::channel(None).0,
        })
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn begin_version(&self) -> Version {
        self.begin_version
    }

    /// The first unreadable version of a recovered log system. Panics on
    /// a system that wasn't produced by recovery.
    pub fn get_end(&self) -> Version {
        self.epoch_end.expect("get_end on a log system that was not recovered")
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    pub fn has_remote_logs(&self) -> bool {
        self.current_sets().iter().any(|set| !set.is_local)
    }

    pub fn log_router_tags(&self) -> u32 {
        self.log_router_tags
    }

    /// A uniformly random router tag. Panics when no routers are
    /// configured.
    pub fn random_router_tag(&self) -> Tag {
        assert!(self.log_router_tags > 0, "no log router tags configured");
        Tag::new(TAG_LOCALITY_LOG_ROUTER, rand::thread_rng().gen_range(0..self.log_router_tags))
    }

    /// Snapshots the local log sets, in placement order. The push
    /// accumulator stages one buffer per server across these.
    pub fn local_sets(&self) -> Vec<LogSet> {
        self.current_sets().iter().filter(|set| set.is_local).cloned().collect()
    }

    /// Computes placement for a tag set across all local log sets, with
    /// each set's indexes offset into a disjoint range.
    pub fn get_push_locations(&self, tags: &[Tag], locations: &mut Vec<usize>) {
        let sets = self.current_sets();
        let mut offset = 0;
        for set in sets.iter().filter(|set| set.is_local) {
            set.get_push_locations(tags, locations, offset);
            offset += set.log_servers.len();
        }
    }

    /// Pushes one commit's staged messages at `version`.
    ///
    /// Waits for all pushes ordered earlier (the gate must reach
    /// `prev_version`), hands every local server its payload, then
    /// completes once each local set's confirming servers satisfy the
    /// set's policy with anti-quorum slack. If the epoch has ended, the
    /// push never completes; its messages may still become visible in
    /// this epoch but in no later one.
    pub async fn push(
        &self,
        prev_version: Version,
        version: Version,
        known_committed_version: Version,
        mut data: PushData,
    ) -> Result<()> {
        if self.epoch_end.is_some() {
            return Err(Error::ReadOnly);
        }
        assert!(version > prev_version, "push version {version} not after {prev_version}");

        let mut gate = self.version.subscribe();
        loop {
            let at = *gate.borrow_and_update();
            if at == prev_version {
                break;
            }
            assert!(
                at < prev_version,
                "push at {version} expects the gate at {prev_version}, but it passed {at}"
            );
            if gate.changed().await.is_err() {
                return never().await;
            }
        }
        if self.is_stopped() {
            return never().await;
        }

        // Send every local server its payload (possibly empty, so its
        // frontier advances), then open the gate so the next push can
        // pipeline behind this one. Sends happen under the gate without
        // yielding, which keeps them in version order per server.
        let acks = FuturesUnordered::new();
        let unsatisfied: HashSet<usize> = {
            let sets = self.current_sets();
            let mut location = 0;
            for (set_index, set) in sets.iter().enumerate() {
                if !set.is_local {
                    continue;
                }
                for (server_index, handle) in set.log_servers.iter().enumerate() {
                    let (messages, tags) = data.take_location(location);
                    location += 1;
                    let Some(client) = handle.get() else { continue };
                    let request = PushRequest {
                        epoch: self.epoch,
                        prev_version,
                        version,
                        known_committed_version,
                        messages,
                        tags,
                    };
                    if let Ok(ack) = client.push(request) {
                        acks.push(async move { (set_index, server_index, ack.await) });
                    }
                }
            }
            debug_assert_eq!(location, data.location_count(), "push data is for another topology");
            sets.iter().enumerate().filter(|(_, set)| set.is_local).map(|(i, _)| i).collect()
        };
        self.version.send_replace(version);

        let acks = acks.map(|(set, server, ack)| (set, server, matches!(ack, Ok(Ok(_)))));
        if !self.await_quorums(acks, unsatisfied).await {
            // Not enough healthy servers to confirm durability; only a
            // recovery can resolve this push now.
            info!("push {version} cannot reach quorum in epoch {}", self.epoch);
            return never().await;
        }
        if self.is_stopped() {
            return never().await;
        }
        debug!("push {version} durable in epoch {}", self.epoch);
        Ok(())
    }

    /// Confirms that pushes in the current epoch are still possible,
    /// by reaching a policy quorum of unfenced servers in every local
    /// set. Never returns once the epoch is dead.
    pub async fn confirm_epoch_live(&self) -> Result<()> {
        if self.epoch_end.is_some() {
            return Err(Error::ReadOnly);
        }
        if self.is_stopped() {
            return never().await;
        }
        let acks = FuturesUnordered::new();
        let unsatisfied: HashSet<usize> = {
            let sets = self.current_sets();
            for (set_index, set) in sets.iter().enumerate() {
                if !set.is_local {
                    continue;
                }
                for (server_index, handle) in set.log_servers.iter().enumerate() {
                    let Some(client) = handle.get() else { continue };
                    let epoch = self.epoch;
                    acks.push(async move {
                        (set_index, server_index, client.confirm(epoch).await)
                    });
                }
            }
            sets.iter().enumerate().filter(|(_, set)| set.is_local).map(|(i, _)| i).collect()
        };
        let acks = acks.map(|(set, server, ack)| (set, server, ack.is_ok()));
        if !self.await_quorums(acks, unsatisfied).await {
            return never().await;
        }
        Ok(())
    }

    /// Waits until every set in `unsatisfied` has collected confirming
    /// servers that satisfy its policy with anti-quorum slack. False if
    /// the ack stream ran dry first.
    async fn await_quorums(
        &self,
        mut acks: impl futures::Stream<Item = (usize, usize, bool)> + Unpin,
        mut unsatisfied: HashSet<usize>,
    ) -> bool {
        let mut confirmed: Vec<Vec<usize>> = Vec::new();
        while !unsatisfied.is_empty() {
            match acks.next().await {
                Some((set_index, server_index, true)) => {
                    if confirmed.len() <= set_index {
                        confirmed.resize(set_index + 1, Vec::new());
                    }
                    confirmed[set_index].push(server_index);
                    if self.current_sets()[set_index].satisfies(&confirmed[set_index]) {
                        unsatisfied.remove(&set_index);
                    }
                }
                // A dropped or refused ack; the anti-quorum absorbs it.
                Some((_, _, false)) => {}
                None => return false,
            }
        }
        true
    }

    /// Returns a cursor over messages with the given tag and versions
    /// at or past `begin`, merged and ordered per the replication
    /// policies involved. Reads spanning the epoch begin chain the
    /// prior epochs' cursors in front via a multi cursor.
    pub fn peek(&self, begin: Version, tag: Tag, parallel_get_more: bool) -> PeekCursor {
        let end =
            self.epoch_end.map(MessageVersion::boundary).unwrap_or(MessageVersion::MAX);
        // Snapshot the prior epochs so we never hold both locks at once.
        let old_epochs: Vec<OldEpoch> = self.prior_epochs().clone();
        if begin >= self.begin_version || old_epochs.is_empty() {
            return Self::epoch_cursor(&self.current_sets(), tag, begin, end, parallel_get_more);
        }
        let mut cursors = Vec::new();
        let mut epoch_ends = Vec::new();
        for old in old_epochs.iter().filter(|old| old.end_version > begin) {
            cursors.push(Self::epoch_cursor(
                &old.sets,
                tag,
                begin.max(old.begin_version),
                MessageVersion::boundary(old.end_version),
                parallel_get_more,
            ));
            epoch_ends.push(MessageVersion::boundary(old.end_version));
        }
        cursors.push(Self::epoch_cursor(
            &self.current_sets(),
            tag,
            self.begin_version,
            end,
            parallel_get_more,
        ));
        if cursors.len() == 1 {
            return cursors.remove(0);
        }
        PeekCursor::Multi(MultiCursor::new(cursors, epoch_ends))
    }

    /// Like [`Self::peek`], but reads only the tag's preferred server,
    /// which holds every message for the tag and makes the read
    /// correspondingly cheaper. `history` lists the tag's earlier
    /// assignments as (end version, tag) pairs for consumers whose tag
    /// changed across epochs.
    pub fn peek_single(
        &self,
        begin: Version,
        tag: Tag,
        mut history: Vec<(Version, Tag)>,
    ) -> PeekCursor {
        history.retain(|(end, _)| *end > begin);
        if history.is_empty() {
            return self.best_single(begin, tag);
        }
        history.sort_by_key(|(end, _)| *end);
        let mut cursors = Vec::new();
        let mut epoch_ends = Vec::new();
        let mut from = begin;
        for (end, old_tag) in history {
            cursors.push(self.peek(from, old_tag, false));
            epoch_ends.push(MessageVersion::boundary(end));
            from = end;
        }
        cursors.push(self.best_single(from, tag));
        PeekCursor::Multi(MultiCursor::new(cursors, epoch_ends))
    }

    /// Advises that messages below `up_to` for `tag` are no longer
    /// needed. The hint fans out to every server of every set serving
    /// the tag, in this epoch and prior ones; prior epochs popped
    /// entirely past their end are dropped from the core state.
    pub fn pop(&self, up_to: Version, tag: Tag) {
        for set in self.current_sets().iter().filter(|set| set.serves(tag)) {
            for handle in &set.log_servers {
                if let Some(client) = handle.get() {
                    client.pop(tag, up_to);
                }
            }
        }
        let dropped = {
            let mut old_epochs = self.prior_epochs();
            for old in old_epochs.iter() {
                for set in old.sets.iter().filter(|set| set.serves(tag)) {
                    for handle in &set.log_servers {
                        if let Some(client) = handle.get() {
                            client.pop(tag, up_to);
                        }
                    }
                }
            }
            let before = old_epochs.len();
            old_epochs.retain(|old| old.end_version > up_to);
            before - old_epochs.len()
        };
        if dropped > 0 {
            debug!("pop {up_to} released {dropped} old epochs");
            self.core_changed.send_modify(|generation| *generation += 1);
        }
    }

    /// Ends the epoch: no further push or confirmation will complete,
    /// though in-flight messages may still become visible to this
    /// epoch's readers.
    pub fn end_epoch(&self) {
        if self.stopped.send_replace(true) {
            return;
        }
        info!("log epoch {} ended", self.epoch);
        self.error.send_replace(Some(Error::Abort));
        self.config_changed.send_modify(|generation| *generation += 1);
        self.core_changed.send_modify(|generation| *generation += 1);
    }

    /// Starts the epoch after this recovered one, on freshly recruited
    /// workers. The result is provisional until the caller persists its
    /// core state and calls [`Self::core_state_written`]; a concurrent
    /// recovery may supersede it before then.
    pub fn new_epoch(
        &self,
        recruits: Vec<WorkerRecruit>,
        remote_recruits: Vec<WorkerRecruit>,
        config: &EpochConfig,
        recovery_count: Epoch,
        primary_locality: i8,
        remote_locality: i8,
    ) -> Result<Arc<LogSystem>> {
        let end = self.get_end();
        assert!(
            recovery_count > self.epoch,
            "new epoch {recovery_count} must follow {}",
            self.epoch
        );
        if recruits.len() < config.replication_factor {
            return errinput!(
                "recruited {} log servers for replication factor {}",
                recruits.len(),
                config.replication_factor
            );
        }
        let (handles, localities): (Vec<_>, Vec<_>) =
            recruits.into_iter().map(|recruit| (recruit.handle, recruit.locality)).unzip();
        let mut sets = vec![LogSet::new(
            handles,
            localities,
            config.replication_factor,
            config.anti_quorum,
            config.policy.clone(),
            config.best_policy,
            primary_locality,
            true,
        )];
        if !remote_recruits.is_empty() {
            let Some(remote) = &config.remote else {
                return errinput!("remote recruits without a remote configuration");
            };
            let (handles, localities): (Vec<_>, Vec<_>) = remote_recruits
                .into_iter()
                .map(|recruit| (recruit.handle, recruit.locality))
                .unzip();
            sets.push(LogSet::new(
                handles,
                localities,
                remote.replication_factor,
                0,
                remote.policy.clone(),
                config.best_policy,
                remote_locality,
                false,
            ));
        }

        // Chain this epoch (and its ancestors) behind the new one for
        // reads below the boundary.
        let mut old_epochs = self.prior_epochs().clone();
        old_epochs.push(OldEpoch {
            epoch: self.epoch,
            sets: self.current_sets().clone(),
            begin_version: self.begin_version,
            end_version: end,
        });

        info!("starting log epoch {recovery_count} at version {end}");
        Ok(Arc::new(LogSystem {
            id: rand::random(),
            epoch: recovery_count,
            begin_version: end,
            epoch_end: None,
            primary_locality,
            remote_locality,
            log_router_tags: config.log_router_tags,
            sets: Mutex::new(sets),
            old_epochs: Mutex::new(old_epochs),
            version: watch::channel(end.saturating_sub(1)).0,
            stopped: watch::channel(false).0,
            core_written: AtomicBool::new(false),
            config_changed: watch::channel(0).0,
            core_changed: watch::channel(0).0,
            error: watch::channel(None).0,
        }))
    }

    /// Projects the durable core state for this epoch.
    pub fn to_core_state(&self) -> CoreState {
        fn core_set(set: &LogSet) -> CoreLogSet {
            CoreLogSet {
                servers: set.log_servers.iter().map(|handle| handle.id()).collect(),
                localities: set.localities.clone(),
                replication_factor: set.replication_factor,
                anti_quorum: set.anti_quorum,
                policy: set.policy.clone(),
                best_policy: set.best_policy,
                locality: set.locality,
                is_local: set.is_local,
            }
        }
        CoreState {
            log_sets: self.current_sets().iter().map(core_set).collect(),
            old_epochs: self
                .prior_epochs()
                .iter()
                .map(|old| OldEpochState {
                    epoch: old.epoch,
                    log_sets: old.sets.iter().map(core_set).collect(),
                    begin_version: old.begin_version,
                    end_version: old.end_version,
                })
                .collect(),
            recovery_count: self.epoch,
            begin_version: self.begin_version,
            primary_locality: self.primary_locality,
            remote_locality: self.remote_locality,
            log_router_tags: self.log_router_tags,
        }
    }

    /// Called once the coordinator service has durably persisted the
    /// given core state: the epoch stops being provisional, and prior
    /// epochs the persisted state no longer names are released.
    pub fn core_state_written(&self, state: &CoreState) {
        assert_eq!(state.recovery_count, self.epoch, "core state is from another epoch");
        self.core_written.store(true, Ordering::SeqCst);
        let retained: HashSet<Epoch> = state.old_epochs.iter().map(|old| old.epoch).collect();
        self.prior_epochs().retain(|old| retained.contains(&old.epoch));
        self.core_changed.send_modify(|generation| *generation += 1);
    }

    pub fn is_core_state_written(&self) -> bool {
        self.core_written.load(Ordering::SeqCst)
    }

    /// Records a membership change (a server failed or rejoined):
    /// rebuilds the derived locality sets and wakes config-change
    /// waiters. Membership itself is out of scope; whoever flips the
    /// server handles calls this.
    pub fn membership_changed(&self) {
        for set in self.current_sets().iter_mut() {
            set.update_locality_set();
        }
        for old in self.prior_epochs().iter_mut() {
            for set in &mut old.sets {
                set.update_locality_set();
            }
        }
        self.config_changed.send_modify(|generation| *generation += 1);
    }

    /// Resolves when the output of [`Self::to_core_state`] changes, e.g.
    /// when prior epochs can be dropped from it.
    pub async fn on_core_state_changed(&self) {
        let mut rx = self.core_changed.subscribe();
        let _ = rx.changed().await;
    }

    /// Resolves when the log system configuration changes due to a
    /// server failing or rejoining.
    pub async fn on_config_change(&self) {
        let mut rx = self.config_changed.subscribe();
        let _ = rx.changed().await;
    }

    /// Resolves only if the subsystem stops working, e.g. because the
    /// epoch ended or was superseded by a newer recovery. Callers plumb
    /// this to their top-level supervisor; all other failures surface as
    /// cursor inactivity or push non-completion.
    pub async fn on_error(&self) -> Error {
        let mut rx = self.error.subscribe();
        loop {
            if let Some(error) = rx.borrow_and_update().clone() {
                return error;
            }
            if rx.changed().await.is_err() {
                return Error::Abort;
            }
        }
    }

    /// Builds a cursor over one epoch's log sets.
    fn epoch_cursor(
        sets: &[LogSet],
        tag: Tag,
        begin: Version,
        end: MessageVersion,
        parallel_get_more: bool,
    ) -> PeekCursor {
        let serving: Vec<&LogSet> = sets.iter().filter(|set| set.serves(tag)).collect();
        match serving.len() {
            // No set owns the tag here (e.g. a tag homed in another
            // region): fall back to a policy-checked read across all.
            0 => {
                let all: Vec<&LogSet> = sets.iter().collect();
                PeekCursor::Set(SetCursor::new(&all, 0, None, tag, begin, end, parallel_get_more))
            }
            1 => {
                let set = serving[0];
                PeekCursor::Merged(MergedCursor::new(
                    &set.log_servers,
                    set.best_location_for(tag),
                    set.read_quorum(),
                    tag,
                    begin,
                    end,
                    parallel_get_more,
                ))
            }
            _ => {
                let best_set = serving
                    .iter()
                    .position(|set| set.locality == tag.locality)
                    .or_else(|| serving.iter().position(|set| set.is_local))
                    .unwrap_or(0);
                let best_server = serving[best_set].best_location_for(tag);
                PeekCursor::Set(SetCursor::new(
                    &serving,
                    best_set,
                    best_server,
                    tag,
                    begin,
                    end,
                    parallel_get_more,
                ))
            }
        }
    }

    /// A single-server cursor on the tag's preferred server in the
    /// current epoch, falling back to a merged read when the best policy
    /// doesn't name one.
    fn best_single(&self, begin: Version, tag: Tag) -> PeekCursor {
        let end =
            self.epoch_end.map(MessageVersion::boundary).unwrap_or(MessageVersion::MAX);
        let sets = self.current_sets();
        for set in sets.iter().filter(|set| set.serves(tag)) {
            if let Some(best) = set.best_location_for(tag) {
                return PeekCursor::Server(ServerCursor::new(
                    set.log_servers[best].clone(),
                    tag,
                    begin,
                    end,
                    false,
                    true,
                ));
            }
        }
        Self::epoch_cursor(&sets, tag, begin, end, false)
    }

    fn current_sets(&self) -> MutexGuard<'_, Vec<LogSet>> {
        self.sets.lock().expect("mutex poisoned")
    }

    fn prior_epochs(&self) -> MutexGuard<'_, Vec<OldEpoch>> {
        self.old_epochs.lock().expect("mutex poisoned")
    }
}

impl std::fmt::Display for LogSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "log system {:#x} epoch {}", self.id, self.epoch)
    }
}
