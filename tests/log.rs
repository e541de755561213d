//! End-to-end scenarios driving the log subsystem over in-process
//! clusters of in-memory log servers.

use replog::log::{
    recover_and_end_epoch, BestPolicy, CoreState, EpochConfig, LogServerClient, LogSystem,
    MessageVersion, PushData, Rejoin, ServerHandle, ServerId, Tag, Version, WorkerRecruit,
};
use replog::log::state::CoreLogSet;
use replog::policy::{Locality, ReplicationPolicy};
use replog::server::{MemoryLogServer, MemoryServerController};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

/// How long to wait on futures that must complete.
const COMPLETES: Duration = Duration::from_secs(5);

/// How long to wait before declaring that a future (correctly) hangs.
const HANGS: Duration = Duration::from_millis(100);

/// An in-process cluster of memory log servers with controllable
/// membership and acknowledgment.
struct TestCluster {
    servers: Vec<TestServer>,
}

struct TestServer {
    client: LogServerClient,
    controller: MemoryServerController,
    membership: watch::Sender<Option<LogServerClient>>,
    handle: ServerHandle,
    locality: Locality,
}

impl TestCluster {
    /// Starts one server per zone, with ids 0..n.
    fn run(zones: &[&str]) -> Self {
        let mut cluster = Self { servers: Vec::new() };
        for zone in zones {
            cluster.add_server(zone);
        }
        cluster
    }

    /// Starts another server, returning its id.
    fn add_server(&mut self, zone: &str) -> ServerId {
        let id = self.servers.len() as ServerId;
        let locality = Locality::zone(zone);
        let (client, controller) = MemoryLogServer::spawn(id, locality.clone());
        let (membership, handle) = ServerHandle::new(id, Some(client.clone()));
        self.servers.push(TestServer { client, controller, membership, handle, locality });
        id
    }

    fn client(&self, id: ServerId) -> LogServerClient {
        self.servers[id as usize].client.clone()
    }

    fn controller(&self, id: ServerId) -> &MemoryServerController {
        &self.servers[id as usize].controller
    }

    fn handle(&self, id: ServerId) -> ServerHandle {
        self.servers[id as usize].handle.clone()
    }

    fn recruit(&self, id: ServerId) -> WorkerRecruit {
        WorkerRecruit {
            handle: self.handle(id),
            locality: self.servers[id as usize].locality.clone(),
        }
    }

    /// Marks a server as absent, as a failure detector would.
    fn kill(&self, id: ServerId) {
        self.servers[id as usize].membership.send_replace(None);
    }

    /// Core state for a single local log set over servers `ids`.
    fn core_state(
        &self,
        ids: &[ServerId],
        replication_factor: usize,
        anti_quorum: usize,
        policy: ReplicationPolicy,
    ) -> CoreState {
        CoreState {
            log_sets: vec![CoreLogSet {
                servers: ids.to_vec(),
                localities: ids
                    .iter()
                    .map(|&id| self.servers[id as usize].locality.clone())
                    .collect(),
                replication_factor,
                anti_quorum,
                policy,
                best_policy: BestPolicy::Id,
                locality: 0,
                is_local: true,
            }],
            old_epochs: Vec::new(),
            recovery_count: 1,
            begin_version: 0,
            primary_locality: 0,
            remote_locality: 1,
            log_router_tags: 0,
        }
    }

    /// A log system over all current servers as one local set.
    fn system(
        &self,
        replication_factor: usize,
        anti_quorum: usize,
        policy: ReplicationPolicy,
    ) -> Arc<LogSystem> {
        let ids: Vec<ServerId> = (0..self.servers.len() as ServerId).collect();
        let state = self.core_state(&ids, replication_factor, anti_quorum, policy);
        LogSystem::from_core_state(&state, |id, _| self.handle(id))
    }
}

/// Pushes a single tagged message at `version`.
async fn push_one(
    system: &LogSystem,
    prev_version: Version,
    version: Version,
    tag: Tag,
    payload: &[u8],
) {
    let mut data = PushData::new(system);
    data.add_tag(tag);
    data.add_message(payload, false);
    timeout(COMPLETES, system.push(prev_version, version, 0, data))
        .await
        .expect("push timed out")
        .expect("push failed");
}

/// A single-server log set round-trips tagged messages with ordered
/// subsequences, then suspends at the boundary.
#[tokio::test]
async fn single_server_round_trip() {
    let cluster = TestCluster::run(&["a"]);
    let system = cluster.system(1, 0, ReplicationPolicy::One);
    let tag = Tag::new(0, 7);

    let mut data = PushData::new(&system);
    data.add_tag(tag);
    data.add_message(b"a", false);
    data.add_tag(tag);
    data.add_message(b"b", false);
    timeout(COMPLETES, system.push(0, 10, 0, data)).await.unwrap().unwrap();

    let mut cursor = system.peek(10, tag, false);
    timeout(COMPLETES, cursor.get_more()).await.unwrap();
    assert!(cursor.has_message());
    assert_eq!(cursor.version(), MessageVersion::new(10, 1));
    assert_eq!(&cursor.message()[..], b"a");
    assert_eq!(cursor.tags(), &[tag]);

    cursor.next_message();
    assert!(cursor.has_message());
    assert_eq!(cursor.version(), MessageVersion::new(10, 2));
    assert_eq!(&cursor.message()[..], b"b");

    cursor.next_message();
    assert!(!cursor.has_message());
    // Nothing further was pushed: the cursor suspends, parked at a
    // version boundary.
    assert!(timeout(HANGS, cursor.get_more()).await.is_err());
    assert_eq!(cursor.version().subsequence, 0);
}

/// With replication factor 3 and anti-quorum 1, a push is durable on two
/// confirmations, and a quorum-2 merged read serves it from those two.
/// Killing one of them drops the read below its policy: no message.
#[tokio::test]
async fn quorum_read_tolerates_anti_quorum() {
    let cluster = TestCluster::run(&["a", "b", "c"]);
    let system = cluster.system(3, 1, ReplicationPolicy::across_zones(2));
    let tag = Tag::new(0, 1);

    // The third server never acknowledges (nor stores) the push.
    cluster.controller(2).hold_pushes(true);
    push_one(&system, 0, 20, tag, b"m").await;

    let mut cursor = system.peek(20, tag, false);
    timeout(COMPLETES, cursor.get_more()).await.unwrap();
    assert!(cursor.has_message());
    assert_eq!(cursor.version(), MessageVersion::new(20, 1));
    assert_eq!(&cursor.message()[..], b"m");

    // Kill one of the two acking servers: the survivors can no longer
    // prove the quorum, so a fresh read must stay empty.
    cluster.kill(1);
    system.membership_changed();
    let mut cursor = system.peek(20, tag, false);
    assert!(timeout(HANGS, cursor.get_more()).await.is_err());
    assert!(!cursor.has_message());
    assert_eq!(cursor.version().subsequence, 0);
}

/// A push below its confirmation quorum doesn't complete until enough
/// servers acknowledge.
#[tokio::test]
async fn push_waits_for_quorum() {
    let cluster = TestCluster::run(&["a", "b", "c"]);
    let system = cluster.system(3, 1, ReplicationPolicy::across_zones(2));
    let tag = Tag::new(0, 1);

    cluster.controller(1).hold_pushes(true);
    cluster.controller(2).hold_pushes(true);

    let mut data = PushData::new(&system);
    data.add_tag(tag);
    data.add_message(b"m", false);
    let push = system.push(0, 5, 0, data);
    tokio::pin!(push);
    // Only zone a has confirmed: below both the count and the policy.
    assert!(timeout(HANGS, &mut push).await.is_err());

    cluster.controller(1).hold_pushes(false);
    timeout(COMPLETES, &mut push).await.unwrap().unwrap();
}

/// Popping a tag discards messages below the horizon; a later peek
/// reports the pop and yields only messages at or past it.
#[tokio::test]
async fn pop_skips_below_horizon() {
    let cluster = TestCluster::run(&["a"]);
    let system = cluster.system(1, 0, ReplicationPolicy::One);
    let tag = Tag::new(0, 3);

    for version in 1..=100 {
        push_one(&system, version - 1, version, tag, format!("m{version}").as_bytes()).await;
    }
    system.pop(50, tag);
    tokio::task::yield_now().await;

    let mut cursor = system.peek(1, tag, false);
    timeout(COMPLETES, cursor.get_more()).await.unwrap();
    assert!(cursor.popped() >= 50);

    let mut first = None;
    let mut last = 0;
    while cursor.has_message() {
        let version = cursor.version().version;
        first.get_or_insert(version);
        assert!(version >= 50, "popped message {version} leaked");
        last = version;
        cursor.next_message();
    }
    assert_eq!(first, Some(50));
    assert_eq!(last, 100);
}

/// Recovery fences the old epoch, computes its end version, and a new
/// epoch on fresh servers serves reads that span the boundary without
/// gap or reorder.
#[tokio::test]
async fn reads_span_epoch_boundary() {
    let mut cluster = TestCluster::run(&["a", "b", "c"]);
    let system = cluster.system(3, 1, ReplicationPolicy::across_zones(2));
    let tag = Tag::new(0, 5);

    for version in 1..=30 {
        push_one(&system, version - 1, version, tag, format!("m{version}").as_bytes()).await;
    }

    // Recover: fence the old servers as they rejoin and learn the end.
    let (out_tx, mut out_rx) = watch::channel(None);
    let (rejoin_tx, rejoin_rx) = mpsc::unbounded_channel();
    let old_state = system.to_core_state();
    tokio::spawn(async move {
        let _ = recover_and_end_epoch(&out_tx, old_state, rejoin_rx).await;
    });
    for id in 0..3 {
        rejoin_tx.send(Rejoin { id, client: cluster.client(id) }).unwrap();
    }
    let recovered = timeout(COMPLETES, out_rx.wait_for(|system| system.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone()
        .unwrap();
    assert_eq!(recovered.get_end(), 31);

    // The fenced epoch can no longer complete pushes.
    let mut data = PushData::new(&system);
    data.add_tag(tag);
    data.add_message(b"lost", false);
    assert!(timeout(HANGS, system.push(30, 31, 0, data)).await.is_err());

    // Start the next epoch on three fresh servers.
    let recruits: Vec<_> =
        ["a", "b", "c"].iter().map(|zone| cluster.add_server(zone)).collect();
    let config = EpochConfig {
        replication_factor: 3,
        anti_quorum: 1,
        policy: ReplicationPolicy::across_zones(2),
        best_policy: BestPolicy::Id,
        log_router_tags: 0,
        remote: None,
    };
    let new_system = recovered
        .new_epoch(
            recruits.iter().map(|&id| cluster.recruit(id)).collect(),
            Vec::new(),
            &config,
            2,
            0,
            1,
        )
        .unwrap();
    assert_eq!(new_system.begin_version(), 31);
    new_system.core_state_written(&new_system.to_core_state());

    push_one(&new_system, 30, 31, tag, b"m31").await;
    push_one(&new_system, 31, 32, tag, b"m32").await;

    // One cursor reads 1..=32 across the epoch boundary.
    let mut cursor = new_system.peek(1, tag, false);
    for expected in 1..=32u64 {
        timeout(COMPLETES, cursor.get_more()).await.unwrap();
        assert!(cursor.has_message(), "missing version {expected}");
        assert_eq!(cursor.version(), MessageVersion::new(expected, 1));
        assert_eq!(&cursor.message()[..], format!("m{expected}").as_bytes());
        cursor.next_message();
    }
    assert!(!cursor.has_message());
}

/// Parallel get-more pipelines sequenced prefetches and still delivers
/// in order.
#[tokio::test]
async fn parallel_get_more_preserves_order() {
    let cluster = TestCluster::run(&["a"]);
    let system = cluster.system(1, 0, ReplicationPolicy::One);
    let tag = Tag::new(0, 2);

    for version in 1..=20 {
        push_one(&system, version - 1, version, tag, format!("m{version}").as_bytes()).await;
    }

    let mut cursor = system.peek(1, tag, true);
    for expected in 1..=20u64 {
        timeout(COMPLETES, cursor.get_more()).await.unwrap();
        assert!(cursor.has_message());
        assert_eq!(cursor.version(), MessageVersion::new(expected, 1));
        cursor.next_message();
    }
}

/// Ending an epoch surfaces on_error and parks all further pushes
/// forever.
#[tokio::test]
async fn ended_epoch_never_completes_pushes() {
    let cluster = TestCluster::run(&["a"]);
    let system = cluster.system(1, 0, ReplicationPolicy::One);
    let tag = Tag::new(0, 1);

    push_one(&system, 0, 10, tag, b"before").await;
    system.end_epoch();

    assert_eq!(
        timeout(COMPLETES, system.on_error()).await.unwrap(),
        replog::Error::Abort
    );

    let mut data = PushData::new(&system);
    data.add_tag(tag);
    data.add_message(b"after", false);
    assert!(timeout(HANGS, system.push(10, 11, 0, data)).await.is_err());

    // Messages pushed before the end remain visible within the epoch.
    let mut cursor = system.peek(10, tag, false);
    timeout(COMPLETES, cursor.get_more()).await.unwrap();
    assert!(cursor.has_message());
    assert_eq!(&cursor.message()[..], b"before");
}

/// A snapshot clone reads the buffered messages but refuses to fetch.
#[tokio::test]
async fn snapshot_clone_reads_without_fetching() {
    let cluster = TestCluster::run(&["a"]);
    let system = cluster.system(1, 0, ReplicationPolicy::One);
    let tag = Tag::new(0, 4);

    push_one(&system, 0, 10, tag, b"a").await;

    let mut cursor = system.peek(10, tag, false);
    timeout(COMPLETES, cursor.get_more()).await.unwrap();
    let mut snapshot = cursor.clone_no_more();
    assert!(snapshot.has_message());
    assert_eq!(&snapshot.message()[..], b"a");
    snapshot.next_message();
    assert!(!snapshot.has_message());

    // The original is unaffected by the clone's advance.
    assert!(cursor.has_message());
    assert_eq!(cursor.version(), MessageVersion::new(10, 1));
}

/// confirm_epoch_live succeeds while the epoch is writable and hangs
/// once its servers are fenced by a newer recovery.
#[tokio::test]
async fn confirm_epoch_live_tracks_fencing() {
    let cluster = TestCluster::run(&["a", "b", "c"]);
    let system = cluster.system(3, 1, ReplicationPolicy::across_zones(2));
    timeout(COMPLETES, system.confirm_epoch_live()).await.unwrap().unwrap();

    for id in 0..3 {
        cluster.client(id).lock(2).await.unwrap();
    }
    assert!(timeout(HANGS, system.confirm_epoch_live()).await.is_err());
}

/// Concurrent pushes are serialized by the version gate: every server
/// sees every version in order, and a reader sees the commits in commit
/// order.
#[tokio::test]
async fn pipelined_pushes_keep_fifo() {
    let cluster = TestCluster::run(&["a", "b", "c"]);
    let system = cluster.system(3, 0, ReplicationPolicy::across_zones(3));
    let tag = Tag::new(0, 1);

    let pushes = (1..=10u64).map(|version| {
        let system = system.clone();
        async move {
            let mut data = PushData::new(&system);
            data.add_tag(tag);
            data.add_message(format!("m{version}").as_bytes(), false);
            system.push(version - 1, version, 0, data).await
        }
    });
    for result in timeout(COMPLETES, futures::future::join_all(pushes)).await.unwrap() {
        result.unwrap();
    }

    let mut cursor = system.peek(1, tag, false);
    for expected in 1..=10u64 {
        timeout(COMPLETES, cursor.get_more()).await.unwrap();
        assert!(cursor.has_message());
        assert_eq!(cursor.version(), MessageVersion::new(expected, 1));
        assert_eq!(&cursor.message()[..], format!("m{expected}").as_bytes());
        cursor.next_message();
    }
}

/// Tags outside every set's scope still replicate by policy, and are
/// readable through a policy-checked cross-set cursor.
#[tokio::test]
async fn out_of_scope_tag_reads_by_policy() {
    let cluster = TestCluster::run(&["a", "b", "c"]);
    let system = cluster.system(3, 1, ReplicationPolicy::across_zones(2));
    let tag = Tag::new(5, 0);

    push_one(&system, 0, 10, tag, b"m").await;
    let mut cursor = system.peek(10, tag, false);
    timeout(COMPLETES, cursor.get_more()).await.unwrap();
    assert!(cursor.has_message());
    assert_eq!(cursor.version(), MessageVersion::new(10, 1));
    assert_eq!(&cursor.message()[..], b"m");
}

/// popped() never regresses as the cursor advances (here across a pop
/// that lands mid-read).
#[tokio::test]
async fn popped_is_monotonic() {
    let cluster = TestCluster::run(&["a"]);
    let system = cluster.system(1, 0, ReplicationPolicy::One);
    let tag = Tag::new(0, 6);

    for version in 1..=10 {
        push_one(&system, version - 1, version, tag, b"x").await;
    }
    system.pop(3, tag);
    tokio::task::yield_now().await;

    let mut cursor = system.peek(1, tag, false);
    let mut popped = 0;
    for _ in 0..8 {
        timeout(COMPLETES, cursor.get_more()).await.unwrap();
        assert!(cursor.has_message());
        assert!(cursor.popped() >= popped, "popped() regressed");
        popped = cursor.popped();
        cursor.next_message();
    }
    assert_eq!(popped, 3);
}
