use crate::log::message::{MessageVersion, Tag, Version};
use crate::log::set::LogSet;
use crate::policy::{Locality, LocalityGroup, ReplicationPolicy};
use super::{PeekCursor, ServerCursor};

use bytes::Bytes;
use futures::future::select_all;
use itertools::Itertools as _;

/// One log set's servers within a [`SetCursor`].
#[derive(Debug)]
struct SetReaders {
    policy: ReplicationPolicy,
    localities: Vec<Locality>,
    read_quorum: usize,
    cursors: Vec<PeekCursor>,
}

impl SetReaders {
    /// The highest version every message below which is provably
    /// durable: walking responders from the most advanced down, the
    /// version at which the accumulated localities first satisfy the
    /// set's policy. None until enough replies arrive.
    fn frontier(&self) -> Option<MessageVersion> {
        let mut group = LocalityGroup::new();
        for (version, index) in self
            .cursors
            .iter()
            .enumerate()
            .map(|(i, c)| (c.version(), i))
            .sorted()
            .rev()
        {
            group.add(&self.localities[index]);
            if group.satisfies(&self.policy) {
                return Some(version);
            }
        }
        None
    }

    /// True while the active servers can still form a read quorum that
    /// satisfies the policy.
    fn is_active(&self) -> bool {
        let mut group = LocalityGroup::new();
        for (index, cursor) in self.cursors.iter().enumerate() {
            if cursor.is_active() {
                group.add(&self.localities[index]);
            }
        }
        group.len() >= self.read_quorum && group.satisfies(&self.policy)
    }
}

/// Merges streams across several log sets, for tags that more than one
/// set may serve (e.g. broadcast tags, or log-router tags during
/// transitions).
///
/// The preferred (owning) set's best server is read directly while
/// healthy. Otherwise the cursor only advances past a version once the
/// localities of the servers that actually replied satisfy some set's
/// replication policy; until then has_message() stays false.
#[derive(Debug)]
pub struct SetCursor {
    sets: Vec<SetReaders>,
    best_set: usize,
    best_server: Option<usize>,
    /// The exposed (set, server) child. Only meaningful with
    /// has_next_message.
    current: (usize, usize),
    message_version: MessageVersion,
    has_next_message: bool,
    no_more: bool,
}

impl SetCursor {
    pub fn new(
        log_sets: &[&LogSet],
        best_set: usize,
        best_server: Option<usize>,
        tag: Tag,
        begin: Version,
        end: MessageVersion,
        parallel_get_more: bool,
    ) -> Self {
        assert!(!log_sets.is_empty(), "set cursor needs at least one log set");
        assert!(best_set < log_sets.len(), "best set {best_set} out of range");
        let sets = log_sets
            .iter()
            .map(|set| SetReaders {
                policy: set.policy.clone(),
                localities: set.localities.clone(),
                read_quorum: set.read_quorum(),
                cursors: set
                    .log_servers
                    .iter()
                    .map(|handle| {
                        PeekCursor::Server(ServerCursor::new(
                            handle.clone(),
                            tag,
                            begin,
                            end,
                            false,
                            parallel_get_more,
                        ))
                    })
                    .collect(),
            })
            .collect();
        Self {
            sets,
            best_set,
            best_server,
            current: (0, 0),
            message_version: MessageVersion::boundary(begin),
            has_next_message: false,
            no_more: false,
        }
    }

    pub fn has_message(&self) -> bool {
        self.has_next_message
    }

    pub fn message(&self) -> Bytes {
        assert!(self.has_next_message, "no message buffered");
        self.sets[self.current.0].cursors[self.current.1].message()
    }

    pub fn tags(&self) -> &[Tag] {
        assert!(self.has_next_message, "no message buffered");
        self.sets[self.current.0].cursors[self.current.1].tags()
    }

    pub fn version(&self) -> MessageVersion {
        self.message_version
    }

    pub fn next_message(&mut self) {
        if self.has_next_message {
            self.message_version.subsequence += 1;
            let (set, server) = self.current;
            self.sets[set].cursors[server].next_message();
        }
        self.recompute();
    }

    pub fn advance_to(&mut self, to: MessageVersion) {
        if to > self.message_version {
            self.message_version = to;
        }
        for cursor in self.cursors_mut() {
            cursor.advance_to(to);
        }
        self.recompute();
    }

    pub async fn get_more(&mut self) {
        assert!(!self.no_more, "get_more on a snapshot cursor");
        if self.has_next_message {
            return;
        }
        loop {
            self.recompute();
            if self.has_next_message {
                return;
            }
            let before = self.message_version;
            // Children already holding a message can't progress until it
            // is consumed; polling them would return immediately.
            let waiting = self
                .cursors_mut()
                .filter(|c| !c.has_message() && !c.is_exhausted() && !c.is_failed())
                .map(|c| Box::pin(c.get_more()))
                .collect_vec();
            if waiting.is_empty() {
                return;
            }
            select_all(waiting).await;
            self.recompute();
            if self.has_next_message || self.message_version != before {
                return;
            }
        }
    }

    /// Resolves once no set's surviving servers can satisfy its policy.
    pub async fn on_failed(&mut self) {
        loop {
            if !self.sets.iter().any(|set| set.is_active()) {
                return;
            }
            let waiting = self
                .cursors_mut()
                .filter(|c| c.is_active())
                .map(|c| Box::pin(c.on_failed()))
                .collect_vec();
            if waiting.is_empty() {
                return;
            }
            select_all(waiting).await;
        }
    }

    pub fn is_active(&self) -> bool {
        !self.is_exhausted() && self.sets.iter().any(|set| set.is_active())
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursors().all(|c| c.is_exhausted())
    }

    pub fn popped(&self) -> Version {
        self.cursors().map(|c| c.popped()).max().unwrap_or(0)
    }

    pub fn max_known_version(&self) -> Version {
        self.cursors().map(|c| c.max_known_version()).max().unwrap_or(0)
    }

    pub fn clone_no_more(&self) -> SetCursor {
        SetCursor {
            sets: self
                .sets
                .iter()
                .map(|set| SetReaders {
                    policy: set.policy.clone(),
                    localities: set.localities.clone(),
                    read_quorum: set.read_quorum,
                    cursors: set.cursors.iter().map(|c| c.clone_no_more()).collect(),
                })
                .collect(),
            best_set: self.best_set,
            best_server: self.best_server,
            current: self.current,
            message_version: self.message_version,
            has_next_message: self.has_next_message,
            no_more: true,
        }
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.cursors().all(|c| c.is_failed() || c.is_exhausted()) && !self.is_exhausted()
    }

    fn cursors(&self) -> impl Iterator<Item = &PeekCursor> {
        self.sets.iter().flat_map(|set| set.cursors.iter())
    }

    fn cursors_mut(&mut self) -> impl Iterator<Item = &mut PeekCursor> {
        self.sets.iter_mut().flat_map(|set| set.cursors.iter_mut())
    }

    /// Recomputes the exposed message and merge frontier.
    fn recompute(&mut self) {
        self.has_next_message = false;

        // Fast path: the owning set's preferred server.
        if let Some(best) = self.best_server {
            let cursor = &mut self.sets[self.best_set].cursors[best];
            cursor.advance_to(self.message_version);
            if cursor.has_message() {
                self.message_version = cursor.version();
                self.current = (self.best_set, best);
                self.has_next_message = true;
                let floor = self.message_version;
                for cursor in self.cursors_mut() {
                    cursor.advance_to(floor);
                }
                return;
            }
        }

        // Policy-checked frontier: the best any single set can prove.
        let Some(frontier) = self.sets.iter().filter_map(|set| set.frontier()).max() else {
            return;
        };
        if frontier > self.message_version {
            self.message_version = frontier;
        }
        let floor = self.message_version;
        for cursor in self.cursors_mut() {
            cursor.advance_to(floor);
        }

        // Expose the earliest buffered message at the frontier,
        // tie-breaking by (set, server) index.
        let exposed = self
            .sets
            .iter()
            .enumerate()
            .flat_map(|(si, set)| {
                set.cursors.iter().enumerate().map(move |(ci, c)| ((si, ci), c))
            })
            .filter(|(_, c)| c.has_message())
            .min_by_key(|((si, ci), c)| (c.version(), *si, *ci));
        if let Some((index, cursor)) = exposed {
            if cursor.version() <= self.message_version {
                self.message_version = cursor.version();
                self.current = index;
                self.has_next_message = true;
            }
        }
    }
}
