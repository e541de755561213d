use crate::log::interface::ServerHandle;
use crate::log::message::{MessageVersion, Tag, Version};
use super::{PeekCursor, ServerCursor};

use bytes::Bytes;
use futures::future::select_all;
use itertools::Itertools as _;

/// Merges the per-server streams of one log set into a single ordered
/// stream, under the set's read quorum Q (replication factor minus
/// anti-quorum).
///
/// The merge frontier is the Q-th smallest child `version()`. Every
/// durably-pushed message reached at least Q of the children, and a
/// child's version only passes a message it has already yielded, so at
/// most Q − 1 of the children below the frontier can be missing any
/// given durable message — at least one child at or past the frontier
/// already surfaced it. It is therefore safe to advance every child to
/// the frontier and expose the earliest buffered message at it.
///
/// When the merge stalls, the frontier is some child's version with no
/// message behind it, which is always a version boundary (subsequence
/// 0): a child with a buffered message at the frontier would have been
/// exposed instead.
#[derive(Debug)]
pub struct MergedCursor {
    cursors: Vec<PeekCursor>,
    /// The preferred server for the tag, which holds every message and
    /// short-circuits the order-statistic merge while it is healthy.
    best_server: Option<usize>,
    read_quorum: usize,
    /// The child currently exposed. Only meaningful with
    /// has_next_message.
    current: usize,
    message_version: MessageVersion,
    has_next_message: bool,
    no_more: bool,
}

impl MergedCursor {
    pub fn new(
        handles: &[ServerHandle],
        best_server: Option<usize>,
        read_quorum: usize,
        tag: Tag,
        begin: Version,
        end: MessageVersion,
        parallel_get_more: bool,
    ) -> Self {
        assert!(!handles.is_empty(), "merged cursor needs at least one server");
        assert!(
            read_quorum >= 1 && read_quorum <= handles.len(),
            "read quorum {read_quorum} not in 1..={}",
            handles.len()
        );
        if let Some(best) = best_server {
            assert!(best < handles.len(), "best server {best} out of range");
        }
        let cursors = handles
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
            .collect();
        Self {
            cursors,
            best_server,
            read_quorum,
            current: 0,
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
        self.cursors[self.current].message()
    }

    pub fn tags(&self) -> &[Tag] {
        assert!(self.has_next_message, "no message buffered");
        self.cursors[self.current].tags()
    }

    pub fn version(&self) -> MessageVersion {
        self.message_version
    }

    pub fn next_message(&mut self) {
        if self.has_next_message {
            // Move the floor past the delivered message so no other
            // child re-offers its copy.
            self.message_version.subsequence += 1;
            self.cursors[self.current].next_message();
        }
        self.recompute();
    }

    pub fn advance_to(&mut self, to: MessageVersion) {
        if to > self.message_version {
            self.message_version = to;
        }
        for cursor in &mut self.cursors {
            cursor.advance_to(self.message_version);
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
            // Wait for any child to make progress: any version change
            // can shift the order statistic. Children that already hold
            // a message can't progress until it is consumed, so they
            // are left out (their get_more would return immediately).
            let waiting = self
                .cursors
                .iter_mut()
                .filter(|c| !c.has_message() && !c.is_exhausted() && !c.is_failed())
                .map(|c| Box::pin(c.get_more()))
                .collect_vec();
            if waiting.is_empty() {
                return; // nothing can ever change again
            }
            select_all(waiting).await;
            self.recompute();
            if self.has_next_message || self.message_version != before {
                return;
            }
        }
    }

    /// Resolves once too few children remain active to form the read
    /// quorum.
    pub async fn on_failed(&mut self) {
        loop {
            if self.active_children() < self.read_quorum {
                return;
            }
            let waiting = self
                .cursors
                .iter_mut()
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
        !self.is_exhausted() && self.active_children() >= self.read_quorum
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursors.iter().all(|c| c.is_exhausted())
    }

    pub fn popped(&self) -> Version {
        self.cursors.iter().map(|c| c.popped()).max().unwrap_or(0)
    }

    pub fn max_known_version(&self) -> Version {
        self.cursors.iter().map(|c| c.max_known_version()).max().unwrap_or(0)
    }

    pub fn clone_no_more(&self) -> MergedCursor {
        MergedCursor {
            cursors: self.cursors.iter().map(|c| c.clone_no_more()).collect(),
            best_server: self.best_server,
            read_quorum: self.read_quorum,
            current: self.current,
            message_version: self.message_version,
            has_next_message: self.has_next_message,
            no_more: true,
        }
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.cursors.iter().all(|c| c.is_failed() || c.is_exhausted())
            && !self.is_exhausted()
    }

    fn active_children(&self) -> usize {
        self.cursors.iter().filter(|c| c.is_active()).count()
    }

    /// Recomputes the exposed message and merge frontier.
    fn recompute(&mut self) {
        self.has_next_message = false;

        // Fast path: the best server holds every message for the tag, so
        // while it has one buffered the order statistic is unnecessary,
        // and when it is drained its version bounds what any other child
        // can still hold.
        if let Some(best) = self.best_server {
            self.cursors[best].advance_to(self.message_version);
            if self.cursors[best].has_message() {
                self.message_version = self.cursors[best].version();
                self.current = best;
                self.has_next_message = true;
                for (i, cursor) in self.cursors.iter_mut().enumerate() {
                    if i != best {
                        cursor.advance_to(self.message_version);
                    }
                }
                return;
            }
            // The best server is drained: nothing for this tag exists
            // below its version, so the others may skip to it.
            let best_version = self.cursors[best].version();
            for cursor in &mut self.cursors {
                cursor.advance_to(best_version);
            }
        }

        // The frontier: at least Q children have reported everything
        // they have below the Q-th smallest version.
        let frontier = self
            .cursors
            .iter()
            .map(|c| c.version())
            .sorted()
            .nth(self.read_quorum - 1)
            .expect("read quorum exceeds children");
        if frontier > self.message_version {
            self.message_version = frontier;
        }
        for cursor in &mut self.cursors {
            cursor.advance_to(self.message_version);
        }

        // Expose the earliest buffered message at the frontier,
        // tie-breaking deterministically by child index.
        let exposed = self
            .cursors
            .iter()
            .enumerate()
            .filter(|(_, c)| c.has_message())
            .min_by_key(|(i, c)| (c.version(), *i));
        if let Some((i, cursor)) = exposed {
            if cursor.version() <= self.message_version {
                self.message_version = cursor.version();
                self.current = i;
                self.has_next_message = true;
            }
        }
    }
}
