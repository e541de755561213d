//! Peek cursors: composable, version-ordered views of one tag's message
//! stream.
//!
//! All variants implement one contract:
//!
//! * `has_message()` is true iff a message is buffered and ready. It is
//!   only ever false at a version boundary, i.e. when `version()` has
//!   subsequence 0: a cursor either has the next message of the current
//!   version or has moved to the next version.
//! * `version()` is the smallest possible (version, subsequence) of the
//!   current or next message, and never decreases.
//! * `next_message()` advances past the current message; `advance_to(v)`
//!   skips ahead, dropping messages strictly before `v`.
//! * `get_more()` suspends until `has_message()` or `version()` could
//!   have changed; `on_failed()` suspends until the underlying servers
//!   are gone.
//! * `popped()` is a lower bound on message versions the cursor may have
//!   skipped because they were popped; callers compare it against their
//!   own read position to detect (and tolerate) the gap.
//! * `clone_no_more()` snapshots the cursor cheaply; the clone can be
//!   read and advanced through its buffered messages, but calling
//!   `get_more()` on it is an error.
//!
//! The four variants compose: a [`MergedCursor`] merges [`ServerCursor`]s
//! within one log set under a read quorum, a [`SetCursor`] merges across
//! log sets under their replication policies, and a [`MultiCursor`]
//! chains epochs end to end.

mod merged;
mod multi;
mod server;
mod set;

pub use merged::MergedCursor;
pub use multi::MultiCursor;
pub use server::ServerCursor;
pub use set::SetCursor;

use super::message::{MessageVersion, Tag, Version};

use bytes::Bytes;

/// A peek cursor. A tagged enum rather than a trait object: the variant
/// set is closed, and enum dispatch keeps composition allocation-free.
#[derive(Debug)]
pub enum PeekCursor {
    Server(ServerCursor),
    Merged(MergedCursor),
    Set(SetCursor),
    Multi(MultiCursor),
}

impl PeekCursor {
    /// True iff a message is buffered and ready to read.
    pub fn has_message(&self) -> bool {
        match self {
            Self::Server(c) => c.has_message(),
            Self::Merged(c) => c.has_message(),
            Self::Set(c) => c.has_message(),
            Self::Multi(c) => c.has_message(),
        }
    }

    /// The current message body. Panics unless `has_message()`.
    pub fn message(&self) -> Bytes {
        match self {
            Self::Server(c) => c.message(),
            Self::Merged(c) => c.message(),
            Self::Set(c) => c.message(),
            Self::Multi(c) => c.message(),
        }
    }

    /// The current message's tags. Panics unless `has_message()`.
    pub fn tags(&self) -> &[Tag] {
        match self {
            Self::Server(c) => c.tags(),
            Self::Merged(c) => c.tags(),
            Self::Set(c) => c.tags(),
            Self::Multi(c) => c.tags(),
        }
    }

    /// The smallest possible version of the current or next message.
    /// Non-decreasing across `next_message()` and `advance_to()`.
    pub fn version(&self) -> MessageVersion {
        match self {
            Self::Server(c) => c.version(),
            Self::Merged(c) => c.version(),
            Self::Set(c) => c.version(),
            Self::Multi(c) => c.version(),
        }
    }

    /// Advances past the current message.
    pub fn next_message(&mut self) {
        match self {
            Self::Server(c) => c.next_message(),
            Self::Merged(c) => c.next_message(),
            Self::Set(c) => c.next_message(),
            Self::Multi(c) => c.next_message(),
        }
    }

    /// Skips forward to `to`, dropping messages strictly before it.
    pub fn advance_to(&mut self, to: MessageVersion) {
        match self {
            Self::Server(c) => c.advance_to(to),
            Self::Merged(c) => c.advance_to(to),
            Self::Set(c) => c.advance_to(to),
            Self::Multi(c) => c.advance_to(to),
        }
    }

    /// Suspends until new data is available or `version()` could change.
    /// Returns immediately when a message is already buffered.
    pub async fn get_more(&mut self) {
        match self {
            Self::Server(c) => c.get_more().await,
            Self::Merged(c) => c.get_more().await,
            Self::Set(c) => c.get_more().await,
            Self::Multi(c) => c.get_more().await,
        }
    }

    /// Suspends until the cursor's servers are considered failed.
    pub async fn on_failed(&mut self) {
        match self {
            Self::Server(c) => c.on_failed().await,
            Self::Merged(c) => c.on_failed().await,
            Self::Set(c) => c.on_failed().await,
            Self::Multi(c) => c.on_failed().await,
        }
    }

    /// False iff the cursor is exhausted, or its servers are failed or
    /// absent (in which case `get_more()` may never produce anything).
    pub fn is_active(&self) -> bool {
        match self {
            Self::Server(c) => c.is_active(),
            Self::Merged(c) => c.is_active(),
            Self::Set(c) => c.is_active(),
            Self::Multi(c) => c.is_active(),
        }
    }

    /// True iff no further messages are possible on this cursor.
    pub fn is_exhausted(&self) -> bool {
        match self {
            Self::Server(c) => c.is_exhausted(),
            Self::Merged(c) => c.is_exhausted(),
            Self::Set(c) => c.is_exhausted(),
            Self::Multi(c) => c.is_exhausted(),
        }
    }

    /// A lower bound on message versions the cursor might have skipped
    /// due to popping. Non-decreasing.
    pub fn popped(&self) -> Version {
        match self {
            Self::Server(c) => c.popped(),
            Self::Merged(c) => c.popped(),
            Self::Set(c) => c.popped(),
            Self::Multi(c) => c.popped(),
        }
    }

    /// The greatest version known pushed (not necessarily durably) to
    /// the servers behind this cursor. 0 is always a possible result.
    pub fn max_known_version(&self) -> Version {
        match self {
            Self::Server(c) => c.max_known_version(),
            Self::Merged(c) => c.max_known_version(),
            Self::Set(c) => c.max_known_version(),
            Self::Multi(c) => c.max_known_version(),
        }
    }

    /// A cheap snapshot of the cursor. The clone may read its buffered
    /// messages, but `get_more()` on it panics.
    pub fn clone_no_more(&self) -> PeekCursor {
        match self {
            Self::Server(c) => Self::Server(c.clone_no_more()),
            Self::Merged(c) => Self::Merged(c.clone_no_more()),
            Self::Set(c) => Self::Set(c.clone_no_more()),
            Self::Multi(c) => Self::Multi(c.clone_no_more()),
        }
    }

    /// True once the cursor's servers are permanently unreachable, i.e.
    /// `get_more()` will return without ever changing the cursor again.
    /// Composite cursors use this to stop polling dead children.
    pub(crate) fn is_failed(&self) -> bool {
        match self {
            Self::Server(c) => c.is_failed(),
            Self::Merged(c) => c.is_failed(),
            Self::Set(c) => c.is_failed(),
            Self::Multi(c) => c.is_failed(),
        }
    }
}
