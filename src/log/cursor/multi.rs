use crate::log::message::{MessageVersion, Tag, Version};
use super::PeekCursor;

use bytes::Bytes;

/// Chains cursors from successive epochs into one stream that crosses
/// epoch boundaries seamlessly: each child serves versions strictly
/// below its epoch's end, and is retired in favor of the next child at
/// the boundary.
#[derive(Debug)]
pub struct MultiCursor {
    /// Child cursors, oldest epoch first.
    cursors: Vec<PeekCursor>,
    /// Epoch end boundaries between consecutive children: cursors[i]
    /// serves versions below epoch_ends[i]. The last child is unbounded
    /// here (it carries its own end, if any).
    epoch_ends: Vec<MessageVersion>,
    current: usize,
    /// Popped floor accumulated from retired children, so popped() stays
    /// non-decreasing across epochs.
    popped_version: Version,
    no_more: bool,
}

impl MultiCursor {
    pub fn new(cursors: Vec<PeekCursor>, epoch_ends: Vec<MessageVersion>) -> Self {
        assert!(!cursors.is_empty(), "multi cursor needs at least one child");
        assert_eq!(
            epoch_ends.len(),
            cursors.len() - 1,
            "each child but the last needs an epoch end"
        );
        let mut cursor =
            Self { cursors, epoch_ends, current: 0, popped_version: 0, no_more: false };
        cursor.roll();
        cursor
    }

    pub fn has_message(&self) -> bool {
        self.cursors[self.current].has_message() && self.version() < self.end_of(self.current)
    }

    pub fn message(&self) -> Bytes {
        assert!(self.has_message(), "no message buffered");
        self.cursors[self.current].message()
    }

    pub fn tags(&self) -> &[Tag] {
        assert!(self.has_message(), "no message buffered");
        self.cursors[self.current].tags()
    }

    pub fn version(&self) -> MessageVersion {
        self.cursors[self.current].version().min(self.end_of(self.current))
    }

    pub fn next_message(&mut self) {
        self.cursors[self.current].next_message();
        self.roll();
    }

    pub fn advance_to(&mut self, to: MessageVersion) {
        while self.current < self.cursors.len() - 1 && to >= self.epoch_ends[self.current] {
            self.retire();
        }
        self.cursors[self.current].advance_to(to);
        self.roll();
    }

    pub async fn get_more(&mut self) {
        assert!(!self.no_more, "get_more on a snapshot cursor");
        loop {
            self.roll();
            if self.has_message() || self.is_exhausted() {
                return;
            }
            if self.cursors[self.current].is_failed() {
                return;
            }
            let before = self.version();
            Box::pin(self.cursors[self.current].get_more()).await;
            self.roll();
            if self.has_message() || self.version() != before {
                return;
            }
        }
    }

    pub async fn on_failed(&mut self) {
        Box::pin(self.cursors[self.current].on_failed()).await
    }

    pub fn is_active(&self) -> bool {
        self.cursors[self.current].is_active()
    }

    pub fn is_exhausted(&self) -> bool {
        self.current == self.cursors.len() - 1 && self.cursors[self.current].is_exhausted()
    }

    pub fn popped(&self) -> Version {
        self.popped_version.max(self.cursors[self.current].popped())
    }

    pub fn max_known_version(&self) -> Version {
        self.cursors.iter().map(|c| c.max_known_version()).max().unwrap_or(0)
    }

    pub fn clone_no_more(&self) -> MultiCursor {
        MultiCursor {
            cursors: self.cursors.iter().map(|c| c.clone_no_more()).collect(),
            epoch_ends: self.epoch_ends.clone(),
            current: self.current,
            popped_version: self.popped_version,
            no_more: true,
        }
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.cursors[self.current].is_failed()
    }

    fn end_of(&self, index: usize) -> MessageVersion {
        self.epoch_ends.get(index).copied().unwrap_or(MessageVersion::MAX)
    }

    /// Retires children that have reached their epoch boundary.
    fn roll(&mut self) {
        while self.current < self.cursors.len() - 1 {
            let end = self.epoch_ends[self.current];
            let child = &self.cursors[self.current];
            if !child.is_exhausted() && child.version() < end {
                break;
            }
            self.retire();
        }
    }

    fn retire(&mut self) {
        let end = self.epoch_ends[self.current];
        self.popped_version = self.popped_version.max(self.cursors[self.current].popped());
        self.current += 1;
        self.cursors[self.current].advance_to(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::frame::{BlockWriter, FrameWriter};
    use crate::log::cursor::ServerCursor;
    use crate::log::interface::{LogServerClient, PeekReply, ServerHandle};
    use crate::policy::Locality;

    /// Builds an already-buffered server cursor holding one message per
    /// version in `versions`, exhausted at `end`.
    fn buffered_cursor(versions: &[Version], begin: Version, end: Version) -> PeekCursor {
        let tag = Tag::new(0, 1);
        let (client, requests) = LogServerClient::channel(0, Locality::zone("a"));
        // Keep the server side alive so the handle stays present.
        std::mem::forget(requests);
        let mut cursor =
            ServerCursor::new(ServerHandle::fixed(client), tag, begin, MessageVersion::boundary(end), false, false);
        let mut blocks = BlockWriter::new();
        for &version in versions {
            let mut frames = FrameWriter::new();
            frames.append(1, &[tag], format!("v{version}").as_bytes());
            blocks.block(version, &frames.finish());
        }
        let reply = PeekReply {
            messages: blocks.finish(),
            end,
            max_known_version: end.saturating_sub(1),
            popped_version: 0,
        };
        cursor.process_reply_for_test(reply);
        PeekCursor::Server(cursor)
    }

    /// An epoch-chained cursor yields old-epoch versions up to the
    /// boundary, then new-epoch versions, in order and without gaps.
    #[test]
    fn chains_epochs_in_order() {
        let old = buffered_cursor(&[28, 29, 30], 28, 31);
        let new = buffered_cursor(&[31, 32], 31, 33);
        let mut multi =
            MultiCursor::new(vec![old, new], vec![MessageVersion::boundary(31)]);

        let mut seen = Vec::new();
        while multi.has_message() {
            seen.push(multi.version().version);
            multi.next_message();
        }
        assert_eq!(seen, vec![28, 29, 30, 31, 32]);
        assert!(multi.is_exhausted());
    }

    /// advance_to across the boundary retires the old child entirely.
    #[test]
    fn advance_across_boundary() {
        let old = buffered_cursor(&[28, 29, 30], 28, 31);
        let new = buffered_cursor(&[31, 32], 31, 33);
        let mut multi =
            MultiCursor::new(vec![old, new], vec![MessageVersion::boundary(31)]);

        multi.advance_to(MessageVersion::boundary(32));
        assert!(multi.has_message());
        assert_eq!(multi.version(), MessageVersion::new(32, 1));
    }
}
