use crate::encoding::frame::{BlockReader, Frame, FrameReader};
use crate::log::interface::{PeekReply, PeekRequest, ServerHandle};
use crate::log::message::{MessageVersion, Tag, Version};

use ::log::debug;
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// How many sequenced peeks a parallel cursor keeps in flight, so that a
/// steadily-consuming reader never waits a full round trip at a version
/// boundary.
const PIPELINE_DEPTH: usize = 4;

/// A cursor over one log server's stream for one tag, within a
/// `[begin, end)` version range. Replies are batched; the cursor walks
/// the buffered version blocks and frames, and fetches more on demand.
#[derive(Debug)]
pub struct ServerCursor {
    handle: ServerHandle,
    tag: Tag,
    /// Version blocks remaining in the current reply.
    blocks: BlockReader,
    /// Frames remaining in the current version block.
    frames: FrameReader,
    /// The version of the current block.
    block_version: Version,
    /// The first version past everything received so far; the next peek
    /// resumes here.
    reply_end: Version,
    message: Option<Frame>,
    message_version: MessageVersion,
    end: MessageVersion,
    popped_version: Version,
    max_known_version: Version,
    /// Make get_more return on an empty reply instead of waiting.
    return_if_blocked: bool,
    /// Pipelined prefetch; see [`PIPELINE_DEPTH`].
    parallel_get_more: bool,
    /// Identifies this cursor's pipeline to the server.
    stream: u64,
    sequence: u32,
    pending: VecDeque<oneshot::Receiver<crate::error::Result<PeekReply>>>,
    /// Set on clone_no_more snapshots, which must not fetch.
    no_more: bool,
    /// Set when the membership channel closes: the server is permanently
    /// gone and the cursor will never change again.
    failed: bool,
}

impl ServerCursor {
    pub fn new(
        handle: ServerHandle,
        tag: Tag,
        begin: Version,
        end: MessageVersion,
        return_if_blocked: bool,
        parallel_get_more: bool,
    ) -> Self {
        Self {
            handle,
            tag,
            blocks: BlockReader::default(),
            frames: FrameReader::default(),
            block_version: 0,
            reply_end: begin,
            message: None,
            message_version: MessageVersion::boundary(begin),
            end,
            popped_version: 0,
            max_known_version: 0,
            return_if_blocked,
            parallel_get_more,
            stream: rand::random(),
            sequence: 0,
            pending: VecDeque::new(),
            no_more: false,
            failed: false,
        }
    }

    pub fn has_message(&self) -> bool {
        self.message.is_some()
    }

    pub fn message(&self) -> Bytes {
        self.message.as_ref().expect("no message buffered").payload.clone()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.message.as_ref().expect("no message buffered").tags
    }

    pub fn version(&self) -> MessageVersion {
        self.message_version
    }

    pub fn next_message(&mut self) {
        self.advance();
    }

    pub fn advance_to(&mut self, to: MessageVersion) {
        while self.has_message() && self.message_version < to {
            self.advance();
        }
        if !self.has_message() && self.message_version < to {
            self.message_version = to;
            if self.message_version >= self.end {
                self.exhaust();
            }
            // Prefetched replies predate the jump; drop them rather than
            // walking the pipeline through data we no longer want.
            self.reset_pipeline();
        }
    }

    /// Fetches and buffers more data. Returns when a message is
    /// available or `version()` has advanced; also returns, without
    /// progress, when the cursor can never change again (exhausted, or
    /// the server is permanently gone).
    pub async fn get_more(&mut self) {
        assert!(!self.no_more, "get_more on a snapshot cursor");
        if self.has_message() || self.is_exhausted() || self.failed {
            return;
        }
        loop {
            let Some(client) = self.handle.get() else {
                if !self.handle.changed().await {
                    debug!("log server {} is permanently gone", self.handle.id());
                    self.failed = true;
                    return;
                }
                self.reset_pipeline();
                continue;
            };

            // Keep the pipeline full. Without parallel get-more this is
            // a single unsequenced request.
            let depth = if self.parallel_get_more { PIPELINE_DEPTH } else { 1 };
            while self.pending.len() < depth {
                let sequence = self.parallel_get_more.then(|| {
                    let sequence = (self.stream, self.sequence);
                    self.sequence += 1;
                    sequence
                });
                let request = PeekRequest {
                    tag: self.tag,
                    begin: self.message_version.version,
                    sequence,
                    return_if_blocked: self.return_if_blocked,
                };
                match client.peek_async(request) {
                    Ok(rx) => self.pending.push_back(rx),
                    Err(_) => break, // server went away; re-resolve the handle
                }
            }
            let Some(rx) = self.pending.front_mut() else {
                if !self.handle.changed().await {
                    self.failed = true;
                    return;
                }
                continue;
            };

            match rx.await {
                Ok(Ok(reply)) => {
                    self.pending.pop_front();
                    let before = self.message_version;
                    self.process(reply);
                    if self.has_message()
                        || self.message_version != before
                        || self.return_if_blocked
                    {
                        return;
                    }
                }
                // An error reply (e.g. a pipeline sequence mismatch) or a
                // dropped request: restart the pipeline from our current
                // position.
                Ok(Err(err)) => {
                    debug!("peek of log server {} failed: {err}", self.handle.id());
                    self.reset_pipeline();
                }
                Err(_) => self.reset_pipeline(),
            }
        }
    }

    /// Resolves when the server is considered failed.
    pub async fn on_failed(&mut self) {
        loop {
            if self.failed || !self.handle.is_present() {
                return;
            }
            if !self.handle.changed().await {
                self.failed = true;
                return;
            }
        }
    }

    pub fn is_active(&self) -> bool {
        !self.failed && !self.is_exhausted() && self.handle.is_present()
    }

    pub fn is_exhausted(&self) -> bool {
        self.message.is_none() && self.message_version >= self.end
    }

    pub fn popped(&self) -> Version {
        self.popped_version
    }

    pub fn max_known_version(&self) -> Version {
        self.max_known_version
    }

    pub fn clone_no_more(&self) -> ServerCursor {
        ServerCursor {
            handle: self.handle.clone(),
            tag: self.tag,
            blocks: self.blocks.clone(),
            frames: self.frames.clone(),
            block_version: self.block_version,
            reply_end: self.reply_end,
            message: self.message.clone(),
            message_version: self.message_version,
            end: self.end,
            popped_version: self.popped_version,
            max_known_version: self.max_known_version,
            return_if_blocked: self.return_if_blocked,
            parallel_get_more: false,
            stream: self.stream,
            sequence: 0,
            pending: VecDeque::new(),
            no_more: true,
            failed: self.failed,
        }
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed
    }

    /// Injects a reply directly, bypassing the server round trip. Lets
    /// tests exercise cursor composition on prepared data.
    #[cfg(test)]
    pub(crate) fn process_reply_for_test(&mut self, reply: PeekReply) {
        self.process(reply);
    }

    /// Merges a reply into the cursor's buffers and advances to the
    /// first usable message.
    fn process(&mut self, reply: PeekReply) {
        self.max_known_version = self.max_known_version.max(reply.max_known_version);
        self.popped_version = self.popped_version.max(reply.popped_version);
        self.reply_end = self.reply_end.max(reply.end);
        // A pop may have discarded everything up to popped_version; jump
        // rather than wait for data that will never come.
        if reply.popped_version > self.message_version.version {
            self.message_version = MessageVersion::boundary(reply.popped_version);
        }
        self.blocks = BlockReader::new(reply.messages);
        self.frames = FrameReader::default();
        self.advance();
    }

    /// Steps to the next buffered frame at or past the version floor,
    /// entering new version blocks as needed. With the buffer drained,
    /// parks at the boundary past the received data.
    fn advance(&mut self) {
        self.message = None;
        loop {
            // Replies from in-memory peers are only corrupt if there's a
            // framing bug, which nothing can safely continue past.
            if let Some(frame) = self.frames.next().expect("corrupt peek reply") {
                let version = MessageVersion::new(self.block_version, frame.subsequence);
                if version < self.message_version {
                    continue; // dropped by advance_to or a pop
                }
                if version >= self.end {
                    self.exhaust();
                    return;
                }
                self.message_version = version;
                self.message = Some(frame);
                return;
            }
            match self.blocks.next().expect("corrupt peek reply") {
                Some((version, frames)) => {
                    self.block_version = version;
                    self.frames = FrameReader::new(frames);
                }
                None => {
                    let boundary = MessageVersion::boundary(self.reply_end);
                    if boundary > self.message_version {
                        self.message_version = boundary;
                    }
                    if self.message_version >= self.end {
                        self.exhaust();
                    }
                    return;
                }
            }
        }
    }

    /// Marks the cursor exhausted at its end version.
    fn exhaust(&mut self) {
        self.message = None;
        self.message_version = self.end;
        self.blocks = BlockReader::default();
        self.frames = FrameReader::default();
    }

    fn reset_pipeline(&mut self) {
        self.pending.clear();
        self.sequence = 0;
        self.stream = rand::random();
    }
}
