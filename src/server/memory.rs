use crate::encoding::frame::BlockWriter;
use crate::error::{Error, Result};
use crate::log::interface::{
    ConfirmRequest, LockReply, LockRequest, LogServerClient, LogServerRequests, PeekReply,
    PeekRequest, PopRequest, PushAck, PushRequest, ServerId,
};
use crate::log::message::{Epoch, Tag, Version};
use crate::policy::Locality;

use ::log::{debug, info};
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot};

/// One version's stored payload: the framed messages and the per-tag
/// offsets into them, exactly as pushed.
#[derive(Debug)]
struct Entry {
    messages: Bytes,
    tags: HashMap<Tag, Vec<u32>>,
}

/// Test controls for a memory log server.
pub struct MemoryServerController {
    control_tx: mpsc::UnboundedSender<Control>,
}

enum Control {
    HoldPushes(bool),
}

impl MemoryServerController {
    /// While held, incoming pushes are neither applied nor acknowledged;
    /// releasing applies them in arrival order. Used to simulate a
    /// lagging replica.
    pub fn hold_pushes(&self, hold: bool) {
        let _ = self.control_tx.send(Control::HoldPushes(hold));
    }
}

/// An in-memory log server: a reference implementation of the log
/// server interface, used by tests and demos. Data is not persisted.
///
/// The server is an event-loop task over its request channels, applying
/// pushes in strictly increasing version order, parking blocked peeks
/// until data arrives, discarding popped frames, and refusing pushes
/// once fenced by a newer epoch's recovery.
pub struct MemoryLogServer {
    id: ServerId,
    locality: Locality,
    /// The highest epoch seen; pushes from older epochs are refused.
    epoch: Epoch,
    /// Set once fenced; fenced servers never acknowledge pushes again.
    stopped: bool,
    /// The last applied version, if any pushes have been applied.
    version: Option<Version>,
    known_committed: Version,
    entries: BTreeMap<Version, Entry>,
    popped: HashMap<Tag, Version>,
    /// Pipelined peek streams: stream id to (next sequence, next begin).
    streams: HashMap<u64, (u32, Version)>,
    /// Peeks waiting for data at or past their begin version.
    parked: Vec<(PeekRequest, oneshot::Sender<Result<PeekReply>>)>,
    /// Test control: buffer pushes instead of applying them.
    holding: bool,
    held: VecDeque<(PushRequest, oneshot::Sender<Result<PushAck>>)>,
}

impl MemoryLogServer {
    /// Spawns a server task, returning its client and test controller.
    pub fn spawn(id: ServerId, locality: Locality) -> (LogServerClient, MemoryServerController) {
        let (client, requests) = LogServerClient::channel(id, locality.clone());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let server = Self {
            id,
            locality,
            epoch: 0,
            stopped: false,
            version: None,
            known_committed: 0,
            entries: BTreeMap::new(),
            popped: HashMap::new(),
            streams: HashMap::new(),
            parked: Vec::new(),
            holding: false,
            held: VecDeque::new(),
        };
        tokio::spawn(server.run(requests, control_rx));
        (client, MemoryServerController { control_tx })
    }

    /// Serves requests until every client is gone.
    async fn run(
        mut self,
        mut requests: LogServerRequests,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
    ) {
        debug!("log server {} started in {}", self.id, self.locality);
        loop {
            // Biased: controls and fencing take effect before queued
            // traffic, and pops land before the peeks that follow them.
            tokio::select! {
                biased;
                Some(control) = control_rx.recv() => self.control(control),
                Some((request, tx)) = requests.lock_rx.recv() => self.lock(request, tx),
                Some((request, tx)) = requests.push_rx.recv() => self.push(request, tx),
                Some(request) = requests.pop_rx.recv() => self.pop(request),
                Some((request, tx)) = requests.peek_rx.recv() => self.peek(request, tx),
                Some((request, tx)) = requests.confirm_rx.recv() => self.confirm(request, tx),
                else => break,
            }
        }
        debug!("log server {} event loop ended", self.id);
    }

    fn push(&mut self, request: PushRequest, tx: oneshot::Sender<Result<PushAck>>) {
        if self.holding {
            self.held.push_back((request, tx));
            return;
        }
        self.apply_push(request, tx);
    }

    fn apply_push(&mut self, request: PushRequest, tx: oneshot::Sender<Result<PushAck>>) {
        // Fenced or superseded pushes are dropped without a reply: the
        // old epoch's push must never appear durable.
        if self.stopped || request.epoch < self.epoch {
            debug!(
                "log server {} refusing push {} from epoch {}",
                self.id, request.version, request.epoch
            );
            return;
        }
        self.epoch = self.epoch.max(request.epoch);
        match self.version {
            // The first push establishes the frontier.
            None => {}
            Some(version) if request.prev_version == version => {}
            Some(version) => {
                debug!(
                    "log server {} dropping out-of-order push {} (frontier {version})",
                    self.id, request.version
                );
                return;
            }
        }
        assert!(
            request.version > request.prev_version,
            "push version {} not after {}",
            request.version,
            request.prev_version
        );
        self.entries.insert(
            request.version,
            Entry {
                messages: request.messages,
                tags: request.tags.into_iter().map(|t| (t.tag, t.offsets)).collect(),
            },
        );
        self.version = Some(request.version);
        self.known_committed = request.known_committed_version;
        let _ = tx.send(Ok(PushAck { version: request.version }));
        self.wake_parked();
    }

    fn peek(&mut self, request: PeekRequest, tx: oneshot::Sender<Result<PeekReply>>) {
        self.parked.push((request, tx));
        self.drain_peeks();
    }

    /// Serves parked peeks until none can make progress. Serving one
    /// reply can unblock another (the next sequence of a pipelined
    /// stream), so this loops until a full pass parks everything again.
    fn drain_peeks(&mut self) {
        loop {
            let mut progressed = false;
            for (request, tx) in std::mem::take(&mut self.parked) {
                match self.try_peek(request, tx) {
                    None => progressed = true,
                    Some(parked) => self.parked.push(parked),
                }
            }
            if !progressed || self.parked.is_empty() {
                return;
            }
        }
    }

    /// Serves one peek, or returns it to be parked: a pipelined request
    /// ahead of its stream's turn, or one waiting for data at or past
    /// its begin version. Stream state only advances when a reply is
    /// served, so parked requests can safely be re-run.
    fn try_peek(
        &mut self,
        request: PeekRequest,
        tx: oneshot::Sender<Result<PeekReply>>,
    ) -> Option<(PeekRequest, oneshot::Sender<Result<PeekReply>>)> {
        if tx.is_closed() {
            return None; // the cursor abandoned this request
        }
        let begin = match request.sequence {
            None => request.begin,
            Some((stream, sequence)) => match self.streams.get(&stream) {
                None if sequence == 0 => request.begin,
                None => return Some((request, tx)), // awaits the stream's first peek
                Some(&(expected, next)) if sequence == expected => next,
                Some(&(expected, _)) if sequence > expected => return Some((request, tx)),
                _ => {
                    // A stale sequence: the cursor restarted the stream.
                    let _ = tx.send(errdata!("peek sequence mismatch"));
                    return None;
                }
            },
        };
        let begin = begin.max(self.popped.get(&request.tag).copied().unwrap_or(0));

        let frontier = self.version.unwrap_or(0);
        if frontier < begin && !request.return_if_blocked {
            return Some((request, tx));
        }
        let reply = self.build_reply(request.tag, begin);
        if let Some((stream, sequence)) = request.sequence {
            self.streams.insert(stream, (sequence + 1, reply.end.max(begin)));
        }
        let _ = tx.send(Ok(reply));
        None
    }

    /// Assembles the tag's version blocks from `begin` through the
    /// frontier, slicing frames out of the stored payloads by the
    /// offsets that accompanied each push.
    fn build_reply(&self, tag: Tag, begin: Version) -> PeekReply {
        let mut blocks = BlockWriter::new();
        for (&version, entry) in self.entries.range(begin..) {
            let Some(offsets) = entry.tags.get(&tag) else { continue };
            let mut frames = BytesMut::new();
            for &offset in offsets {
                let at = offset as usize;
                let len: [u8; 4] =
                    entry.messages[at..at + 4].try_into().expect("frame offset out of range");
                let end = at + 4 + u32::from_le_bytes(len) as usize;
                frames.extend_from_slice(&entry.messages[at..end]);
            }
            blocks.block(version, &frames);
        }
        PeekReply {
            messages: blocks.finish(),
            end: self.version.map_or(0, |v| v + 1),
            max_known_version: self.version.unwrap_or(0),
            popped_version: self.popped.get(&tag).copied().unwrap_or(0),
        }
    }

    fn pop(&mut self, request: PopRequest) {
        let popped = self.popped.entry(request.tag).or_insert(0);
        if request.up_to <= *popped {
            return;
        }
        *popped = request.up_to;
        for (_, entry) in self.entries.range_mut(..request.up_to) {
            entry.tags.remove(&request.tag);
        }
        // Versions no tag can read anymore are gone for good.
        self.entries.retain(|&version, entry| {
            version >= request.up_to || !entry.tags.is_empty()
        });
    }

    fn lock(&mut self, request: LockRequest, tx: oneshot::Sender<Result<LockReply>>) {
        if request.epoch < self.epoch {
            let _ = tx.send(Err(Error::Abort)); // a stale recovery
            return;
        }
        if !self.stopped {
            info!("log server {} fenced by epoch {}", self.id, request.epoch);
        }
        self.epoch = request.epoch;
        self.stopped = true;
        let _ = tx.send(Ok(LockReply {
            end_version: self.version.map_or(0, |v| v + 1),
            known_committed_version: self.known_committed,
        }));
    }

    fn confirm(&mut self, request: ConfirmRequest, tx: oneshot::Sender<Result<()>>) {
        // Fenced servers never confirm: the caller's epoch is dead and
        // its confirmation must hang rather than fail transiently.
        if self.stopped || request.epoch < self.epoch {
            return;
        }
        let _ = tx.send(Ok(()));
    }

    fn control(&mut self, control: Control) {
        match control {
            Control::HoldPushes(true) => self.holding = true,
            Control::HoldPushes(false) => {
                self.holding = false;
                while let Some((request, tx)) = self.held.pop_front() {
                    self.apply_push(request, tx);
                }
            }
        }
    }

    /// Re-runs parked peeks after the frontier moves; still-blocked ones
    /// park again.
    fn wake_parked(&mut self) {
        self.drain_peeks();
    }
}
