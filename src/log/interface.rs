//! The log-server interface contract. Durable single-node storage,
//! failure detection, and wire serialization are all out of scope here;
//! a log server is anything that consumes these requests in order, e.g.
//! the in-memory reference implementation in [`crate::server`] or a
//! network proxy.

use crate::error::Result;
use crate::policy::Locality;
use super::message::{Epoch, Tag, Version};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

/// A log server id, unique within the cluster.
pub type ServerId = u64;

/// A push of one version's messages to a single log server. Every local
/// server receives every version, possibly with an empty payload, so
/// that its durable frontier advances even when placement routed all
/// messages elsewhere.
#[derive(Clone, Debug)]
pub struct PushRequest {
    /// The epoch the push belongs to; fenced servers refuse older epochs.
    pub epoch: Epoch,
    /// The version of the preceding push. The server only applies this
    /// push when its frontier is exactly `prev_version`.
    pub prev_version: Version,
    pub version: Version,
    /// The greatest version known replicated to a full quorum, used by
    /// the server to bound recovery.
    pub known_committed_version: Version,
    /// Framed messages placed on this server; may be empty.
    pub messages: Bytes,
    /// Byte offsets of each tag's frames within `messages`, so the
    /// server can serve tag-scoped peeks without rescanning the payload.
    pub tags: Vec<TagMessages>,
}

/// The per-tag frame offsets accompanying a push.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TagMessages {
    pub tag: Tag,
    pub offsets: Vec<u32>,
}

/// Acknowledges a push as durable on one server.
#[derive(Clone, Copy, Debug)]
pub struct PushAck {
    pub version: Version,
}

/// Requests messages for one tag from `begin` onward.
#[derive(Clone, Copy, Debug)]
pub struct PeekRequest {
    pub tag: Tag,
    pub begin: Version,
    /// Pipelined peeks: a (stream, sequence) pair. Sequence n+1 of a
    /// stream continues where the server left sequence n, letting a
    /// cursor keep several requests in flight without knowing where
    /// each reply will end.
    pub sequence: Option<(u64, u32)>,
    /// Reply immediately (possibly empty) instead of waiting for data
    /// at or past `begin`.
    pub return_if_blocked: bool,
}

/// A tag-filtered slice `[begin, end)` of one server's log.
#[derive(Clone, Debug, Default)]
pub struct PeekReply {
    /// Version blocks (see [`crate::encoding::frame`]) for the range.
    pub messages: Bytes,
    /// The first version not covered by this reply.
    pub end: Version,
    /// The greatest version the server has seen this epoch, durable or
    /// not.
    pub max_known_version: Version,
    /// The version below which the server was told it may discard this
    /// tag's messages.
    pub popped_version: Version,
}

/// Advises that messages below `up_to` for `tag` are no longer needed.
#[derive(Clone, Copy, Debug)]
pub struct PopRequest {
    pub tag: Tag,
    pub up_to: Version,
}

/// Fences the server: pushes from epochs before `epoch` must never be
/// acknowledged once the lock is taken.
#[derive(Clone, Copy, Debug)]
pub struct LockRequest {
    pub epoch: Epoch,
}

/// The server's durable state at the time it was fenced.
#[derive(Clone, Copy, Debug)]
pub struct LockReply {
    /// The first version the server does not have durable.
    pub end_version: Version,
    pub known_committed_version: Version,
}

/// Asks whether the server still accepts pushes for `epoch`. Fenced
/// servers never reply.
#[derive(Clone, Copy, Debug)]
pub struct ConfirmRequest {
    pub epoch: Epoch,
}

/// A client for a single log server. Requests travel over unbounded
/// channels paired with oneshot reply senders; requests are processed
/// in send order, which the push path's per-server FIFO relies on.
#[derive(Clone, Debug)]
pub struct LogServerClient {
    pub id: ServerId,
    pub locality: Locality,
    push_tx: mpsc::UnboundedSender<(PushRequest, oneshot::Sender<Result<PushAck>>)>,
    peek_tx: mpsc::UnboundedSender<(PeekRequest, oneshot::Sender<Result<PeekReply>>)>,
    pop_tx: mpsc::UnboundedSender<PopRequest>,
    lock_tx: mpsc::UnboundedSender<(LockRequest, oneshot::Sender<Result<LockReply>>)>,
    confirm_tx: mpsc::UnboundedSender<(ConfirmRequest, oneshot::Sender<Result<()>>)>,
}

/// The server-side receiving ends matching a [`LogServerClient`].
pub struct LogServerRequests {
    pub push_rx: mpsc::UnboundedReceiver<(PushRequest, oneshot::Sender<Result<PushAck>>)>,
    pub peek_rx: mpsc::UnboundedReceiver<(PeekRequest, oneshot::Sender<Result<PeekReply>>)>,
    pub pop_rx: mpsc::UnboundedReceiver<PopRequest>,
    pub lock_rx: mpsc::UnboundedReceiver<(LockRequest, oneshot::Sender<Result<LockReply>>)>,
    pub confirm_rx: mpsc::UnboundedReceiver<(ConfirmRequest, oneshot::Sender<Result<()>>)>,
}

impl LogServerClient {
    /// Creates a client and the matching server-side channel set.
    pub fn channel(id: ServerId, locality: Locality) -> (Self, LogServerRequests) {
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (peek_tx, peek_rx) = mpsc::unbounded_channel();
        let (pop_tx, pop_rx) = mpsc::unbounded_channel();
        let (lock_tx, lock_rx) = mpsc::unbounded_channel();
        let (confirm_tx, confirm_rx) = mpsc::unbounded_channel();
        (
            Self { id, locality, push_tx, peek_tx, pop_tx, lock_tx, confirm_tx },
            LogServerRequests { push_rx, peek_rx, pop_rx, lock_rx, confirm_rx },
        )
    }

    /// Sends a push without waiting, returning the ack receiver so the
    /// caller can collect acks from many servers concurrently.
    pub fn push(&self, request: PushRequest) -> Result<oneshot::Receiver<Result<PushAck>>> {
        let (tx, rx) = oneshot::channel();
        self.push_tx.send((request, tx))?;
        Ok(rx)
    }

    /// Peeks the server and waits for the reply.
    pub async fn peek(&self, request: PeekRequest) -> Result<PeekReply> {
        let (tx, rx) = oneshot::channel();
        self.peek_tx.send((request, tx))?;
        rx.await?
    }

    /// Sends a peek without waiting, returning the reply receiver
    /// (pipelined get-more keeps several of these in flight).
    pub fn peek_async(&self, request: PeekRequest) -> Result<oneshot::Receiver<Result<PeekReply>>> {
        let (tx, rx) = oneshot::channel();
        self.peek_tx.send((request, tx))?;
        Ok(rx)
    }

    /// Sends a pop hint. Fire-and-forget: pops are advisory and a dead
    /// server has nothing left to discard.
    pub fn pop(&self, tag: Tag, up_to: Version) {
        let _ = self.pop_tx.send(PopRequest { tag, up_to });
    }

    /// Fences the server against epochs before `epoch` and returns its
    /// durable state.
    pub async fn lock(&self, epoch: Epoch) -> Result<LockReply> {
        let (tx, rx) = oneshot::channel();
        self.lock_tx.send((LockRequest { epoch }, tx))?;
        rx.await?
    }

    /// Confirms the server still accepts pushes for `epoch`.
    pub async fn confirm(&self, epoch: Epoch) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.confirm_tx.send((ConfirmRequest { epoch }, tx))?;
        rx.await?
    }
}

/// An observable, possibly-absent reference to a log server. The handle
/// keeps the server's id even while the server itself is absent, and
/// many cursors may hold clones of one handle; presence changes (a
/// server failing or rejoining) wake anything waiting in [`Self::changed`].
#[derive(Clone, Debug)]
pub struct ServerHandle {
    id: ServerId,
    rx: watch::Receiver<Option<LogServerClient>>,
    /// Keeps the membership channel open for handles created with
    /// [`Self::fixed`], which have no membership side.
    _fixed: Option<std::sync::Arc<watch::Sender<Option<LogServerClient>>>>,
}

impl ServerHandle {
    /// Creates a handle plus the sender that membership (out of scope
    /// here) uses to publish presence changes.
    pub fn new(
        id: ServerId,
        initial: Option<LogServerClient>,
    ) -> (watch::Sender<Option<LogServerClient>>, Self) {
        let (tx, rx) = watch::channel(initial);
        (tx, Self { id, rx, _fixed: None })
    }

    /// A handle that is present forever (no membership management), for
    /// construction from a live client.
    pub fn fixed(client: LogServerClient) -> Self {
        let id = client.id;
        let (tx, rx) = watch::channel(Some(client));
        Self { id, rx, _fixed: Some(std::sync::Arc::new(tx)) }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Snapshots the current client, if present.
    pub fn get(&self) -> Option<LogServerClient> {
        self.rx.borrow().clone()
    }

    pub fn is_present(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Suspends until presence changes. Returns false if the membership
    /// side is gone, in which case presence will never change again.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
