//! The replicated transaction log: version-ordered, tag-fanout
//! placement of commit batches onto log servers under a replication
//! policy, quorum-merged per-tag read cursors, and the epoch lifecycle
//! that carries both across recoveries.

pub mod cursor;
pub mod interface;
pub mod message;
pub mod push;
pub mod recovery;
pub mod set;
pub mod state;
pub mod system;

pub use cursor::PeekCursor;
pub use interface::{LogServerClient, ServerHandle, ServerId};
pub use message::{Epoch, MessageVersion, Tag, Version};
pub use push::PushData;
pub use recovery::{recover_and_end_epoch, Rejoin};
pub use set::{BestPolicy, LogSet};
pub use state::CoreState;
pub use system::{EpochConfig, LogSystem, RemoteConfig, WorkerRecruit};
