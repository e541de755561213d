//! Log server implementations. Only the in-memory reference server
//! lives here; durable on-disk log storage is a separate component
//! reached through the same interface contract.

pub mod memory;

pub use memory::{MemoryLogServer, MemoryServerController};
