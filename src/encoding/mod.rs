//! Binary data encodings.
//!
//! - bincode: used for core state and other self-describing values.
//! - frame: the hand-framed wire layout of tagged log messages.

pub mod bincode;
pub mod frame;

use crate::error::Result;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Adds automatic Bincode encode/decode methods to value types. These
/// are used for durable state and request payloads that don't need a
/// stable cross-language layout (unlike message frames, which do).
pub trait Value: Serialize + DeserializeOwned {
    /// Encodes the value using Bincode.
    fn encode(&self) -> Vec<u8> {
        bincode::serialize(self)
    }

    /// Decodes the value using Bincode.
    fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
    }
}
