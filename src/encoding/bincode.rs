//! Bincode is used to encode durable core state and channel payloads.
//! It is a Rust-specific encoding that depends on the internal data
//! structures being stable, which is sufficient here since both ends of
//! every channel run the same build.
//!
//! This module wraps the bincode crate to pin the options, in particular
//! variable-length rather than fixed-length integers. Confusingly,
//! upstream bincode::(de)serialize uses different options (fixed) than
//! DefaultOptions (variable) -- this module always uses DefaultOptions.

use crate::error::Result;

use bincode::Options as _;

/// Returns the default Bincode options, initialized on first use.
fn bincode() -> &'static bincode::DefaultOptions {
    static BINCODE: std::sync::OnceLock<bincode::DefaultOptions> = std::sync::OnceLock::new();
    BINCODE.get_or_init(bincode::DefaultOptions::new)
}

/// Deserializes a value using Bincode.
pub fn deserialize<'de, T: serde::Deserialize<'de>>(bytes: &'de [u8]) -> Result<T> {
    Ok(bincode().deserialize(bytes)?)
}

/// Serializes a value using Bincode. Panics on failure, which only
/// happens for values that can't be represented (a bug).
pub fn serialize<T: serde::Serialize>(value: &T) -> Vec<u8> {
    bincode().serialize(value).expect("value must be serializable")
}
