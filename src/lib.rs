#![warn(clippy::all)]
#![allow(clippy::module_inception)]
#![allow(clippy::type_complexity)]

#[macro_use]
pub mod error;
pub mod encoding;
pub mod log;
pub mod policy;
pub mod server;

pub use error::{Error, Result};
pub use log::{LogSystem, PeekCursor, PushData};
