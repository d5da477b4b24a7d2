//! Common utilities shared by the engine and CLI crates: structured
//! logging setup and a small ambient error type for I/O and
//! configuration failures outside the protocol/engine error taxonomy.

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::setup_logging;
