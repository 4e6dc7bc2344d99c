//! Shared error infrastructure used across all tglink crates.

pub mod error;

pub use error::{Error, FromMessage, Result};
