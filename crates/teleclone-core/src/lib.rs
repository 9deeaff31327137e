//! Core of the channel history migrator.
//!
//! Framework-agnostic: the messaging service lives behind the `TransferClient`
//! port, implemented in adapter crates.

pub mod config;
pub mod copier;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod fetcher;
pub mod logging;
pub mod media;
pub mod pacing;
pub mod pipeline;
pub mod port;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
