//! Library crate for probe-orchestrator: drives repeated runs of an external
//! probing engine and decodes the binary result records it writes.
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod record;
pub mod session;
pub mod strategy;
pub mod types;

pub use error::{ConfigError, Error, Result};
