//! Async runtime management
//!
//! Separate Tokio runtimes for store I/O and volume assembly.

pub mod executor;

pub use executor::{LoaderRuntime, RuntimeConfig};
