//! Tokio runtime executor configuration
//!
//! Store fetches run on an I/O runtime. Payload decoding, volume assembly
//! and cropping are CPU-bound and go to the blocking pool of a separate
//! compute runtime so they never stall in-flight fetches.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

use crate::error::{Result, SlabError};

/// Thread counts for the loader runtimes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads for store I/O
    pub io_threads: usize,
    /// Blocking threads for assembly
    pub compute_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            io_threads: cpus.clamp(2, 8),
            compute_threads: cpus.max(2),
        }
    }
}

/// Dual-runtime executor for the loader
pub struct LoaderRuntime {
    io_runtime: Runtime,
    compute_runtime: Runtime,
}

impl LoaderRuntime {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        if config.io_threads == 0 || config.compute_threads == 0 {
            return Err(SlabError::invalid_config("runtime thread counts must be non-zero"));
        }

        let io_runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .thread_name("slabs-io")
            .enable_all()
            .build()
            .map_err(|e| SlabError::Internal {
                message: format!("Failed to create I/O runtime: {}", e),
            })?;

        let compute_runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.compute_threads)
            .thread_name("slabs-compute")
            .enable_all()
            .build()
            .map_err(|e| SlabError::Internal {
                message: format!("Failed to create compute runtime: {}", e),
            })?;

        Ok(Self {
            io_runtime,
            compute_runtime,
        })
    }

    /// Spawn an I/O-bound task
    pub fn spawn_io<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.io_runtime.spawn(future)
    }

    /// Run a future on the I/O runtime, blocking until complete
    pub fn block_on_io<F: Future>(&self, future: F) -> F::Output {
        self.io_runtime.block_on(future)
    }

    /// Handle for spawning CPU-bound closures
    pub fn compute_handle(&self) -> Handle {
        self.compute_runtime.handle().clone()
    }

    /// Shut down both runtimes
    pub fn shutdown(self) {
        self.compute_runtime.shutdown_background();
        self.io_runtime
            .shutdown_timeout(std::time::Duration::from_secs(30));
    }
}
