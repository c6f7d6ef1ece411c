//! Isolated execution of untrusted submissions.
//!
//! Each invocation runs one source file against one stdin in a throw-away
//! container with resource limits applied up front: capped wall time, CPU
//! share and memory, a bounded pid count, no network, and a read-only root
//! filesystem with a private writable `/tmp`. The runner is stateless and
//! reentrant; process-wide concurrency is bounded by a FIFO semaphore.

mod language;
mod runner;

use std::time::Duration;

use thiserror::Error;

use bitbattle_shared::Language;

pub use runner::SandboxRunner;

/// Hard limits applied to every invocation, not per test.
#[derive(Debug, Clone)]
pub struct SandboxLimits {
    /// Wall-clock budget for the whole invocation, compile included.
    pub wall_timeout: Duration,
    /// Memory cap in bytes.
    pub memory_bytes: i64,
    /// CPU share in units of 1e-9 cores.
    pub nano_cpus: i64,
    /// Maximum number of processes inside the container.
    pub pids_limit: i64,
    /// How long an invocation may wait for a free sandbox slot before the
    /// request is abandoned.
    pub queue_deadline: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            wall_timeout: Duration::from_secs(5),
            memory_bytes: 128 * 1024 * 1024,
            nano_cpus: 500_000_000,
            pids_limit: 50,
            queue_deadline: Duration::from_secs(30),
        }
    }
}

/// One sandboxed run: a source file, a language, and the stdin to feed it.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub language: Language,
    pub source: String,
    pub stdin: String,
}

/// What came back out of the container.
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub duration_ms: u64,
    /// The wall-clock budget was exhausted; `stdout` holds whatever the
    /// process managed to print before being killed.
    pub timed_out: bool,
    /// The kernel OOM-killed the process group.
    pub oom: bool,
}

impl SandboxOutput {
    /// A run is clean when it exited zero within its limits.
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.oom
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("sandbox queue deadline exceeded after {0:?}")]
    QueueDeadline(Duration),

    #[error("sandbox runner is shutting down")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SandboxError>;
