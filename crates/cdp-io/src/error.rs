//! Transient I/O and processor-bridge error taxonomy for this crate.
//!
//! Distinct from [`cdp_core::CdpError`]: these are failures specific to
//! owning a child process, not template/validation failures. `From<IoError>
//! for CdpError` folds them into the engine's error type at the crate
//! boundary, where every public function in this crate still returns
//! [`cdp_core::Result`].
//!
//! Failures while the bridge is already running (a stdin write, a stdout
//! read, an unparseable output line) surface as `warn!` logs plus the
//! bridge's `dead` flag rather than as a variant here: those happen inside
//! detached background tasks with no caller left to hand a `Result` to, and
//! the health monitor already cascades a dead bridge into a shutdown.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("executable '{executable}' not found on PATH: {source}")]
    ExecutableNotFound {
        executable: String,
        #[source]
        source: which::Error,
    },

    #[error("failed to spawn child process: {0}")]
    Spawn(#[source] std::io::Error),
}

impl From<IoError> for cdp_core::CdpError {
    fn from(err: IoError) -> Self {
        cdp_core::CdpError::Other(anyhow::anyhow!(err))
    }
}
