//! Executor configuration.

use std::time::Duration;

use tandem_proto::frame::DEFAULT_MAX_FRAME_SIZE;

/// Tunables for an [`InstructionExecutor`](crate::executor::InstructionExecutor).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How long WAIT suspends before the round fails.
    ///
    /// A timed-out round is not resumable; retrying means starting the whole
    /// round again, which is safe because nothing durable changed.
    pub wait_timeout: Duration,

    /// Upper bound on an encoded envelope, for transports that frame with
    /// [`tandem_proto::frame`].
    pub max_frame_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { wait_timeout: Duration::from_secs(30), max_frame_size: DEFAULT_MAX_FRAME_SIZE }
    }
}
