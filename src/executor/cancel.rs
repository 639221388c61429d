//! Two-tier cancellation for task bodies.

use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Which signal stopped a task.
///
/// Individual cancellation is recoverable: the task reports Cancelled and the
/// machine carries on. Overall cancellation means the execution context
/// itself is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Cancelled {
    #[error("task execution context is shutting down")]
    Overall,

    #[error("task was cancelled")]
    Individual,
}

/// A cooperative sleep cut short by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{cause} after {elapsed:?}")]
pub struct Interrupted {
    pub cause: Cancelled,
    pub elapsed: Duration,
}

/// The context-wide token paired with one task's own token.
#[derive(Debug, Clone)]
pub struct CancellationPair {
    overall: CancellationToken,
    individual: CancellationToken,
}

impl CancellationPair {
    pub fn new(overall: CancellationToken, individual: CancellationToken) -> Self {
        Self {
            overall,
            individual,
        }
    }

    pub fn overall(&self) -> &CancellationToken {
        &self.overall
    }

    pub fn individual(&self) -> &CancellationToken {
        &self.individual
    }

    pub fn is_cancelled(&self) -> bool {
        self.overall.is_cancelled() || self.individual.is_cancelled()
    }

    /// Fail if either token has fired. Overall cancellation wins when both have.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.overall.is_cancelled() {
            Err(Cancelled::Overall)
        } else if self.individual.is_cancelled() {
            Err(Cancelled::Individual)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, checking the tokens every `slice`.
    pub fn sleep(&self, duration: Duration, slice: Duration) -> Result<(), Interrupted> {
        let started = Instant::now();
        let slice = slice.max(Duration::from_micros(100));
        loop {
            if let Err(cause) = self.check() {
                return Err(Interrupted {
                    cause,
                    elapsed: started.elapsed(),
                });
            }
            let elapsed = started.elapsed();
            if elapsed >= duration {
                return Ok(());
            }
            std::thread::sleep(slice.min(duration - elapsed));
        }
    }
}
