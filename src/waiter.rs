//! Convergence Waiter
//!
//! The store accepts mutations before list and existence reads reflect
//! them. After every accepted mutation the managers poll an existence probe
//! here until the expected state is observed, so a caller never sees
//! `Success` for a change downstream readers cannot see yet.
//!
//! ## Protocol
//!
//! ```text
//! probe ──► present/absent matches? ──► Success
//!   │              │ no
//!   │              ▼
//!   │        deadline passed? ──► Timeout
//!   │              │ no
//!   │              ▼
//!   └──────── sleep (backoff) ◄── cancel? ──► Cancelled
//! ```

use crate::backend::RemoteError;
use crate::classify::classify;
use crate::config::WaiterConfig;
use crate::outcome::OperationOutcome;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// State the waiter is polling for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
}

/// Polls an existence probe until it reports the expected state
#[derive(Debug, Clone, Default)]
pub struct ConvergenceWaiter {
    config: WaiterConfig,
}

impl ConvergenceWaiter {
    pub fn new(config: WaiterConfig) -> Self {
        ConvergenceWaiter { config }
    }

    pub fn config(&self) -> &WaiterConfig {
        &self.config
    }

    /// Wait using the configured default timeout
    pub async fn wait<F, Fut>(
        &self,
        probe: F,
        expect: Presence,
        cancel: &CancellationToken,
    ) -> OperationOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        self.wait_for(probe, expect, self.config.timeout, cancel)
            .await
    }

    /// Poll `probe` until it reports `expect`.
    ///
    /// The probe performs one existence call: `Ok` means present, an error
    /// classified as `NotFound` means absent. Any other classified error is
    /// returned as-is without further polling. The last probe may run at the
    /// deadline itself; after that the result is `Timeout`.
    pub async fn wait_for<F, Fut>(
        &self,
        mut probe: F,
        expect: Presence,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> OperationOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        let deadline = Instant::now() + timeout;
        let mut delay = self.config.initial_delay;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;

            let observed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return OperationOutcome::Cancelled,
                result = probe() => result,
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(attempts, ?expect, "existence probe still pending at deadline");
                    return OperationOutcome::Timeout;
                }
            };

            let seen = match observed {
                Ok(()) => Presence::Present,
                Err(err) => match classify(&err) {
                    OperationOutcome::NotFound => Presence::Absent,
                    other => {
                        warn!(attempts, ?expect, error = %err, "existence probe failed");
                        return other;
                    }
                },
            };

            if seen == expect {
                debug!(attempts, ?expect, "converged");
                return OperationOutcome::Success;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(attempts, ?expect, ?timeout, "did not converge before deadline");
                return OperationOutcome::Timeout;
            }

            let nap = delay.min(deadline - now);
            debug!(attempts, ?expect, ?seen, ?nap, "not yet converged");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return OperationOutcome::Cancelled,
                _ = tokio::time::sleep(nap) => {}
            }
            delay = (delay * 2).min(self.config.max_delay);
        }
    }
}
