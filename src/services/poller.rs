use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use super::orchestrator::{OrchestratorError, TransactionOrchestrator};
use crate::domain::Transaction;

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Terminal(Transaction),
    /// Deadline reached first. Carries the last snapshot seen, if any read succeeded.
    TimedOut(Option<Transaction>),
}

/// Watches one transaction until it settles or a deadline passes. Never writes.
#[derive(Debug, Clone, Copy)]
pub struct StatusPoller {
    interval: Duration,
    timeout: Duration,
}

impl StatusPoller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Polls on a fixed interval, with a last read at the deadline itself.
    /// An unknown id ends the watch at once; other read errors are logged
    /// and the next tick tries again.
    pub async fn wait_for_terminal(
        &self,
        orchestrator: &TransactionOrchestrator,
        id: Uuid,
    ) -> Result<PollOutcome, OrchestratorError> {
        let deadline = Instant::now() + self.timeout;
        let mut last_seen = None;

        loop {
            match orchestrator.poll_status(id).await {
                Ok(tx) if tx.status.is_terminal() => {
                    tracing::debug!(transaction_id = %id, status = %tx.status, "poll observed terminal status");
                    return Ok(PollOutcome::Terminal(tx));
                }
                Ok(tx) => last_seen = Some(tx),
                Err(OrchestratorError::NotFound(what)) => {
                    return Err(OrchestratorError::NotFound(what));
                }
                Err(e) => {
                    tracing::warn!(transaction_id = %id, error = %e, "status poll failed");
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::info!(transaction_id = %id, timeout_secs = self.timeout.as_secs(), "status poll timed out");
                return Ok(PollOutcome::TimedOut(last_seen));
            }
            sleep(self.interval.min(remaining)).await;
        }
    }
}
