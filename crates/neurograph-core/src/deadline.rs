use crate::{NeuroGraphError, Result};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Wall-clock budget plus cooperative cancellation for one caller-facing
/// operation. Cloned into every child task; long scans call `checkpoint`
/// between chunks.
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    expires_at: Option<Instant>,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn none() -> Self {
        Self {
            token: CancellationToken::new(),
            expires_at: None,
            budget: None,
        }
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            expires_at: Some(Instant::now() + budget),
            budget: Some(budget),
        }
    }

    pub fn with_token(token: CancellationToken, budget: Option<Duration>) -> Self {
        Self {
            token,
            expires_at: budget.map(|b| Instant::now() + b),
            budget,
        }
    }

    /// Child deadline sharing the parent's token but capped at `budget`.
    pub fn child(&self, budget: Duration) -> Self {
        let expires_at = Instant::now() + budget;
        Self {
            token: self.token.child_token(),
            expires_at: Some(match self.expires_at {
                Some(parent) => parent.min(expires_at),
                None => expires_at,
            }),
            budget: Some(budget),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fails with `Cancelled` or `Timeout` if the operation should stop.
    pub fn checkpoint(&self) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(NeuroGraphError::Cancelled);
        }
        if self.is_expired() {
            return Err(NeuroGraphError::Timeout(
                self.budget.unwrap_or(Duration::ZERO),
            ));
        }
        Ok(())
    }

    /// Runs `fut` under this deadline, mapping expiry and cancellation into
    /// the error taxonomy.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        self.checkpoint()?;
        match self.remaining() {
            None => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(NeuroGraphError::Cancelled),
                    out = fut => out,
                }
            }
            Some(remaining) => {
                tokio::select! {
                    _ = self.token.cancelled() => Err(NeuroGraphError::Cancelled),
                    out = tokio::time::timeout(remaining, fut) => match out {
                        Ok(inner) => inner,
                        Err(_) => Err(NeuroGraphError::Timeout(self.budget.unwrap_or(remaining))),
                    },
                }
            }
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkpoint_reports_cancellation() {
        let deadline = Deadline::none();
        assert!(deadline.checkpoint().is_ok());
        deadline.cancel();
        assert!(matches!(
            deadline.checkpoint(),
            Err(NeuroGraphError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn expired_budget_times_out() {
        let deadline = Deadline::after(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(matches!(
            deadline.checkpoint(),
            Err(NeuroGraphError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn run_enforces_budget() {
        let deadline = Deadline::after(Duration::from_millis(20));
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1u32)
        };
        assert!(matches!(
            deadline.run(slow).await,
            Err(NeuroGraphError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn child_inherits_parent_cancellation() {
        let parent = Deadline::none();
        let child = parent.child(Duration::from_secs(60));
        parent.cancel();
        assert!(child.is_cancelled());
    }
}
