//! Per-query deadline and cancellation signal.
//!
//! Queries poll the budget at natural boundaries (between HNSW layers,
//! between candidate pops, between scored candidates) and bail out with
//! [`EngineError::Cancelled`] or [`EngineError::Timeout`] without touching
//! index state. Mutations never carry a budget: once on the write path they
//! run to completion.

use crate::error::{EngineError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation flag shared between a query and its issuer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Takes effect at the query's next poll point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Deadline plus optional cancellation signal for one query.
#[derive(Debug, Clone)]
pub struct QueryBudget {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl QueryBudget {
    /// A budget that never fires. Used on construction paths.
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            cancel: None,
        }
    }

    /// Deadline-only budget.
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: None,
        }
    }

    /// Attach a cancellation token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Poll the budget. Cancellation wins over timeout when both fired.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(EngineError::Timeout);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_never_fires() {
        assert!(QueryBudget::unbounded().check().is_ok());
    }

    #[test]
    fn test_deadline_fires() {
        let budget = QueryBudget::with_deadline(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(budget.check(), Err(EngineError::Timeout)));
    }

    #[test]
    fn test_cancel_fires_and_wins() {
        let token = CancelToken::new();
        let budget = QueryBudget::with_deadline(Duration::from_millis(0)).with_cancel(token.clone());
        token.cancel();
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(budget.check(), Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_generous_deadline_passes() {
        let budget = QueryBudget::with_deadline(Duration::from_secs(60));
        assert!(budget.check().is_ok());
    }
}
