//! Single-resolution completion signal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Result cell resolved at most once, awaitable with a timeout.
///
/// Clones share the cell. Any number of tasks may wait; all observe the
/// same outcome.
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    cell: Arc<watch::Sender<Option<bool>>>,
}

impl CompletionSignal {
    /// Unresolved signal
    pub fn new() -> Self {
        let (cell, _) = watch::channel(None);
        Self {
            cell: Arc::new(cell),
        }
    }

    /// Resolve the signal. Returns false if it was already resolved.
    pub fn resolve(&self, outcome: bool) -> bool {
        self.cell.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    /// Outcome, if resolved.
    pub fn outcome(&self) -> Option<bool> {
        *self.cell.borrow()
    }

    /// Wait up to `timeout`; `None` if still unresolved.
    pub async fn wait(&self, timeout: Duration) -> Option<bool> {
        let mut rx = self.cell.subscribe();
        let outcome = match tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await {
            Ok(Ok(outcome)) => *outcome,
            _ => None,
        };
        outcome
    }
}

impl Default for CompletionSignal {
    fn default() -> Self {
        Self::new()
    }
}
