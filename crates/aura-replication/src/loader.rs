//! Background application of received state.
//!
//! The inbound handler only schedules work here; it never waits for a state
//! load. Loads run on spawned tasks, at most `max_concurrent` at a time.

use crate::service::ReplicatedService;
use crate::signal::CompletionSignal;
use crate::stream::StateReader;
use crate::value::StateId;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded pool applying inbound streams to the wrapped object.
#[derive(Debug, Clone)]
pub struct StateLoader {
    permits: Arc<Semaphore>,
}

impl StateLoader {
    /// Pool running at most `max_concurrent` loads
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Apply the stream behind `reader` to `service` in the background.
    ///
    /// `signal`, when given, resolves true once `set_state` succeeds and
    /// false on any failure.
    pub fn spawn_apply<S: ReplicatedService>(
        &self,
        service: Arc<S>,
        state_id: Option<StateId>,
        mut reader: StateReader,
        signal: Option<CompletionSignal>,
    ) {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                if let Some(signal) = &signal {
                    signal.resolve(false);
                }
                return;
            };

            let outcome = match service.state() {
                Some(state) => state.set_state(state_id.as_ref(), &mut reader).await,
                None => Err(crate::errors::ServiceError::failed(
                    "object does not accept replicated state",
                )),
            };

            match outcome {
                Ok(()) => {
                    tracing::debug!(
                        state_id = ?state_id,
                        bytes = reader.received_bytes(),
                        "state set"
                    );
                    if let Some(signal) = &signal {
                        signal.resolve(true);
                    }
                }
                Err(error) => {
                    tracing::error!(state_id = ?state_id, error = %error, "error setting state");
                    if let Some(signal) = &signal {
                        signal.resolve(false);
                    }
                }
            }
        });
    }

    /// Loads that could start right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
