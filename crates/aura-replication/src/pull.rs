//! Pull-based state transfer.
//!
//! A pull first asks the local getter, then locates a holder with a
//! `hasState` broadcast, registers an inbound stream for it and asks it to
//! `sendState`. The background load resolves the pull's signal. Concurrent
//! pulls of the same id share one in-flight transfer.

use crate::address::AddressKey;
use crate::context::ReplicaContext;
use crate::errors::ReplicationError;
use crate::method::ControlOp;
use crate::service::ReplicatedService;
use crate::signal::CompletionSignal;
use crate::stream::{state_stream, StreamKey};
use crate::transport::{Destination, NodeAddress, RequestOptions, TransportError};
use crate::value::{StateId, Value};
use crate::wire::{CallPayload, MethodCall};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Local method re-run around a pull.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalGetter<'a> {
    pub(crate) method: &'a str,
    pub(crate) args: &'a [Value],
}

#[derive(Debug)]
struct PendingPull {
    signal: CompletionSignal,
    attempt: u32,
}

enum Registration {
    Owner(CompletionSignal),
    InFlight { signal: CompletionSignal, attempt: u32 },
}

/// In-flight pulls keyed by state id.
#[derive(Debug)]
pub struct PullCoordinator {
    attempts: u32,
    pending: Mutex<HashMap<Option<StateId>, PendingPull>>,
}

/// Removes the caller's registration on every exit path.
struct PendingGuard<'a> {
    coordinator: &'a PullCoordinator,
    state_id: &'a Option<StateId>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.pending.lock().remove(self.state_id);
    }
}

impl PullCoordinator {
    /// Coordinator making up to `attempts` tries per pull
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Pulls currently in flight
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn register(&self, state_id: &Option<StateId>, attempt: u32) -> Registration {
        let mut pending = self.pending.lock();
        if let Some(existing) = pending.get(state_id) {
            return Registration::InFlight {
                signal: existing.signal.clone(),
                attempt: existing.attempt,
            };
        }
        let signal = CompletionSignal::new();
        pending.insert(
            state_id.clone(),
            PendingPull {
                signal: signal.clone(),
                attempt,
            },
        );
        Registration::Owner(signal)
    }

    /// Pull `state_id` from whichever remote member holds it.
    ///
    /// Returns the getter's result once it is non-null, or `Value::Null`
    /// when no holder answered or every attempt failed. Errors raised by
    /// the getter itself are returned unchanged.
    pub(crate) async fn pull<S: ReplicatedService>(
        &self,
        ctx: &ReplicaContext<S>,
        getter: Option<LocalGetter<'_>>,
        state_id: Option<StateId>,
        timeout: Duration,
    ) -> Result<Value, ReplicationError> {
        for attempt in 1..=self.attempts {
            let signal = match self.register(&state_id, attempt) {
                Registration::InFlight {
                    signal,
                    attempt: theirs,
                } => {
                    tracing::debug!(
                        state_id = ?state_id,
                        attempt,
                        their_attempt = theirs,
                        "pull already in flight, waiting"
                    );
                    if signal.wait(timeout).await == Some(true) {
                        let Some(getter) = getter else {
                            break;
                        };
                        let result = ctx.invoke_local(getter.method, getter.args).await?;
                        if !result.is_null() {
                            return Ok(result);
                        }
                    }
                    continue;
                }
                Registration::Owner(signal) => signal,
            };
            let _guard = PendingGuard {
                coordinator: self,
                state_id: &state_id,
            };

            if let Some(getter) = getter {
                let result = ctx.invoke_local(getter.method, getter.args).await?;
                if !result.is_null() {
                    signal.resolve(true);
                    return Ok(result);
                }
            }

            tracing::debug!(state_id = ?state_id, attempt, "pulling state");
            let holder = match self.locate(ctx, state_id.as_ref(), timeout).await {
                Ok(Some(holder)) => holder,
                Ok(None) => {
                    tracing::debug!(state_id = ?state_id, "no member holds state");
                    signal.resolve(false);
                    break;
                }
                Err(error) => {
                    tracing::warn!(state_id = ?state_id, attempt, error = %error, "state lookup failed");
                    signal.resolve(false);
                    continue;
                }
            };

            let key = StreamKey::new(state_id.clone(), AddressKey::new(holder));
            let (feed, reader) =
                state_stream(ctx.config.stream_buffer_chunks, ctx.config.io_timeout());
            ctx.streams.expect(key.clone(), feed);
            ctx.loader.spawn_apply(
                Arc::clone(&ctx.service),
                state_id.clone(),
                reader,
                Some(signal.clone()),
            );

            let request = MethodCall::new(
                ctx.table.control_id(ControlOp::SendState),
                CallPayload::SendState {
                    state_id: state_id.clone(),
                    recipient: ctx.local_key(),
                },
            );
            if let Err(error) = ctx
                .channel
                .call_remote_method(holder, &request, RequestOptions::get_none())
                .await
            {
                tracing::warn!(state_id = ?state_id, peer = %holder, error = %error, "sendState request failed");
                ctx.streams.abort(&key);
                continue;
            }

            match signal.wait(timeout).await {
                Some(true) => {
                    tracing::debug!(state_id = ?state_id, peer = %holder, "pulled state");
                    if let Some(getter) = getter {
                        let result = ctx.invoke_local(getter.method, getter.args).await?;
                        if !result.is_null() {
                            return Ok(result);
                        }
                    }
                    break;
                }
                Some(false) => {
                    tracing::warn!(state_id = ?state_id, peer = %holder, attempt, "failed to pull state");
                }
                None => {
                    tracing::warn!(
                        state_id = ?state_id,
                        peer = %holder,
                        attempt,
                        timeout_ms = timeout.as_millis() as u64,
                        "timed out pulling state"
                    );
                }
            }
            // A late transfer for this attempt must not be applied.
            ctx.streams.abort(&key);
        }
        Ok(Value::Null)
    }

    /// First remote member answering `hasState` with true.
    async fn locate<S: ReplicatedService>(
        &self,
        ctx: &ReplicaContext<S>,
        state_id: Option<&StateId>,
        timeout: Duration,
    ) -> Result<Option<NodeAddress>, TransportError> {
        let remote = ctx.membership.snapshot();
        if remote.is_empty() {
            return Ok(None);
        }
        let query = MethodCall::new(
            ctx.table.control_id(ControlOp::HasState),
            CallPayload::HasState {
                state_id: state_id.cloned(),
            },
        );
        let responses = ctx
            .channel
            .call_remote_methods(
                Destination::Members(remote),
                &query,
                RequestOptions::get_all(timeout),
            )
            .await?;
        Ok(responses
            .into_iter()
            .find(|response| response.reply.as_ref().is_some_and(|r| r.is_true()))
            .map(|response| response.sender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_shared_per_state_id() {
        let pulls = PullCoordinator::new(3);
        let id = Some(StateId::from("S1"));

        let Registration::Owner(owner) = pulls.register(&id, 1) else {
            panic!("first registration should own the pull");
        };
        match pulls.register(&id, 2) {
            Registration::InFlight { signal, attempt } => {
                assert_eq!(attempt, 1);
                owner.resolve(true);
                assert_eq!(signal.outcome(), Some(true));
            }
            Registration::Owner(_) => panic!("second registration should wait"),
        }
        assert!(matches!(pulls.register(&None, 1), Registration::Owner(_)));
        assert_eq!(pulls.pending(), 2);
    }

    #[test]
    fn guard_releases_registration() {
        let pulls = PullCoordinator::new(3);
        let id = Some(StateId::from("S2"));
        let _ = pulls.register(&id, 1);
        {
            let _guard = PendingGuard {
                coordinator: &pulls,
                state_id: &id,
            };
        }
        assert_eq!(pulls.pending(), 0);
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(PullCoordinator::new(0).attempts, 1);
    }
}
