//! Inbound dispatch of replicated calls and control operations.
//!
//! Nothing here raises across the wire: decode failures, unknown ids and
//! errors from the wrapped object all come back as [`Reply::Fault`].

use crate::address::AddressKey;
use crate::context::ReplicaContext;
use crate::method::{ControlOp, Slot};
use crate::service::ReplicatedService;
use crate::stream::{state_stream, StreamKey};
use crate::transport::{Destination, GroupReceiver, NodeAddress, RemoteFault, Reply, View};
use crate::value::{StateId, Value};
use crate::wire::{decode_call, CallPayload, MethodCall};
use async_trait::async_trait;
use std::sync::Arc;

/// Receiver bound to one replicated object.
pub struct ReplicationHandler<S: ReplicatedService> {
    ctx: Arc<ReplicaContext<S>>,
}

impl<S: ReplicatedService> ReplicationHandler<S> {
    pub(crate) fn new(ctx: Arc<ReplicaContext<S>>) -> Self {
        Self { ctx }
    }

    async fn dispatch(&self, sender: NodeAddress, call: MethodCall) -> Reply {
        let Some(slot) = self.ctx.table.slot(call.id) else {
            tracing::error!(id = call.id, peer = %sender, "no method found for id");
            return fault(format!("no method found for id {}", call.id));
        };

        match (slot, call.payload) {
            (Slot::Control(_), _) if sender == self.ctx.local_address() => Reply::none(),
            (Slot::Control(ControlOp::CreateState), CallPayload::CreateState { state_id }) => {
                self.create_state(StreamKey::new(state_id, AddressKey::new(sender)));
                Reply::none()
            }
            (
                Slot::Control(ControlOp::BuildState),
                CallPayload::BuildState { state_id, chunk },
            ) => {
                self.build_state(StreamKey::new(state_id, AddressKey::new(sender)), chunk)
                    .await;
                Reply::none()
            }
            (
                Slot::Control(ControlOp::FinishState),
                CallPayload::FinishState { state_id, aborted },
            ) => {
                self.finish_state(StreamKey::new(state_id, AddressKey::new(sender)), aborted)
                    .await;
                Reply::none()
            }
            (Slot::Control(ControlOp::HasState), CallPayload::HasState { state_id }) => {
                self.has_state(state_id.as_ref()).await
            }
            (
                Slot::Control(ControlOp::SendState),
                CallPayload::SendState {
                    state_id,
                    recipient,
                },
            ) => self.send_state(state_id.as_ref(), recipient).await,
            (Slot::Method(spec), CallPayload::Invoke { args }) => {
                match self.ctx.service.invoke(spec.name, &args).await {
                    Ok(value) => Reply::Value(value),
                    Err(error) => {
                        tracing::debug!(method = spec.name, peer = %sender, error = %error, "replicated call failed");
                        fault(error.to_string())
                    }
                }
            }
            (slot, _) => {
                tracing::error!(id = call.id, slot = ?slot, peer = %sender, "payload does not match id");
                fault(format!("payload does not match id {}", call.id))
            }
        }
    }

    fn create_state(&self, key: StreamKey) {
        if self.ctx.streams.adopt(&key) {
            tracing::trace!(state_id = ?key.state_id, peer = %key.sender, "stream started");
            return;
        }
        let (feed, reader) = state_stream(
            self.ctx.config.stream_buffer_chunks,
            self.ctx.config.io_timeout(),
        );
        let state_id = key.state_id.clone();
        if self.ctx.streams.open(key, feed) {
            tracing::debug!(state_id = ?state_id, "closed stale inbound stream");
        }
        self.ctx
            .loader
            .spawn_apply(Arc::clone(&self.ctx.service), state_id, reader, None);
    }

    async fn build_state(&self, key: StreamKey, chunk: Vec<u8>) {
        let Some(feed) = self.ctx.streams.feed(&key) else {
            tracing::trace!(state_id = ?key.state_id, peer = %key.sender, "chunk for unknown stream dropped");
            return;
        };
        if let Err(error) = feed.push(chunk).await {
            tracing::warn!(state_id = ?key.state_id, peer = %key.sender, error = %error, "abandoning inbound stream");
            self.ctx.streams.abort(&key);
        }
    }

    async fn finish_state(&self, key: StreamKey, aborted: bool) {
        if aborted {
            if self.ctx.streams.abort(&key) {
                tracing::debug!(state_id = ?key.state_id, peer = %key.sender, "sender aborted stream");
            }
            return;
        }
        match self.ctx.streams.finish(&key).await {
            Ok(true) => {
                tracing::trace!(state_id = ?key.state_id, peer = %key.sender, "stream finished");
            }
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(state_id = ?key.state_id, peer = %key.sender, error = %error, "failed to end inbound stream");
            }
        }
    }

    async fn has_state(&self, state_id: Option<&StateId>) -> Reply {
        let held = match state_id {
            None => self.ctx.is_initialized(),
            Some(id) => match self.ctx.service.state() {
                Some(state) => state.has_state(id).await,
                None => false,
            },
        };
        if held {
            Reply::Value(Value::Bool(true))
        } else {
            Reply::none()
        }
    }

    async fn send_state(&self, state_id: Option<&StateId>, recipient: AddressKey) -> Reply {
        let dest = Destination::Members(vec![recipient.address()]);
        match self.ctx.stream_state(dest, state_id).await {
            Ok(()) => Reply::none(),
            Err(error) => {
                tracing::warn!(state_id = ?state_id, peer = %recipient, error = %error, "failed to send state");
                fault(error.to_string())
            }
        }
    }
}

#[async_trait]
impl<S: ReplicatedService> GroupReceiver for ReplicationHandler<S> {
    async fn receive(&self, sender: NodeAddress, payload: &[u8]) -> Reply {
        match decode_call(payload) {
            Ok(call) => self.dispatch(sender, call).await,
            Err(error) => {
                tracing::error!(peer = %sender, error = %error, "failed to decode call");
                fault(error.to_string())
            }
        }
    }

    async fn view_accepted(&self, view: View) {
        self.ctx.membership.install(&view, self.ctx.service.state());
    }
}

fn fault(message: impl Into<String>) -> Reply {
    Reply::Fault(RemoteFault::new(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplicationConfig;
    use crate::errors::ServiceError;
    use crate::method::{MethodSpec, MethodTable, Replicated, ReturnKind};
    use crate::service::StateAware;
    use crate::signal::CompletionSignal;
    use crate::stream::{StateReader, StateWriter};
    use crate::transport::{ChannelFactory, MemoryGroup};
    use crate::wire::encode_call;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::time::Duration;

    const INTERFACE: &[MethodSpec] = &[
        MethodSpec::replicated("echo", ReturnKind::Value, Replicated::new().synchronous()),
        MethodSpec::replicated("fail", ReturnKind::Unit, Replicated::new().synchronous()),
    ];

    #[derive(Default)]
    struct Recorder {
        applied: Mutex<Vec<Vec<u8>>>,
        read_delay: Duration,
    }

    #[async_trait]
    impl ReplicatedService for Recorder {
        fn interface(&self) -> &'static [MethodSpec] {
            INTERFACE
        }

        async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError> {
            match method {
                "echo" => Ok(Value::List(args.to_vec())),
                _ => Err(ServiceError::failed("no luck")),
            }
        }

        fn state(&self) -> Option<&dyn StateAware> {
            Some(self)
        }
    }

    #[async_trait]
    impl StateAware for Recorder {
        async fn has_state(&self, state_id: &StateId) -> bool {
            state_id.as_str() == "held"
        }

        async fn get_state(
            &self,
            _state_id: Option<&StateId>,
            _sink: &mut StateWriter,
        ) -> Result<(), ServiceError> {
            Ok(())
        }

        async fn set_state(
            &self,
            _state_id: Option<&StateId>,
            source: &mut StateReader,
        ) -> Result<(), ServiceError> {
            tokio::time::sleep(self.read_delay).await;
            let bytes = source.read_to_end().await?;
            self.applied.lock().push(bytes);
            Ok(())
        }

        fn dropped_members(&self, _members: &HashSet<AddressKey>) {}
    }

    fn handler() -> (ReplicationHandler<Recorder>, Arc<ReplicaContext<Recorder>>) {
        handler_with(
            Recorder::default(),
            ReplicationConfig::default().with_io_timeout(Duration::from_secs(1)),
        )
    }

    fn handler_with(
        service: Recorder,
        config: ReplicationConfig,
    ) -> (ReplicationHandler<Recorder>, Arc<ReplicaContext<Recorder>>) {
        let table = MethodTable::build(INTERFACE).unwrap();
        let channel = MemoryGroup::new().create_channel("unit").unwrap();
        let ctx = Arc::new(ReplicaContext::new(Arc::new(service), table, channel, config));
        (ReplicationHandler::new(Arc::clone(&ctx)), ctx)
    }

    fn create(ctx: &ReplicaContext<Recorder>, id: &Option<StateId>) -> MethodCall {
        control(
            ctx,
            ControlOp::CreateState,
            CallPayload::CreateState {
                state_id: id.clone(),
            },
        )
    }

    fn chunk(ctx: &ReplicaContext<Recorder>, id: &Option<StateId>, bytes: &[u8]) -> MethodCall {
        control(
            ctx,
            ControlOp::BuildState,
            CallPayload::BuildState {
                state_id: id.clone(),
                chunk: bytes.to_vec(),
            },
        )
    }

    fn finish(ctx: &ReplicaContext<Recorder>, id: &Option<StateId>, aborted: bool) -> MethodCall {
        control(
            ctx,
            ControlOp::FinishState,
            CallPayload::FinishState {
                state_id: id.clone(),
                aborted,
            },
        )
    }

    /// Register a pulled stream from `peer` the way a pull does.
    fn expect_pull(
        ctx: &ReplicaContext<Recorder>,
        peer: NodeAddress,
        id: &Option<StateId>,
    ) -> CompletionSignal {
        let (feed, reader) = state_stream(ctx.config.stream_buffer_chunks, ctx.config.io_timeout());
        ctx.streams
            .expect(StreamKey::new(id.clone(), AddressKey::new(peer)), feed);
        let signal = CompletionSignal::new();
        ctx.loader.spawn_apply(
            Arc::clone(&ctx.service),
            id.clone(),
            reader,
            Some(signal.clone()),
        );
        signal
    }

    async fn send(
        handler: &ReplicationHandler<Recorder>,
        sender: NodeAddress,
        call: MethodCall,
    ) -> Reply {
        handler.receive(sender, &encode_call(&call).unwrap()).await
    }

    fn control(ctx: &ReplicaContext<Recorder>, op: ControlOp, payload: CallPayload) -> MethodCall {
        MethodCall::new(ctx.table.control_id(op), payload)
    }

    #[tokio::test]
    async fn readiness_query_waits_for_initialization() {
        let (handler, ctx) = handler();
        let peer = NodeAddress::random();
        let ready = || control(&ctx, ControlOp::HasState, CallPayload::HasState { state_id: None });

        assert_eq!(send(&handler, peer, ready()).await, Reply::none());
        ctx.mark_initialized();
        assert_eq!(
            send(&handler, peer, ready()).await,
            Reply::Value(Value::Bool(true))
        );
    }

    #[tokio::test]
    async fn keyed_query_asks_the_object() {
        let (handler, ctx) = handler();
        let peer = NodeAddress::random();
        let ask = |id: &str| {
            control(
                &ctx,
                ControlOp::HasState,
                CallPayload::HasState {
                    state_id: Some(StateId::from(id)),
                },
            )
        };

        assert_eq!(
            send(&handler, peer, ask("held")).await,
            Reply::Value(Value::Bool(true))
        );
        assert_eq!(send(&handler, peer, ask("other")).await, Reply::none());
    }

    #[tokio::test]
    async fn regular_calls_run_locally_and_faults_are_values() {
        let (handler, _ctx) = handler();
        let peer = NodeAddress::random();

        let echoed = send(&handler, peer, MethodCall::invoke(0, vec![Value::Int(1)])).await;
        assert_eq!(echoed, Reply::Value(Value::List(vec![Value::Int(1)])));

        let failed = send(&handler, peer, MethodCall::invoke(1, vec![])).await;
        assert_eq!(failed, Reply::Fault(RemoteFault::new("no luck")));

        let unknown = send(&handler, peer, MethodCall::invoke(99, vec![])).await;
        assert!(matches!(unknown, Reply::Fault(_)));

        let garbage = handler.receive(peer, &[0xde, 0xad]).await;
        assert!(matches!(garbage, Reply::Fault(_)));
    }

    #[tokio::test]
    async fn mismatched_payload_is_a_fault() {
        let (handler, _ctx) = handler();
        let call = MethodCall::new(
            0,
            CallPayload::FinishState {
                state_id: None,
                aborted: false,
            },
        );
        let reply = send(&handler, NodeAddress::random(), call).await;
        assert!(matches!(reply, Reply::Fault(_)));
    }

    #[tokio::test]
    async fn own_control_traffic_is_dropped() {
        let (handler, ctx) = handler();
        let me = ctx.local_address();
        let create = control(&ctx, ControlOp::CreateState, CallPayload::CreateState { state_id: None });

        assert_eq!(send(&handler, me, create).await, Reply::none());
        assert!(ctx.streams.is_empty());
    }

    #[tokio::test]
    async fn duplicate_create_replaces_the_live_stream() {
        let (handler, ctx) = handler();
        let peer = NodeAddress::random();
        let id = Some(StateId::from("S"));

        send(&handler, peer, create(&ctx, &id)).await;
        send(&handler, peer, chunk(&ctx, &id, b"stale")).await;
        send(&handler, peer, create(&ctx, &id)).await;
        send(&handler, peer, chunk(&ctx, &id, b"fresh")).await;
        send(&handler, peer, finish(&ctx, &id, false)).await;
        assert!(ctx.streams.is_empty());

        let service = Arc::clone(&ctx.service);
        for _ in 0..100 {
            if !service.applied.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*service.applied.lock(), vec![b"fresh".to_vec()]);

        // Chunks after the stream finished are ignored.
        assert_eq!(
            send(&handler, peer, chunk(&ctx, &id, b"late")).await,
            Reply::none()
        );
        assert!(ctx.streams.is_empty());
    }

    #[tokio::test]
    async fn finished_pull_resolves_true() {
        let (handler, ctx) = handler();
        let peer = NodeAddress::random();
        let id = Some(StateId::from("S"));
        let signal = expect_pull(&ctx, peer, &id);

        send(&handler, peer, create(&ctx, &id)).await;
        send(&handler, peer, chunk(&ctx, &id, b"AAAA")).await;
        send(&handler, peer, chunk(&ctx, &id, b"BBBB")).await;
        send(&handler, peer, finish(&ctx, &id, false)).await;

        assert_eq!(signal.wait(Duration::from_secs(2)).await, Some(true));
        assert_eq!(*ctx.service.applied.lock(), vec![b"AAAABBBB".to_vec()]);
    }

    #[tokio::test]
    async fn stalled_transfer_fails_the_pull_and_applies_nothing() {
        let service = Recorder {
            read_delay: Duration::from_millis(300),
            ..Recorder::default()
        };
        let config = ReplicationConfig::default()
            .with_io_timeout(Duration::from_millis(100))
            .with_stream_buffer_chunks(1);
        let (handler, ctx) = handler_with(service, config);
        let peer = NodeAddress::random();
        let id = Some(StateId::from("S"));
        let signal = expect_pull(&ctx, peer, &id);

        send(&handler, peer, create(&ctx, &id)).await;
        for bytes in [b"AAAA", b"BBBB", b"CCCC"] {
            send(&handler, peer, chunk(&ctx, &id, bytes)).await;
        }
        send(&handler, peer, finish(&ctx, &id, false)).await;

        assert_eq!(signal.wait(Duration::from_secs(2)).await, Some(false));
        assert!(ctx.service.applied.lock().is_empty());
        assert!(ctx.streams.is_empty());
    }

    #[tokio::test]
    async fn aborted_transfer_fails_the_pull_and_applies_nothing() {
        let (handler, ctx) = handler();
        let peer = NodeAddress::random();
        let id = Some(StateId::from("S"));
        let signal = expect_pull(&ctx, peer, &id);

        send(&handler, peer, create(&ctx, &id)).await;
        send(&handler, peer, chunk(&ctx, &id, b"AAAA")).await;
        send(&handler, peer, finish(&ctx, &id, true)).await;

        assert_eq!(signal.wait(Duration::from_secs(2)).await, Some(false));
        assert!(ctx.service.applied.lock().is_empty());
        assert!(ctx.streams.is_empty());
    }

    #[tokio::test]
    async fn clearing_streams_fails_an_open_pull() {
        let (handler, ctx) = handler();
        let peer = NodeAddress::random();
        let id = Some(StateId::from("S"));
        let signal = expect_pull(&ctx, peer, &id);

        send(&handler, peer, create(&ctx, &id)).await;
        send(&handler, peer, chunk(&ctx, &id, b"AAAA")).await;
        ctx.streams.clear();

        assert_eq!(signal.wait(Duration::from_secs(2)).await, Some(false));
        assert!(ctx.service.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn view_updates_membership() {
        let (handler, ctx) = handler();
        let other = NodeAddress::random();
        handler
            .view_accepted(View::new(vec![ctx.local_address(), other]))
            .await;
        assert_eq!(ctx.membership.snapshot(), vec![other]);
    }
}
