//! Shared state of one replicated object.
//!
//! The proxy (outbound) and the handler (inbound) both hold an
//! `Arc<ReplicaContext>`; everything mutable inside is individually locked.

use crate::address::AddressKey;
use crate::config::ReplicationConfig;
use crate::errors::{ReplicationError, StreamError};
use crate::loader::StateLoader;
use crate::membership::MembershipTracker;
use crate::method::MethodTable;
use crate::pull::PullCoordinator;
use crate::service::ReplicatedService;
use crate::stream::{IncomingStreamRegistry, StateWriter};
use crate::transport::{Destination, GroupChannel, NodeAddress};
use crate::value::{StateId, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct ReplicaContext<S: ReplicatedService> {
    pub(crate) service: Arc<S>,
    pub(crate) table: MethodTable,
    pub(crate) channel: Arc<dyn GroupChannel>,
    pub(crate) config: ReplicationConfig,
    pub(crate) membership: MembershipTracker,
    pub(crate) streams: IncomingStreamRegistry,
    pub(crate) pulls: PullCoordinator,
    pub(crate) loader: StateLoader,
    initialized: AtomicBool,
}

impl<S: ReplicatedService> ReplicaContext<S> {
    pub(crate) fn new(
        service: Arc<S>,
        table: MethodTable,
        channel: Arc<dyn GroupChannel>,
        config: ReplicationConfig,
    ) -> Self {
        let local = channel.address();
        Self {
            service,
            table,
            membership: MembershipTracker::new(local),
            streams: IncomingStreamRegistry::new(),
            pulls: PullCoordinator::new(config.pull_attempts),
            loader: StateLoader::new(config.max_concurrent_state_loads),
            channel,
            config,
            initialized: AtomicBool::new(false),
        }
    }

    pub(crate) fn local_address(&self) -> NodeAddress {
        self.channel.address()
    }

    pub(crate) fn local_key(&self) -> AddressKey {
        AddressKey::new(self.channel.address())
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Run the wrapped method locally, surfacing its own error.
    pub(crate) async fn invoke_local(
        &self,
        method: &str,
        args: &[Value],
    ) -> Result<Value, ReplicationError> {
        Ok(self.service.invoke(method, args).await?)
    }

    /// Stream `state_id` to `dest`.
    ///
    /// The writer is closed on success and aborted when the object fails to
    /// produce its state.
    pub(crate) async fn stream_state(
        &self,
        dest: Destination,
        state_id: Option<&StateId>,
    ) -> Result<(), ReplicationError> {
        let Some(state) = self.service.state() else {
            return Err(ReplicationError::protocol(
                "object does not expose replicated state",
            ));
        };

        let mut writer = StateWriter::open(
            Arc::clone(&self.channel),
            &self.table,
            dest,
            state_id.cloned(),
            self.config.chunk_size,
        )
        .await?;

        let written = state.get_state(state_id, &mut writer).await;
        let closed: Result<(), StreamError> = match &written {
            Ok(()) => writer.close().await,
            Err(_) => writer.abort().await,
        };

        written?;
        closed?;
        tracing::trace!(state_id = ?state_id, bytes = writer.sent_bytes(), "sent state");
        Ok(())
    }
}
