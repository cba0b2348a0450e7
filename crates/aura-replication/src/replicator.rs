//! Replication setup.

use crate::config::ReplicationConfig;
use crate::context::ReplicaContext;
use crate::errors::ReplicationResult;
use crate::handler::ReplicationHandler;
use crate::interceptor::ReplicatedProxy;
use crate::method::MethodTable;
use crate::service::ReplicatedService;
use crate::transport::{ChannelFactory, GroupReceiver};
use std::sync::Arc;
use std::time::Duration;

/// Turns plain objects into cluster-wide replicated proxies.
pub struct ObjectReplicator<F: ChannelFactory> {
    factory: F,
    config: ReplicationConfig,
}

impl<F: ChannelFactory> ObjectReplicator<F> {
    /// Replicator using default settings
    pub fn new(factory: F) -> Self {
        Self::with_config(factory, ReplicationConfig::default())
    }

    /// Replicator using `config`
    pub fn with_config(factory: F, config: ReplicationConfig) -> Self {
        Self { factory, config }
    }

    /// Settings handed to every replica
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Join `cluster` with `service` and return its proxy.
    ///
    /// A state-aware object learns its own address, then pulls the whole
    /// state from a peer (bounded by `start_timeout` per attempt) before the
    /// replica reports itself initialized. The channel is closed again if
    /// any of this fails.
    pub async fn replicate<S: ReplicatedService>(
        &self,
        cluster: &str,
        service: Arc<S>,
        start_timeout: Duration,
    ) -> ReplicationResult<ReplicatedProxy<S>> {
        self.config.validate()?;
        let table = MethodTable::build(service.interface())?;
        let channel = self.factory.create_channel(cluster)?;

        let ctx = Arc::new(ReplicaContext::new(
            service,
            table,
            Arc::clone(&channel),
            self.config.clone(),
        ));
        let handler: Arc<dyn GroupReceiver> = Arc::new(ReplicationHandler::new(Arc::clone(&ctx)));

        if let Err(error) = channel.connect(cluster, handler).await {
            channel.close().await;
            return Err(error.into());
        }

        if let Some(state) = ctx.service.state() {
            state.set_address(ctx.local_key());
            if let Err(error) = ctx.pulls.pull(&ctx, None, None, start_timeout).await {
                tracing::error!(cluster, error = %error, "initial state pull failed");
                channel.close().await;
                return Err(error);
            }
        }

        ctx.mark_initialized();
        tracing::info!(
            cluster,
            local = %ctx.local_address(),
            methods = ctx.table.len(),
            remote = ctx.membership.snapshot().len(),
            "replica started"
        );
        Ok(ReplicatedProxy::new(ctx))
    }

    /// Leave the cluster behind `proxy`.
    pub async fn stop<S: ReplicatedService>(&self, proxy: &ReplicatedProxy<S>) {
        proxy.stop().await;
    }
}
