//! Outbound interception: the replicated proxy.
//!
//! Every call on a [`ReplicatedProxy`] is routed by the called method's
//! metadata: local only, broadcast to the group, or local with state
//! pushed to or pulled from peers.

use crate::context::ReplicaContext;
use crate::errors::{ReplicationError, ReplicationResult};
use crate::method::{MethodId, MethodSpec, Replicated, ReplicationMode, ReturnKind};
use crate::pull::LocalGetter;
use crate::service::ReplicatedService;
use crate::transport::{Destination, MemberResponse, NodeAddress, Reply, RequestOptions};
use crate::value::{StateId, Value};
use crate::wire::MethodCall;
use std::sync::Arc;
use std::time::Duration;

/// Cluster-wide proxy around one object.
///
/// Cheap to clone; clones share the replica.
pub struct ReplicatedProxy<S: ReplicatedService> {
    ctx: Arc<ReplicaContext<S>>,
}

impl<S: ReplicatedService> Clone for ReplicatedProxy<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
        }
    }
}

impl<S: ReplicatedService> ReplicatedProxy<S> {
    pub(crate) fn new(ctx: Arc<ReplicaContext<S>>) -> Self {
        Self { ctx }
    }

    /// Call `method` with `args` as the method's metadata prescribes.
    ///
    /// Errors raised by the wrapped object come back as
    /// [`ReplicationError::Service`]; failures while replicating are wrapped
    /// in [`ReplicationError::Dispatch`].
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> ReplicationResult<Value> {
        let Some(spec) = self
            .ctx
            .service
            .interface()
            .iter()
            .find(|spec| spec.name == method)
        else {
            return Err(ReplicationError::NoSuchMethod {
                method: method.to_string(),
            });
        };

        let (Some(meta), Some(id)) = (spec.replicated, self.ctx.table.id_of(method)) else {
            return self.ctx.invoke_local(method, &args).await;
        };

        if self.ctx.membership.is_empty() {
            if meta.remote_only {
                return Ok(Value::Null);
            }
            return self.ctx.invoke_local(method, &args).await;
        }

        match meta.replicate_state {
            ReplicationMode::None => self.replicate_call(spec, meta, id, &args).await,
            ReplicationMode::Push => self.push_after(spec, &args).await,
            ReplicationMode::Pull => self.pull_if_empty(spec, meta, &args).await,
        }
    }

    async fn replicate_call(
        &self,
        spec: &MethodSpec,
        meta: Replicated,
        id: MethodId,
        args: &[Value],
    ) -> ReplicationResult<Value> {
        let Some(dest) = call_destination(meta, || self.ctx.membership.snapshot()) else {
            return Ok(Value::Null);
        };
        let options = if meta.asynch {
            RequestOptions::get_none()
        } else {
            RequestOptions::get_all(self.call_timeout(meta))
        };
        let call = MethodCall::invoke(id, args.to_vec());

        let responses = self
            .ctx
            .channel
            .call_remote_methods(dest, &call, options)
            .await
            .map_err(|error| ReplicationError::dispatch(spec.name, args, error.into()))?;

        if meta.asynch {
            return Ok(Value::Null);
        }
        Ok(aggregate(spec.returns, responses))
    }

    async fn push_after(&self, spec: &MethodSpec, args: &[Value]) -> ReplicationResult<Value> {
        let state_id = state_id_arg(spec, args)?;
        let result = self.ctx.invoke_local(spec.name, args).await?;
        let remote = self.ctx.membership.snapshot();
        if !remote.is_empty() {
            let dest = Destination::Members(remote);
            self.ctx
                .stream_state(dest, state_id.as_ref())
                .await
                .map_err(|error| ReplicationError::dispatch(spec.name, args, error))?;
            tracing::debug!(method = spec.name, state_id = ?state_id, "pushed state");
        }
        Ok(result)
    }

    async fn pull_if_empty(
        &self,
        spec: &MethodSpec,
        meta: Replicated,
        args: &[Value],
    ) -> ReplicationResult<Value> {
        let state_id = state_id_arg(spec, args)?;
        let result = self.ctx.invoke_local(spec.name, args).await?;
        if !result.is_null() {
            return Ok(result);
        }
        let getter = LocalGetter {
            method: spec.name,
            args,
        };
        self.ctx
            .pulls
            .pull(&self.ctx, Some(getter), state_id, self.call_timeout(meta))
            .await
    }

    fn call_timeout(&self, meta: Replicated) -> Duration {
        meta.timeout
            .unwrap_or_else(|| self.ctx.config.default_call_timeout())
    }

    /// The wrapped object
    pub fn service(&self) -> &Arc<S> {
        &self.ctx.service
    }

    /// This member's transport address
    pub fn address(&self) -> NodeAddress {
        self.ctx.local_address()
    }

    /// Point-in-time copy of the remote members
    pub fn remote_members(&self) -> Vec<NodeAddress> {
        self.ctx.membership.snapshot()
    }

    /// Whether the bootstrap pull has completed
    pub fn is_initialized(&self) -> bool {
        self.ctx.is_initialized()
    }

    /// Pulls currently in flight
    pub fn pending_pulls(&self) -> usize {
        self.ctx.pulls.pending()
    }

    /// Leave the cluster. Later calls run locally.
    pub async fn stop(&self) {
        self.ctx.channel.close().await;
        self.ctx.streams.clear();
        self.ctx.membership.clear();
        tracing::debug!(local = %self.ctx.local_address(), "replica stopped");
    }
}

/// State id named by the first argument of a state-replicating method.
fn state_id_arg(spec: &MethodSpec, args: &[Value]) -> ReplicationResult<Option<StateId>> {
    args.first()
        .map_or(Some(None), StateId::from_value)
        .ok_or_else(|| ReplicationError::InvalidStateId {
            method: spec.name.to_string(),
        })
}

/// Where a plain replicated call goes.
///
/// `None` when a remote-only call has nobody left to reach.
fn call_destination(
    meta: Replicated,
    remote: impl FnOnce() -> Vec<NodeAddress>,
) -> Option<Destination> {
    if !meta.remote_only {
        return Some(Destination::All);
    }
    let remote = remote();
    if remote.is_empty() {
        None
    } else {
        Some(Destination::Members(remote))
    }
}

/// Combine synchronous responses according to the declared return type.
fn aggregate(returns: ReturnKind, responses: Vec<MemberResponse>) -> Value {
    match returns {
        ReturnKind::Bool => Value::Bool(
            responses
                .iter()
                .all(|response| response.reply.as_ref().is_some_and(|r| r.is_true())),
        ),
        ReturnKind::Collection => Value::List(
            responses
                .into_iter()
                .filter_map(|response| match response.reply {
                    Some(Reply::Value(Value::List(items))) => Some(items),
                    _ => None,
                })
                .flatten()
                .collect(),
        ),
        ReturnKind::Unit | ReturnKind::Value => Value::Null,
    }
}
