//! Contract between the replicator and the object it wraps.
//!
//! A replicated object describes its interface as a static slice of
//! [`MethodSpec`]s and executes calls through one dispatch function. Objects
//! whose state can be transferred also expose [`StateAware`].
//!
//! # Example
//!
//! ```rust,ignore
//! const COUNTER: &[MethodSpec] = &[
//!     MethodSpec::replicated("add", ReturnKind::Unit, Replicated::new().synchronous()),
//!     MethodSpec::local("get", ReturnKind::Value),
//! ];
//!
//! #[async_trait]
//! impl ReplicatedService for Counter {
//!     fn interface(&self) -> &'static [MethodSpec] {
//!         COUNTER
//!     }
//!
//!     async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError> {
//!         match method {
//!             "add" => { /* ... */ Ok(Value::Null) }
//!             "get" => Ok(Value::Int(self.total())),
//!             other => Err(ServiceError::unknown_method(other)),
//!         }
//!     }
//! }
//! ```

use crate::address::AddressKey;
use crate::errors::ServiceError;
use crate::method::MethodSpec;
use crate::stream::{StateReader, StateWriter};
use crate::value::{StateId, Value};
use async_trait::async_trait;
use std::collections::HashSet;

/// An object that can sit behind a replicated proxy.
#[async_trait]
pub trait ReplicatedService: Send + Sync + 'static {
    /// Every interface method in declaration order.
    ///
    /// All members must return the same slice for the same interface revision.
    fn interface(&self) -> &'static [MethodSpec];

    /// Execute `method` locally.
    async fn invoke(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError>;

    /// State transfer capability, if supported.
    fn state(&self) -> Option<&dyn StateAware> {
        None
    }
}

/// State transfer hooks of a replicated object.
#[async_trait]
pub trait StateAware: Send + Sync {
    /// Told this member's own address once the channel is connected.
    fn set_address(&self, _address: AddressKey) {}

    /// Whether this member holds `state_id`.
    async fn has_state(&self, state_id: &StateId) -> bool;

    /// Write `state_id` (or the whole state for `None`) into `sink`.
    ///
    /// The caller closes the sink, or aborts it when this returns an error.
    async fn get_state(
        &self,
        state_id: Option<&StateId>,
        sink: &mut StateWriter,
    ) -> Result<(), ServiceError>;

    /// Replace `state_id` (or the whole state) with what `source` yields.
    ///
    /// Apply nothing unless `source` reaches its end; an abandoned stream
    /// fails with `StreamError::Closed`.
    async fn set_state(
        &self,
        state_id: Option<&StateId>,
        source: &mut StateReader,
    ) -> Result<(), ServiceError>;

    /// Members that left the view since the previous one.
    fn dropped_members(&self, members: &HashSet<AddressKey>);
}
