//! Group transport boundary.
//!
//! Replication sits on top of a group-communication transport that owns
//! message delivery, membership views and address identity. This module only
//! states what the core needs from it:
//!
//! - request/response calls to one, several or all members, with a
//!   fire-and-forget mode ([`GroupChannel`])
//! - per-destination ordered delivery, which the state streams rely on
//! - a view of the membership, self included, on every change ([`GroupReceiver`])
//!
//! [`memory`] provides an in-process implementation.

pub mod memory;

use crate::value::Value;
use crate::wire::MethodCall;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub use memory::{MemoryChannel, MemoryGroup};

/// Opaque transport address of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress(Uuid);

impl NodeAddress {
    /// Wrap a transport-assigned identifier
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Fresh random address
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying identifier
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        write!(f, "node-{}", &simple[..8])
    }
}

/// Membership snapshot delivered on every change, self included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    /// Members in join order
    pub members: Vec<NodeAddress>,
}

impl View {
    /// Create a view
    pub fn new(members: Vec<NodeAddress>) -> Self {
        Self { members }
    }

    /// Whether `address` is in this view
    pub fn contains(&self, address: &NodeAddress) -> bool {
        self.members.contains(address)
    }
}

/// Who a call goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Every member of the current view, the sender included
    All,
    /// Exactly these members
    Members(Vec<NodeAddress>),
}

/// Whether the caller waits for responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Wait for every destination, up to the timeout
    GetAll,
    /// Fire and forget
    GetNone,
}

/// Per-call delivery options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Response mode
    pub mode: ResponseMode,
    /// Round-trip bound for `GetAll`
    pub timeout: Duration,
}

impl RequestOptions {
    /// Wait for all responses up to `timeout`
    pub fn get_all(timeout: Duration) -> Self {
        Self {
            mode: ResponseMode::GetAll,
            timeout,
        }
    }

    /// Fire and forget
    pub fn get_none() -> Self {
        Self {
            mode: ResponseMode::GetNone,
            timeout: Duration::ZERO,
        }
    }
}

/// Error reported by a remote member, carried as a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RemoteFault {
    /// Error message
    pub message: String,
}

impl RemoteFault {
    /// Create a fault
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Handler output: a result or an error returned as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Normal result; `Value::Null` means "nothing"
    Value(Value),
    /// Failure, not raised on the caller side
    Fault(RemoteFault),
}

impl Reply {
    /// The empty answer
    pub fn none() -> Self {
        Reply::Value(Value::Null)
    }

    /// Result value, if this is not a fault
    pub fn value(&self) -> Option<&Value> {
        match self {
            Reply::Value(v) => Some(v),
            Reply::Fault(_) => None,
        }
    }

    /// True only for `Value(Bool(true))`
    pub fn is_true(&self) -> bool {
        matches!(self, Reply::Value(Value::Bool(true)))
    }
}

/// One member's response to a `GetAll` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberResponse {
    /// Responding member
    pub sender: NodeAddress,
    /// `None` if nothing arrived before the timeout
    pub reply: Option<Reply>,
}

/// Transport failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Channel has not joined a cluster (or was closed)
    #[error("Channel is not connected")]
    NotConnected,

    /// Connecting to the cluster failed
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Reason for the failure
        reason: String,
    },

    /// A call timed out
    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Destination is not a member of the current view
    #[error("Unknown member: {address}")]
    UnknownMember {
        /// Destination address
        address: NodeAddress,
    },

    /// Encoding or decoding a message failed
    #[error("Codec failure: {reason}")]
    Codec {
        /// Reason for the failure
        reason: String,
    },
}

/// Inbound side of a channel: calls and views are delivered here.
#[async_trait]
pub trait GroupReceiver: Send + Sync + 'static {
    /// Handle one encoded call from `sender` and produce its reply.
    async fn receive(&self, sender: NodeAddress, payload: &[u8]) -> Reply;

    /// A new membership view was installed.
    async fn view_accepted(&self, view: View);
}

/// Outbound side of a group channel.
#[async_trait]
pub trait GroupChannel: Send + Sync + 'static {
    /// This member's address; stable for the channel's lifetime
    fn address(&self) -> NodeAddress;

    /// Join `cluster` and start delivering to `receiver`.
    ///
    /// The joiner's first view has been delivered when this returns.
    async fn connect(
        &self,
        cluster: &str,
        receiver: Arc<dyn GroupReceiver>,
    ) -> Result<(), TransportError>;

    /// Call several members; with `GetNone` the response list is empty.
    async fn call_remote_methods(
        &self,
        dest: Destination,
        call: &MethodCall,
        options: RequestOptions,
    ) -> Result<Vec<MemberResponse>, TransportError>;

    /// Call one member.
    async fn call_remote_method(
        &self,
        dest: NodeAddress,
        call: &MethodCall,
        options: RequestOptions,
    ) -> Result<Option<Reply>, TransportError>;

    /// Leave the cluster. Idempotent.
    async fn close(&self);
}

/// Creates channels for a named cluster.
pub trait ChannelFactory: Send + Sync {
    /// Create an unconnected channel
    fn create_channel(&self, cluster: &str) -> Result<Arc<dyn GroupChannel>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_truthiness() {
        assert!(Reply::Value(Value::Bool(true)).is_true());
        assert!(!Reply::Value(Value::Bool(false)).is_true());
        assert!(!Reply::none().is_true());
        assert!(!Reply::Fault(RemoteFault::new("x")).is_true());
    }

    #[test]
    fn address_display_is_short() {
        let addr = NodeAddress::random();
        assert_eq!(addr.to_string().len(), "node-".len() + 8);
    }
}
