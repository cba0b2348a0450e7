#![deny(clippy::dbg_macro)]
#![deny(clippy::todo)]
#![forbid(unsafe_code)]
//! # Aura Replication - Replicated Objects over a Group Channel
//!
//! Wraps a plain object in a cluster-wide proxy. Each interface method
//! carries replication metadata that decides what a call does:
//! - run locally only
//! - broadcast to the group, optionally waiting for and combining replies
//! - run locally, then push the resulting state to every peer
//! - run locally, and pull the state from a peer when nothing is held yet
//!
//! ## Design Principles
//!
//! - **Fixed numbering**: methods travel as ids from a [`MethodTable`] every
//!   member derives identically from the interface declaration
//! - **Streamed state**: state moves as `createState`/`buildState`/`finishState`
//!   chunks on the same channel as calls
//! - **Deduplicated pulls**: concurrent pulls of one state share a transfer,
//!   bounded by a fixed number of attempts
//! - **Errors as values**: remote failures come back as [`Reply::Fault`]
//!   rather than tearing down the call
//!
//! The transport is abstract ([`GroupChannel`]); [`MemoryGroup`] runs a whole
//! cluster in one process.

pub mod address;
pub mod config;
pub(crate) mod context;
pub mod errors;
pub mod handler;
pub mod interceptor;
pub mod loader;
pub mod membership;
pub mod method;
pub mod prelude;
pub(crate) mod pull;
pub mod replicator;
pub mod service;
pub mod signal;
pub mod stream;
pub mod transport;
pub mod value;
pub mod wire;

pub use address::AddressKey;
pub use config::ReplicationConfig;
pub use errors::{ReplicationError, ReplicationResult, ServiceError, StreamError};
pub use handler::ReplicationHandler;
pub use interceptor::ReplicatedProxy;
pub use membership::MembershipTracker;
pub use method::{
    ControlOp, MethodId, MethodSpec, MethodTable, Replicated, ReplicationMode, ReturnKind,
};
pub use replicator::ObjectReplicator;
pub use service::{ReplicatedService, StateAware};
pub use signal::CompletionSignal;
pub use stream::{IncomingStreamRegistry, StateReader, StateWriter};
pub use transport::{
    ChannelFactory, Destination, GroupChannel, GroupReceiver, MemoryGroup, NodeAddress, Reply,
    TransportError, View,
};
pub use value::{StateId, Value};
