//! Aura replication prelude.
//!
//! What a replicated object and its callers usually need.

pub use crate::{
    AddressKey, MemoryGroup, MethodSpec, ObjectReplicator, Replicated, ReplicatedProxy,
    ReplicatedService, ReplicationConfig, ReplicationError, ReplicationMode, ReturnKind,
    ServiceError, StateAware, StateId, StateReader, StateWriter, Value,
};
