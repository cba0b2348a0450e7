//! Replication wire format helpers.
//!
//! The transport decides how bytes move; this module fixes what a call looks
//! like. Routing is by `id` alone. The payload must agree with the id or the
//! receiving handler answers with a protocol fault.

use crate::address::AddressKey;
use crate::method::MethodId;
use crate::transport::{Reply, TransportError};
use crate::value::{StateId, Value};
use serde::{Deserialize, Serialize};

/// Bumped whenever the encoding of [`MethodCall`] changes.
pub const REPLICATION_WIRE_SCHEMA_VERSION: u16 = 1;

/// Arguments of a call, shaped by what the id refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallPayload {
    /// Regular interface method
    Invoke {
        /// Call arguments
        args: Vec<Value>,
    },
    /// `hasState` query
    HasState {
        /// Requested state, `None` for "are you initialized"
        state_id: Option<StateId>,
    },
    /// `sendState` request
    SendState {
        /// Requested state
        state_id: Option<StateId>,
        /// Member that should receive the stream
        recipient: AddressKey,
    },
    /// `createState` stream open
    CreateState {
        /// Streamed state
        state_id: Option<StateId>,
    },
    /// `buildState` stream chunk
    BuildState {
        /// Streamed state
        state_id: Option<StateId>,
        /// Chunk bytes
        #[serde(with = "serde_bytes")]
        chunk: Vec<u8>,
    },
    /// `finishState` stream end
    FinishState {
        /// Streamed state
        state_id: Option<StateId>,
        /// Sender gave up; the receiver discards what it got
        aborted: bool,
    },
}

/// A numbered call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCall {
    /// Method or control id from the shared method table
    pub id: MethodId,
    /// Arguments
    pub payload: CallPayload,
}

impl MethodCall {
    /// Create a call
    pub fn new(id: MethodId, payload: CallPayload) -> Self {
        Self { id, payload }
    }

    /// Regular method call
    pub fn invoke(id: MethodId, args: Vec<Value>) -> Self {
        Self::new(id, CallPayload::Invoke { args })
    }

    /// State id named by a control payload.
    ///
    /// `None` for `Invoke`; `Some(None)` for the whole state.
    pub fn state_id(&self) -> Option<Option<&StateId>> {
        match &self.payload {
            CallPayload::Invoke { .. } => None,
            CallPayload::HasState { state_id }
            | CallPayload::SendState { state_id, .. }
            | CallPayload::CreateState { state_id }
            | CallPayload::BuildState { state_id, .. }
            | CallPayload::FinishState { state_id, .. } => Some(state_id.as_ref()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CallEnvelope {
    schema_version: u16,
    call: MethodCall,
}

/// Encode a call inside a versioned envelope.
pub fn encode_call(call: &MethodCall) -> Result<Vec<u8>, TransportError> {
    let envelope = CallEnvelope {
        schema_version: REPLICATION_WIRE_SCHEMA_VERSION,
        call: call.clone(),
    };
    bincode::serialize(&envelope).map_err(|e| TransportError::Codec {
        reason: e.to_string(),
    })
}

/// Decode a call, rejecting other schema versions.
pub fn decode_call(bytes: &[u8]) -> Result<MethodCall, TransportError> {
    let envelope: CallEnvelope = bincode::deserialize(bytes).map_err(|e| TransportError::Codec {
        reason: e.to_string(),
    })?;
    if envelope.schema_version != REPLICATION_WIRE_SCHEMA_VERSION {
        return Err(TransportError::Codec {
            reason: format!(
                "unsupported schema version {} (expected {})",
                envelope.schema_version, REPLICATION_WIRE_SCHEMA_VERSION
            ),
        });
    }
    Ok(envelope.call)
}

/// Encode a handler reply.
pub fn encode_reply(reply: &Reply) -> Result<Vec<u8>, TransportError> {
    bincode::serialize(reply).map_err(|e| TransportError::Codec {
        reason: e.to_string(),
    })
}

/// Decode a handler reply.
pub fn decode_reply(bytes: &[u8]) -> Result<Reply, TransportError> {
    bincode::deserialize(bytes).map_err(|e| TransportError::Codec {
        reason: e.to_string(),
    })
}
