//! Value-typed wrapper around a transport address.

use crate::transport::NodeAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Owned, serializable form of a [`NodeAddress`].
///
/// Used wherever an address is a map key (inbound stream registry) or plain
/// replicated data (the `sendState` recipient, dropped-member sets). Equality
/// and hashing cover only the wrapped address, and serialization writes
/// nothing else, so a key decoded on a peer compares equal to the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressKey(NodeAddress);

impl AddressKey {
    /// Wrap a transport address
    pub fn new(address: NodeAddress) -> Self {
        Self(address)
    }

    /// The wrapped transport address
    pub fn address(&self) -> NodeAddress {
        self.0
    }
}

impl From<NodeAddress> for AddressKey {
    fn from(address: NodeAddress) -> Self {
        Self(address)
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
