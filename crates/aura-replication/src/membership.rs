//! Remote membership as seen by one replica.

use crate::address::AddressKey;
use crate::service::StateAware;
use crate::transport::{NodeAddress, View};
use parking_lot::Mutex;
use std::collections::HashSet;

/// Current remote members (the local member excluded).
///
/// Every read and write goes through one lock; callers get copies.
#[derive(Debug)]
pub struct MembershipTracker {
    local: NodeAddress,
    remote: Mutex<Vec<NodeAddress>>,
}

impl MembershipTracker {
    /// Tracker for the member at `local`, with no remote members yet
    pub fn new(local: NodeAddress) -> Self {
        Self {
            local,
            remote: Mutex::new(Vec::new()),
        }
    }

    /// Install `view`, returning the members it dropped.
    ///
    /// `state` is told about dropped members before the new list is
    /// visible to readers.
    pub fn install(&self, view: &View, state: Option<&dyn StateAware>) -> HashSet<AddressKey> {
        let mut remote = self.remote.lock();

        let dropped: HashSet<AddressKey> = remote
            .iter()
            .filter(|member| !view.contains(*member))
            .copied()
            .map(AddressKey::new)
            .collect();

        if !dropped.is_empty() {
            if let Some(state) = state {
                state.dropped_members(&dropped);
            }
        }

        *remote = view
            .members
            .iter()
            .filter(|member| **member != self.local)
            .copied()
            .collect();

        tracing::debug!(
            local = %self.local,
            remote = remote.len(),
            dropped = dropped.len(),
            "view installed"
        );
        dropped
    }

    /// Point-in-time copy of the remote members.
    pub fn snapshot(&self) -> Vec<NodeAddress> {
        self.remote.lock().clone()
    }

    /// True when no remote member is known.
    pub fn is_empty(&self) -> bool {
        self.remote.lock().is_empty()
    }

    /// Forget every remote member without notifying anyone.
    pub fn clear(&self) {
        self.remote.lock().clear();
    }

    /// The local member
    pub fn local(&self) -> NodeAddress {
        self.local
    }
}
