//! Replication metadata and the method numbering shared by all members.
//!
//! Every member of a cluster numbers the replicated methods of an interface
//! the same way: annotated methods get `0..N` in declaration order and the
//! five state-transfer control operations take `N..N+5` in a fixed order.
//! Nothing on the wire carries method names, so the table is the protocol.

use crate::errors::ReplicationError;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Numeric id of a replicated or control operation.
pub type MethodId = u16;

/// How state accompanies a replicated call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationMode {
    /// Plain call replication
    #[default]
    None,
    /// Stream state to peers after the local call
    Push,
    /// Fetch state from a peer when the local call has nothing
    Pull,
}

/// Replication metadata attached to an interface method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replicated {
    /// Broadcast without waiting for responses
    pub asynch: bool,
    /// Only remote members execute the call
    pub remote_only: bool,
    /// Round-trip timeout; the configured default applies when `None`
    pub timeout: Option<Duration>,
    /// State replication policy
    pub replicate_state: ReplicationMode,
}

impl Replicated {
    /// Asynchronous, all members, no state replication.
    pub const fn new() -> Self {
        Self {
            asynch: true,
            remote_only: false,
            timeout: None,
            replicate_state: ReplicationMode::None,
        }
    }

    /// Wait for every member's response
    pub const fn synchronous(mut self) -> Self {
        self.asynch = false;
        self
    }

    /// Skip local execution
    pub const fn remote_only(mut self) -> Self {
        self.remote_only = true;
        self
    }

    /// Bound the round trip
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a state replication policy
    pub const fn replicate_state(mut self, mode: ReplicationMode) -> Self {
        self.replicate_state = mode;
        self
    }
}

impl Default for Replicated {
    fn default() -> Self {
        Self::new()
    }
}

/// Declared return type, which decides how synchronous responses combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// No meaningful result
    Unit,
    /// Logical AND across members
    Bool,
    /// Union of member collections
    Collection,
    /// Any other value; no aggregate
    Value,
}

/// One method of a replicated interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    /// Method name, unique within the interface
    pub name: &'static str,
    /// Declared return type
    pub returns: ReturnKind,
    /// Replication metadata; `None` means always local
    pub replicated: Option<Replicated>,
}

impl MethodSpec {
    /// A method that always runs locally
    pub const fn local(name: &'static str, returns: ReturnKind) -> Self {
        Self {
            name,
            returns,
            replicated: None,
        }
    }

    /// A method carrying replication metadata
    pub const fn replicated(name: &'static str, returns: ReturnKind, meta: Replicated) -> Self {
        Self {
            name,
            returns,
            replicated: Some(meta),
        }
    }
}

/// Reserved state-transfer operations, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOp {
    /// Does the receiver hold the named state?
    HasState,
    /// Ask the receiver to stream state to a recipient
    SendState,
    /// Open an inbound state stream
    CreateState,
    /// One chunk of an inbound state stream
    BuildState,
    /// End of an inbound state stream
    FinishState,
}

impl ControlOp {
    /// All control operations in id order.
    pub const ALL: [ControlOp; 5] = [
        ControlOp::HasState,
        ControlOp::SendState,
        ControlOp::CreateState,
        ControlOp::BuildState,
        ControlOp::FinishState,
    ];

    /// Offset past the last regular method id.
    pub const fn offset(self) -> MethodId {
        match self {
            ControlOp::HasState => 0,
            ControlOp::SendState => 1,
            ControlOp::CreateState => 2,
            ControlOp::BuildState => 3,
            ControlOp::FinishState => 4,
        }
    }

    /// Operations that carry stream traffic
    pub const fn is_stream(self) -> bool {
        matches!(
            self,
            ControlOp::CreateState | ControlOp::BuildState | ControlOp::FinishState
        )
    }

    /// Wire name
    pub const fn name(self) -> &'static str {
        match self {
            ControlOp::HasState => "hasState",
            ControlOp::SendState => "sendState",
            ControlOp::CreateState => "createState",
            ControlOp::BuildState => "buildState",
            ControlOp::FinishState => "finishState",
        }
    }
}

/// What an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot<'a> {
    /// A replicated interface method
    Method(&'a MethodSpec),
    /// A reserved control operation
    Control(ControlOp),
}

/// Fixed id assignment for one interface.
///
/// Read-only once built; the interceptor and the handler share it.
#[derive(Debug, Clone)]
pub struct MethodTable {
    methods: Vec<MethodSpec>,
    ids: HashMap<&'static str, MethodId>,
}

impl MethodTable {
    /// Number the replicated methods of `interface`.
    ///
    /// Methods without metadata are skipped. Names must be unique and the
    /// table must leave room for the control ids.
    pub fn build(interface: &[MethodSpec]) -> Result<Self, ReplicationError> {
        let mut methods = Vec::new();
        let mut ids = HashMap::new();
        let mut seen = HashSet::new();

        for spec in interface {
            if !seen.insert(spec.name) {
                return Err(ReplicationError::protocol(format!(
                    "duplicate method name {} in replicated interface",
                    spec.name
                )));
            }
            if spec.replicated.is_none() {
                continue;
            }
            let id = MethodId::try_from(methods.len())
                .ok()
                .filter(|id| id.checked_add(ControlOp::ALL.len() as MethodId).is_some())
                .ok_or_else(|| {
                    ReplicationError::protocol("too many replicated methods to number")
                })?;
            ids.insert(spec.name, id);
            methods.push(*spec);
        }

        Ok(Self { methods, ids })
    }

    /// Number of replicated interface methods (`N`).
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True when the interface has no replicated methods.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Total ids in use, control operations included (`N + 5`).
    pub fn total_len(&self) -> usize {
        self.methods.len() + ControlOp::ALL.len()
    }

    /// Id of a replicated method.
    pub fn id_of(&self, name: &str) -> Option<MethodId> {
        self.ids.get(name).copied()
    }

    /// Replicated method with this id.
    pub fn method(&self, id: MethodId) -> Option<&MethodSpec> {
        self.methods.get(usize::from(id))
    }

    /// Id of a control operation.
    pub fn control_id(&self, op: ControlOp) -> MethodId {
        // `build` guarantees N + 4 fits.
        self.methods.len() as MethodId + op.offset()
    }

    /// Resolve an id received from the wire.
    pub fn slot(&self, id: MethodId) -> Option<Slot<'_>> {
        if let Some(spec) = self.method(id) {
            return Some(Slot::Method(spec));
        }
        let base = self.methods.len();
        ControlOp::ALL
            .into_iter()
            .find(|op| base + usize::from(op.offset()) == usize::from(id))
            .map(Slot::Control)
    }

    /// Replicated methods in id order.
    pub fn methods(&self) -> &[MethodSpec] {
        &self.methods
    }
}
