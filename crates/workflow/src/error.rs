//! Workflow-specific error types.

use lattice_core::{ConnectionId, NodeId};
use thiserror::Error;

/// Errors raised by graph mutation, payload registration, scheduling, or
/// persistence.
///
/// Structural errors (invalid ports, duplicate registration, unknown ids)
/// are returned to the caller of the mutating operation. Legality of a new
/// connection is a separate advisory predicate
/// ([`Workflow::can_add_connection`](crate::Workflow::can_add_connection)),
/// not an error. Execution failures never surface here; they are carried by
/// the completion event's success flag.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A port index is outside the node's port range.
    #[error("port {port} out of range (node has {count} ports)")]
    InvalidPort {
        /// The offending port index.
        port: usize,
        /// Number of ports on that side of the node.
        count: usize,
    },

    /// The input port already has an incoming connection.
    #[error("input port {port} of node {node} is already connected")]
    PortOccupied {
        /// The target node.
        node: NodeId,
        /// The occupied input port.
        port: usize,
    },

    /// The same payload instance was registered twice.
    #[error("payload instance is already registered with this workflow")]
    DuplicatePayload,

    /// A node id is already present in the node table.
    #[error("duplicate node id: {0}")]
    DuplicateNodeId(NodeId),

    /// A connection id is already present in the connection table.
    #[error("duplicate connection id: {0}")]
    DuplicateConnectionId(ConnectionId),

    /// A referenced node does not exist.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// A referenced connection does not exist.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The node's payload does not report itself ready to run. A node that
    /// is already running is not an error — duplicate dispatch is logged
    /// and ignored.
    #[error("node {0} is not in an executable state")]
    NotExecutable(NodeId),

    /// A scheduler state transition is not valid.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// The operation is refused while nodes are in flight.
    #[error("operation not allowed while execution is in progress")]
    ExecutionInProgress,

    /// No payload factory is registered under the given kind.
    #[error("unknown payload kind: {0}")]
    UnknownPayloadKind(String),

    /// A payload kind was registered twice.
    #[error("payload kind already registered: {0}")]
    DuplicatePayloadKind(String),

    /// A required key is missing from a settings tree.
    #[error("missing settings key: {0}")]
    MissingKey(String),

    /// A settings value has the wrong shape.
    #[error("malformed settings value at key: {0}")]
    MalformedValue(String),

    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error while reading or writing a workflow file.
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}
