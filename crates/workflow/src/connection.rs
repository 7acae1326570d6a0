//! Connection container: an immutable directed edge between two ports.

use lattice_core::{ConnectionId, NodeId};

use crate::extra::ExtraInfo;

/// A directed edge from an output port of one node to an input port of
/// another.
///
/// Endpoints are immutable after construction; only the optional extra
/// info can change. Connections are created and destroyed exclusively
/// through the owning [`Workflow`](crate::Workflow), which keeps both
/// endpoint nodes' adjacency in sync.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    source: NodeId,
    source_port: usize,
    target: NodeId,
    target_port: usize,
    extra: Option<ExtraInfo>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        source: NodeId,
        source_port: usize,
        target: NodeId,
        target_port: usize,
    ) -> Self {
        Self {
            id,
            source,
            source_port,
            target,
            target_port,
            extra: None,
        }
    }

    /// The connection's identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The source node.
    #[must_use]
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// The output port on the source node.
    #[must_use]
    pub fn source_port(&self) -> usize {
        self.source_port
    }

    /// The target node.
    #[must_use]
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// The input port on the target node.
    #[must_use]
    pub fn target_port(&self) -> usize {
        self.target_port
    }

    /// The attached extra info, if any.
    #[must_use]
    pub fn extra(&self) -> Option<&ExtraInfo> {
        self.extra.as_ref()
    }

    pub(crate) fn set_extra(&mut self, extra: Option<ExtraInfo>) {
        self.extra = extra;
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}:{} -> {}:{}]",
            self.id, self.source, self.source_port, self.target, self.target_port
        )
    }
}
