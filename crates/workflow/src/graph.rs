//! The workflow manager: owns the node and connection tables, assigns
//! identifiers, validates new connections, and emits change events.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use lattice_core::{ConnectionId, NodeId};
use parking_lot::Mutex;
use petgraph::algo::{has_path_connecting, is_cyclic_directed};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::connection::Connection;
use crate::error::WorkflowError;
use crate::event::{EventBus, EventSubscriber, WorkflowEvent};
use crate::extra::ExtraInfo;
use crate::node::{RunRecord, WorkflowNode};
use crate::payload::PayloadHandle;
use crate::state::NodeState;

/// The node/connection tables and id counters, guarded by one mutex.
///
/// This is the only shared mutable state in the crate; graph mutators, the
/// scheduling pool, and worker completion calls all take the same lock,
/// mutate, release, and only then emit events.
#[derive(Debug)]
pub(crate) struct Tables {
    pub(crate) nodes: BTreeMap<NodeId, WorkflowNode>,
    pub(crate) connections: BTreeMap<ConnectionId, Connection>,
    /// Next node id to hand out. Persisted, so re-opened graphs never
    /// reuse ids. Node ids start at 1.
    pub(crate) next_node_id: u64,
    /// Next connection id to hand out. Connection ids start at 0.
    pub(crate) next_connection_id: u64,
}

impl Tables {
    fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            connections: BTreeMap::new(),
            next_node_id: 1,
            next_connection_id: 0,
        }
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&WorkflowNode, WorkflowError> {
        self.nodes.get(&id).ok_or(WorkflowError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut WorkflowNode, WorkflowError> {
        self.nodes
            .get_mut(&id)
            .ok_or(WorkflowError::NodeNotFound(id))
    }

    /// Snapshot the adjacency as a petgraph digraph for path queries.
    fn adjacency(&self) -> (DiGraph<NodeId, ()>, HashMap<NodeId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index_map = HashMap::new();
        for &id in self.nodes.keys() {
            let idx = graph.add_node(id);
            index_map.insert(id, idx);
        }
        for conn in self.connections.values() {
            if let (Some(&from), Some(&to)) =
                (index_map.get(&conn.source()), index_map.get(&conn.target()))
            {
                graph.add_edge(from, to, ());
            }
        }
        (graph, index_map)
    }

    /// `true` if `target` is reachable from `from` over successor edges
    /// (including `from == target`).
    pub(crate) fn is_followed_by(&self, from: NodeId, target: NodeId) -> bool {
        let (graph, index_map) = self.adjacency();
        match (index_map.get(&from), index_map.get(&target)) {
            (Some(&a), Some(&b)) => has_path_connecting(&graph, a, b, None),
            _ => false,
        }
    }

    /// `true` if the graph contains a directed cycle. Creation-time checks
    /// keep this impossible for graphs built through the manager; it guards
    /// against hand-crafted persisted files.
    pub(crate) fn has_cycle(&self) -> bool {
        let (graph, _) = self.adjacency();
        is_cyclic_directed(&graph)
    }

    /// All transitive successors of a node, excluding the node itself.
    pub(crate) fn all_successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut seen: HashSet<NodeId> = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for succ in node.successor_ids() {
                if seen.insert(succ) {
                    result.push(succ);
                    queue.push_back(succ);
                }
            }
        }
        result
    }

    /// Recursive executable-up-to-here check with per-query memoization, so
    /// diamond-shaped graphs do not blow up.
    pub(crate) fn executable_up_to(&self, id: NodeId, memo: &mut HashMap<NodeId, bool>) -> bool {
        if let Some(&cached) = memo.get(&id) {
            return cached;
        }
        let Some(node) = self.nodes.get(&id) else {
            memo.insert(id, false);
            return false;
        };
        // Already complete: nothing left to do from here.
        if node.payload().is_complete() {
            memo.insert(id, false);
            return false;
        }
        let mut result = node.payload().is_ready();
        if result {
            for slot in node.predecessors() {
                match slot {
                    // A required input without a connection blocks.
                    None => {
                        result = false;
                        break;
                    }
                    Some(pred_id) => {
                        let Some(pred) = self.nodes.get(pred_id) else {
                            result = false;
                            break;
                        };
                        if pred.payload().is_complete() {
                            continue;
                        }
                        if !self.executable_up_to(*pred_id, memo) {
                            result = false;
                            break;
                        }
                    }
                }
            }
        }
        memo.insert(id, result);
        result
    }

    pub(crate) fn any_in_flight(&self) -> bool {
        self.nodes
            .values()
            .any(|n| n.state().is_in_flight() || n.is_running())
    }

    /// Defensive cleanup: put every node that is not in flight back to
    /// `Idle`, clearing stray round marks.
    pub(crate) fn clear_round_marks(&mut self) {
        for node in self.nodes.values_mut() {
            if !node.state().is_in_flight() && !node.is_running() {
                node.force_idle();
            }
        }
    }

    /// Remove a connection and detach it from both endpoints' adjacency.
    pub(crate) fn unlink_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&id)?;
        if let Some(source) = self.nodes.get_mut(&conn.source()) {
            source.disconnect_outgoing(conn.source_port(), conn.target());
        }
        if let Some(target) = self.nodes.get_mut(&conn.target()) {
            target.disconnect_incoming(conn.target_port());
        }
        Some(conn)
    }
}

/// A mutable workflow graph: nodes wrapping payloads, connections between
/// their ports, and the execution pool driving them.
///
/// All operations are safe to call concurrently; the tables are protected
/// by a single mutex and events are emitted after the mutation commits.
/// Graph topology is mutated by external callers; node scheduler states
/// are the execution pool's exclusive privilege.
#[derive(Debug)]
pub struct Workflow {
    pub(crate) tables: Mutex<Tables>,
    pub(crate) bus: EventBus,
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new()
    }
}

impl Workflow {
    /// Create an empty workflow.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::new()),
            bus: EventBus::default(),
        }
    }

    /// Create an empty workflow with a custom event channel capacity.
    #[must_use]
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            tables: Mutex::new(Tables::new()),
            bus: EventBus::new(capacity),
        }
    }

    /// Subscribe to workflow events emitted after this call.
    #[must_use]
    pub fn events(&self) -> EventSubscriber {
        self.bus.subscribe()
    }

    fn emit_all(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            self.bus.emit(event);
        }
    }

    // ------------------------------------------------------------------
    // Nodes
    // ------------------------------------------------------------------

    /// Register a payload, wrapping it in a new node.
    ///
    /// The same payload instance cannot be registered twice.
    pub fn add_node(&self, payload: PayloadHandle) -> Result<NodeId, WorkflowError> {
        let id;
        {
            let mut tables = self.tables.lock();
            if tables
                .nodes
                .values()
                .any(|n| Arc::ptr_eq(n.payload(), &payload))
            {
                return Err(WorkflowError::DuplicatePayload);
            }
            id = NodeId::new(tables.next_node_id);
            tables.next_node_id += 1;
            let node = WorkflowNode::new(id, payload);
            tracing::debug!(node = %id, name = node.name(), "added node");
            tables.nodes.insert(id, node);
        }
        self.bus.emit(WorkflowEvent::NodeAdded { id });
        Ok(id)
    }

    /// Register a payload under a caller-chosen id (deserialization path).
    ///
    /// Rejects id and payload collisions; never advances the id counter.
    pub fn add_node_with_id(
        &self,
        id: NodeId,
        payload: PayloadHandle,
    ) -> Result<(), WorkflowError> {
        {
            let mut tables = self.tables.lock();
            if tables.nodes.contains_key(&id) {
                return Err(WorkflowError::DuplicateNodeId(id));
            }
            if tables
                .nodes
                .values()
                .any(|n| Arc::ptr_eq(n.payload(), &payload))
            {
                return Err(WorkflowError::DuplicatePayload);
            }
            let node = WorkflowNode::new(id, payload);
            tracing::debug!(node = %id, name = node.name(), "added node with explicit id");
            tables.nodes.insert(id, node);
        }
        self.bus.emit(WorkflowEvent::NodeAdded { id });
        Ok(())
    }

    /// Remove a node, disconnecting all incident connections first.
    ///
    /// Refused while execution is in progress.
    pub fn remove_node(&self, id: NodeId) -> Result<(), WorkflowError> {
        let mut events = Vec::new();
        {
            let mut tables = self.tables.lock();
            if tables.any_in_flight() {
                return Err(WorkflowError::ExecutionInProgress);
            }
            tables.node(id)?;

            let incident: Vec<ConnectionId> = tables
                .connections
                .values()
                .filter(|c| c.source() == id || c.target() == id)
                .map(Connection::id)
                .collect();
            for conn_id in incident {
                if tables.unlink_connection(conn_id).is_some() {
                    events.push(WorkflowEvent::ConnectionRemoved { id: conn_id });
                }
            }

            // Detaches the payload as the node drops.
            tables.nodes.remove(&id);
            tracing::debug!(node = %id, "removed node");
            events.push(WorkflowEvent::NodeRemoved { id });
        }
        self.emit_all(events);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Create a connection between two ports.
    ///
    /// Structural problems (unknown node, invalid port, occupied input)
    /// are errors. The cycle/kind legality check is NOT repeated here —
    /// callers probe [`Self::can_add_connection`] first; invoking this on
    /// an illegal pair is a caller contract violation.
    pub fn add_connection(
        &self,
        source: NodeId,
        source_port: usize,
        target: NodeId,
        target_port: usize,
    ) -> Result<ConnectionId, WorkflowError> {
        let id;
        {
            let mut tables = self.tables.lock();
            tables.node(source)?;
            tables.node(target)?;

            tables
                .node_mut(target)?
                .connect_incoming(target_port, source)?;
            if let Err(err) = tables
                .node_mut(source)?
                .connect_outgoing(source_port, target)
            {
                // Roll the incoming half back so adjacency stays consistent.
                if let Some(node) = tables.nodes.get_mut(&target) {
                    node.disconnect_incoming(target_port);
                }
                return Err(err);
            }

            id = ConnectionId::new(tables.next_connection_id);
            tables.next_connection_id += 1;
            let conn = Connection::new(id, source, source_port, target, target_port);
            tracing::debug!(connection = %conn, "added connection");
            tables.connections.insert(id, conn);
        }
        self.bus.emit(WorkflowEvent::ConnectionAdded { id });
        Ok(id)
    }

    /// Insert a connection under a caller-chosen id (deserialization path).
    pub(crate) fn add_connection_with_id(
        &self,
        id: ConnectionId,
        source: NodeId,
        source_port: usize,
        target: NodeId,
        target_port: usize,
    ) -> Result<(), WorkflowError> {
        {
            let mut tables = self.tables.lock();
            if tables.connections.contains_key(&id) {
                return Err(WorkflowError::DuplicateConnectionId(id));
            }
            tables.node(source)?;
            tables.node(target)?;

            tables
                .node_mut(target)?
                .connect_incoming(target_port, source)?;
            if let Err(err) = tables
                .node_mut(source)?
                .connect_outgoing(source_port, target)
            {
                if let Some(node) = tables.nodes.get_mut(&target) {
                    node.disconnect_incoming(target_port);
                }
                return Err(err);
            }

            let conn = Connection::new(id, source, source_port, target, target_port);
            tables.connections.insert(id, conn);
        }
        self.bus.emit(WorkflowEvent::ConnectionAdded { id });
        Ok(())
    }

    /// Advisory legality check for a prospective connection.
    ///
    /// Returns `false` if any id or port is invalid, if the target input
    /// port already has an incoming connection, if the two ports are of
    /// different kinds, or if the source is already downstream of the
    /// target (the new edge would close a cycle).
    #[must_use]
    pub fn can_add_connection(
        &self,
        source: NodeId,
        source_port: usize,
        target: NodeId,
        target_port: usize,
    ) -> bool {
        let tables = self.tables.lock();
        let (Ok(src), Ok(tgt)) = (tables.node(source), tables.node(target)) else {
            tracing::error!(%source, %target, "legality check between non-existing nodes");
            return false;
        };
        if source_port >= src.output_count() || target_port >= tgt.input_count() {
            tracing::error!(%source, source_port, %target, target_port, "legality check for non-existing ports");
            return false;
        }
        if tgt.predecessor_at(target_port).is_some() {
            return false;
        }
        if src.payload().output_kind(source_port) != tgt.payload().input_kind(target_port) {
            return false;
        }
        // A path target -> source means source is downstream of target;
        // the new edge would close a cycle (covers self-loops too).
        !tables.is_followed_by(target, source)
    }

    /// Remove a connection if it still exists; unknown ids are a no-op.
    ///
    /// Refused while execution is in progress.
    pub fn remove_connection_if_exists(&self, id: ConnectionId) -> Result<(), WorkflowError> {
        let removed;
        {
            let mut tables = self.tables.lock();
            if !tables.connections.contains_key(&id) {
                return Ok(());
            }
            if tables.any_in_flight() {
                return Err(WorkflowError::ExecutionInProgress);
            }
            removed = tables.unlink_connection(id).is_some();
            if removed {
                tracing::debug!(connection = %id, "removed connection");
            }
        }
        if removed {
            self.bus.emit(WorkflowEvent::ConnectionRemoved { id });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tables.lock().nodes.len()
    }

    /// Number of connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.tables.lock().connections.len()
    }

    /// All node ids, ascending.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.tables.lock().nodes.keys().copied().collect()
    }

    /// All connection ids, ascending.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.tables.lock().connections.keys().copied().collect()
    }

    /// A snapshot of a connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.tables.lock().connections.get(&id).cloned()
    }

    /// The connection ending at the given input port, if any.
    pub fn incoming_connection_at(
        &self,
        node: NodeId,
        port: usize,
    ) -> Result<Option<Connection>, WorkflowError> {
        let tables = self.tables.lock();
        tables.node(node)?;
        Ok(tables
            .connections
            .values()
            .find(|c| c.target() == node && c.target_port() == port)
            .cloned())
    }

    /// All connections leaving the given output port.
    pub fn outgoing_connections_at(
        &self,
        node: NodeId,
        port: usize,
    ) -> Result<Vec<Connection>, WorkflowError> {
        let tables = self.tables.lock();
        tables.node(node)?;
        Ok(tables
            .connections
            .values()
            .filter(|c| c.source() == node && c.source_port() == port)
            .cloned()
            .collect())
    }

    /// A node's current scheduler state.
    pub fn node_state(&self, id: NodeId) -> Result<NodeState, WorkflowError> {
        Ok(self.tables.lock().node(id)?.state())
    }

    /// A node's display name.
    pub fn node_name(&self, id: NodeId) -> Result<String, WorkflowError> {
        Ok(self.tables.lock().node(id)?.name().to_owned())
    }

    /// Rename a node.
    pub fn set_node_name(
        &self,
        id: NodeId,
        name: impl Into<String>,
    ) -> Result<(), WorkflowError> {
        self.tables.lock().node_mut(id)?.set_name(name);
        Ok(())
    }

    /// Bookkeeping of a node's most recent run.
    pub fn last_run(&self, id: NodeId) -> Result<Option<RunRecord>, WorkflowError> {
        Ok(self.tables.lock().node(id)?.last_run().cloned())
    }

    /// `true` if `target` is reachable from `from` over successor edges.
    /// Unknown ids yield `false`.
    #[must_use]
    pub fn is_followed_by(&self, from: NodeId, target: NodeId) -> bool {
        self.tables.lock().is_followed_by(from, target)
    }

    /// `true` if an execution can be initiated up to (and including) this
    /// node: the node is not yet complete, its payload is ready, and every
    /// predecessor is either complete or recursively executable-up-to-here.
    /// An unconnected input port blocks.
    pub fn is_executable_up_to(&self, id: NodeId) -> Result<bool, WorkflowError> {
        let tables = self.tables.lock();
        tables.node(id)?;
        let mut memo = HashMap::new();
        Ok(tables.executable_up_to(id, &mut memo))
    }

    /// `true` if the graph contains a directed cycle.
    #[must_use]
    pub fn has_cycle(&self) -> bool {
        self.tables.lock().has_cycle()
    }

    /// `true` if any node is dispatched or running.
    #[must_use]
    pub fn execution_in_progress(&self) -> bool {
        self.tables.lock().any_in_flight()
    }

    // ------------------------------------------------------------------
    // Payload plumbing
    // ------------------------------------------------------------------

    /// Apply new settings to a node's payload. Returns the payload's
    /// readiness after configuration.
    pub fn configure_node(
        &self,
        id: NodeId,
        settings: &serde_json::Value,
    ) -> Result<bool, WorkflowError> {
        let ready;
        {
            let tables = self.tables.lock();
            ready = tables.node(id)?.payload().configure(settings);
        }
        self.bus.emit(WorkflowEvent::NodeConfigured { id });
        Ok(ready)
    }

    /// Reset a node's payload, discarding its result and run bookkeeping.
    ///
    /// Refused while the node is part of an execution round.
    pub fn reset_node(&self, id: NodeId) -> Result<(), WorkflowError> {
        {
            let mut tables = self.tables.lock();
            let node = tables.node_mut(id)?;
            if node.state().is_in_flight() || node.is_running() || node.state().is_marked() {
                return Err(WorkflowError::ExecutionInProgress);
            }
            node.payload().reset();
            node.clear_run_record();
        }
        self.bus.emit(WorkflowEvent::NodeReset { id });
        Ok(())
    }

    /// Reset a node and all its transitive successors.
    pub fn reset_downstream(&self, id: NodeId) -> Result<(), WorkflowError> {
        let mut events = Vec::new();
        {
            let mut tables = self.tables.lock();
            tables.node(id)?;
            let mut targets = vec![id];
            targets.extend(tables.all_successors(id));
            for target in &targets {
                if let Ok(node) = tables.node(*target)
                    && (node.state().is_in_flight() || node.is_running() || node.state().is_marked())
                {
                    return Err(WorkflowError::ExecutionInProgress);
                }
            }
            for target in targets {
                if let Ok(node) = tables.node_mut(target) {
                    node.payload().reset();
                    node.clear_run_record();
                    events.push(WorkflowEvent::NodeReset { id: target });
                }
            }
        }
        self.emit_all(events);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Extra info
    // ------------------------------------------------------------------

    /// Replace a node's extra info.
    pub fn set_node_extra(
        &self,
        id: NodeId,
        extra: Option<ExtraInfo>,
    ) -> Result<(), WorkflowError> {
        self.tables.lock().node_mut(id)?.set_extra(extra);
        self.bus.emit(WorkflowEvent::NodeExtraInfoChanged { id });
        Ok(())
    }

    /// A node's extra info, if any.
    pub fn node_extra(&self, id: NodeId) -> Result<Option<ExtraInfo>, WorkflowError> {
        Ok(self.tables.lock().node(id)?.extra().cloned())
    }

    /// Replace a connection's extra info.
    pub fn set_connection_extra(
        &self,
        id: ConnectionId,
        extra: Option<ExtraInfo>,
    ) -> Result<(), WorkflowError> {
        {
            let mut tables = self.tables.lock();
            let conn = tables
                .connections
                .get_mut(&id)
                .ok_or(WorkflowError::ConnectionNotFound(id))?;
            conn.set_extra(extra);
        }
        self.bus
            .emit(WorkflowEvent::ConnectionExtraInfoChanged { id });
        Ok(())
    }

    /// A connection's extra info, if any.
    pub fn connection_extra(&self, id: ConnectionId) -> Result<Option<ExtraInfo>, WorkflowError> {
        self.tables
            .lock()
            .connections
            .get(&id)
            .map(|c| c.extra().cloned())
            .ok_or(WorkflowError::ConnectionNotFound(id))
    }

    // ------------------------------------------------------------------
    // Wholesale
    // ------------------------------------------------------------------

    /// Remove all nodes and connections and reset the id counters.
    ///
    /// Refused while execution is in progress.
    pub fn clear(&self) -> Result<(), WorkflowError> {
        let mut events = Vec::new();
        {
            let mut tables = self.tables.lock();
            if tables.any_in_flight() {
                return Err(WorkflowError::ExecutionInProgress);
            }
            let connection_ids: Vec<ConnectionId> = tables.connections.keys().copied().collect();
            for id in connection_ids {
                tables.unlink_connection(id);
                events.push(WorkflowEvent::ConnectionRemoved { id });
            }
            let node_ids: Vec<NodeId> = tables.nodes.keys().copied().collect();
            for id in node_ids {
                tables.nodes.remove(&id);
                events.push(WorkflowEvent::NodeRemoved { id });
            }
            tables.next_node_id = 1;
            tables.next_connection_id = 0;
        }
        self.emit_all(events);
        Ok(())
    }
}
