//! Node container: a payload plus its port adjacency and lifecycle state.

use chrono::{DateTime, Utc};
use lattice_core::NodeId;
use tokio_util::sync::CancellationToken;

use crate::error::WorkflowError;
use crate::extra::ExtraInfo;
use crate::payload::PayloadHandle;
use crate::state::{NodeState, validate_transition};

/// Bookkeeping for the most recent run of a node.
#[derive(Debug, Clone)]
pub struct RunRecord {
    /// Whether the payload reported success.
    pub success: bool,
    /// Whether the run ended because cancellation was requested.
    pub canceled: bool,
    /// When the worker started.
    pub started_at: DateTime<Utc>,
    /// When the run finished; `None` while still in flight.
    pub finished_at: Option<DateTime<Utc>>,
}

/// Wrapper around a payload and the surrounding graph information.
///
/// Each input port holds at most one predecessor; each output port holds a
/// list of successors (the same target may appear more than once if it is
/// connected on several of its input ports). Adjacency stores node ids, not
/// references — resolution goes through the owning workflow's node table,
/// so removing a node can never leave a dangling pointer.
#[derive(Debug)]
pub struct WorkflowNode {
    id: NodeId,
    name: String,
    payload: PayloadHandle,
    /// One predecessor slot per input port.
    incoming: Vec<Option<NodeId>>,
    /// Successor list per output port.
    outgoing: Vec<Vec<NodeId>>,
    state: NodeState,
    running: bool,
    cancel_requested: bool,
    cancel: Option<CancellationToken>,
    last_run: Option<RunRecord>,
    extra: Option<ExtraInfo>,
}

impl WorkflowNode {
    /// Wrap a payload. Port arity is queried once, here, and fixed.
    pub(crate) fn new(id: NodeId, payload: PayloadHandle) -> Self {
        let inputs = payload.input_count();
        let outputs = payload.output_count();
        Self {
            id,
            name: format!("Node {}", id.as_u64()),
            payload,
            incoming: vec![None; inputs],
            outgoing: vec![Vec::new(); outputs],
            state: NodeState::Idle,
            running: false,
            cancel_requested: false,
            cancel: None,
            last_run: None,
            extra: None,
        }
    }

    /// The node's identifier.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The wrapped payload.
    #[must_use]
    pub fn payload(&self) -> &PayloadHandle {
        &self.payload
    }

    /// Number of input ports.
    #[must_use]
    pub fn input_count(&self) -> usize {
        self.incoming.len()
    }

    /// Number of output ports.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.outgoing.len()
    }

    /// Current scheduler state.
    #[must_use]
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// `true` while a worker owns this node.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Bookkeeping of the most recent run, if any.
    #[must_use]
    pub fn last_run(&self) -> Option<&RunRecord> {
        self.last_run.as_ref()
    }

    /// The attached extra info, if any.
    #[must_use]
    pub fn extra(&self) -> Option<&ExtraInfo> {
        self.extra.as_ref()
    }

    pub(crate) fn set_extra(&mut self, extra: Option<ExtraInfo>) {
        self.extra = extra;
    }

    /// Transition to a new scheduler state, validating the move.
    pub(crate) fn set_state(&mut self, state: NodeState) -> Result<(), WorkflowError> {
        validate_transition(self.state, state)?;
        self.state = state;
        Ok(())
    }

    /// Unconditionally put the node back to `Idle`. Terminal-cleanup path
    /// only; regular transitions go through [`Self::set_state`].
    pub(crate) fn force_idle(&mut self) {
        self.state = NodeState::Idle;
    }

    // ------------------------------------------------------------------
    // Adjacency
    // ------------------------------------------------------------------

    /// Set the unique predecessor at an input port.
    pub(crate) fn connect_incoming(
        &mut self,
        port: usize,
        source: NodeId,
    ) -> Result<(), WorkflowError> {
        let count = self.incoming.len();
        let slot = self
            .incoming
            .get_mut(port)
            .ok_or(WorkflowError::InvalidPort { port, count })?;
        if slot.is_some() {
            return Err(WorkflowError::PortOccupied {
                node: self.id,
                port,
            });
        }
        *slot = Some(source);
        Ok(())
    }

    /// Append a successor at an output port. The same target may appear
    /// several times when it is connected on more than one of its inputs.
    pub(crate) fn connect_outgoing(
        &mut self,
        port: usize,
        target: NodeId,
    ) -> Result<(), WorkflowError> {
        let count = self.outgoing.len();
        let list = self
            .outgoing
            .get_mut(port)
            .ok_or(WorkflowError::InvalidPort { port, count })?;
        list.push(target);
        Ok(())
    }

    /// Clear the predecessor slot at an input port. Idempotent; out-of-range
    /// ports are ignored.
    pub(crate) fn disconnect_incoming(&mut self, port: usize) {
        if let Some(slot) = self.incoming.get_mut(port) {
            *slot = None;
        }
    }

    /// Remove one occurrence of a target from an output port. No-op if the
    /// target is absent or the port is out of range.
    pub(crate) fn disconnect_outgoing(&mut self, port: usize, target: NodeId) {
        if let Some(list) = self.outgoing.get_mut(port)
            && let Some(pos) = list.iter().position(|&t| t == target)
        {
            list.remove(pos);
        }
    }

    /// The predecessor at an input port, if connected.
    #[must_use]
    pub fn predecessor_at(&self, port: usize) -> Option<NodeId> {
        self.incoming.get(port).copied().flatten()
    }

    /// All predecessor slots, one per input port (`None` = unconnected).
    #[must_use]
    pub fn predecessors(&self) -> &[Option<NodeId>] {
        &self.incoming
    }

    /// The successors attached at an output port.
    #[must_use]
    pub fn successors_at(&self, port: usize) -> &[NodeId] {
        self.outgoing.get(port).map_or(&[], Vec::as_slice)
    }

    /// Distinct direct successors across all output ports.
    #[must_use]
    pub fn successor_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = Vec::new();
        for list in &self.outgoing {
            for &id in list {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    // ------------------------------------------------------------------
    // Run bookkeeping
    // ------------------------------------------------------------------

    /// Commit the start of a run: running flag, fresh record, token handle.
    pub(crate) fn mark_started(&mut self, token: CancellationToken) {
        self.running = true;
        self.cancel_requested = false;
        self.cancel = Some(token);
        self.last_run = Some(RunRecord {
            success: false,
            canceled: false,
            started_at: Utc::now(),
            finished_at: None,
        });
    }

    /// Commit the end of a run. Must happen before any completion event is
    /// emitted so observers never see a stale running flag.
    pub(crate) fn mark_finished(&mut self, success: bool, canceled: bool) {
        self.running = false;
        self.cancel = None;
        let canceled = canceled || self.cancel_requested;
        self.cancel_requested = false;
        if let Some(record) = self.last_run.as_mut() {
            record.success = success;
            record.canceled = canceled;
            record.finished_at = Some(Utc::now());
        }
    }

    /// Request cancellation: signal the in-flight worker's token if one
    /// exists, and remember the request for a worker that has been
    /// dispatched but not started yet.
    pub(crate) fn request_cancel(&mut self) {
        self.cancel_requested = true;
        if let Some(token) = &self.cancel {
            token.cancel();
        }
    }

    /// Consume a pending cancellation request (dispatch-to-start window).
    pub(crate) fn take_cancel_request(&mut self) -> bool {
        std::mem::take(&mut self.cancel_requested)
    }

    /// Drop the last-run record (payload reset path).
    pub(crate) fn clear_run_record(&mut self) {
        self.last_run = None;
    }
}
