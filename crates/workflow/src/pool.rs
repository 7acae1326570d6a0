//! The execution pool: sweeps that mark runnable nodes, atomic dispatch
//! hand-out, run bookkeeping commits, and cancellation.
//!
//! Node scheduler states are driven exclusively from here, either by a
//! full sweep over all nodes or in response to a completion. Each
//! operation takes the table lock exactly once, so checks and state flips
//! are atomic with respect to concurrent workers; events are emitted after
//! the lock is released.

use std::collections::{HashSet, VecDeque};

use lattice_core::NodeId;
use tokio_util::sync::CancellationToken;

use crate::error::WorkflowError;
use crate::event::WorkflowEvent;
use crate::graph::{Tables, Workflow};
use crate::node::WorkflowNode;
use crate::payload::PayloadHandle;
use crate::state::NodeState;

/// Outcome of a preparation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// At least one node is dispatchable; the driver should start pulling.
    Changed,
    /// Nothing to do — the pool is already drained.
    Done,
}

/// Marks one node for the current round. Returns `true` if it ended up
/// `Ready`.
fn mark_for_execution(node: &mut WorkflowNode) -> bool {
    if node.payload().is_complete() || node.state().is_in_flight() || node.is_running() {
        return node.state() == NodeState::Ready;
    }
    match (node.state(), node.payload().is_ready()) {
        (NodeState::Idle, true) | (NodeState::Pending, true) => {
            // Idle -> Ready and Pending -> Ready are always valid moves.
            let _ = node.set_state(NodeState::Ready);
            true
        }
        (NodeState::Idle, false) => {
            let _ = node.set_state(NodeState::Pending);
            false
        }
        (state, _) => state == NodeState::Ready,
    }
}

impl Workflow {
    /// Mark every incomplete node for execution.
    ///
    /// Nodes whose payload is ready become `Ready`, the rest `Pending`.
    /// Emits [`WorkflowEvent::ExecPoolChanged`] if anything is
    /// dispatchable, otherwise [`WorkflowEvent::ExecPoolDone`] immediately.
    pub fn prepare_all(&self) -> PoolStatus {
        let status;
        {
            let mut tables = self.tables.lock();
            let mut any_ready = false;
            for node in tables.nodes.values_mut() {
                any_ready |= mark_for_execution(node);
            }
            status = if any_ready {
                PoolStatus::Changed
            } else {
                tables.clear_round_marks();
                PoolStatus::Done
            };
        }
        self.emit_pool_status(status);
        status
    }

    /// Mark the target node and, transitively, every incomplete
    /// predecessor required to reach it.
    ///
    /// Predecessors of an already-complete node are not revisited — its
    /// inputs are assumed to have been satisfied when it ran. An
    /// unconnected input port is logged as an error and skipped without
    /// aborting the sweep. Auto-running successors of the swept nodes are
    /// marked along the way.
    pub fn prepare_up_to(&self, target: NodeId) -> Result<PoolStatus, WorkflowError> {
        let status;
        {
            let mut tables = self.tables.lock();
            tables.node(target)?;

            let to_mark = collect_up_to(&tables, target);
            let mut any_ready = false;
            for id in to_mark {
                if let Ok(node) = tables.node_mut(id) {
                    any_ready |= mark_for_execution(node);
                }
            }
            status = if any_ready {
                PoolStatus::Changed
            } else {
                tables.clear_round_marks();
                PoolStatus::Done
            };
        }
        self.emit_pool_status(status);
        Ok(status)
    }

    /// Hand out the next dispatchable node, if any.
    ///
    /// Scans for a `Ready` node whose payload still reports readiness
    /// (defensive re-check) and atomically flips it to `Dispatched`.
    /// `None` means nothing is dispatchable *right now* — more may appear
    /// with later completion events; it is not a terminal signal.
    #[must_use]
    pub fn next_runnable(&self) -> Option<NodeId> {
        let mut tables = self.tables.lock();
        for (&id, node) in &mut tables.nodes {
            if node.state() == NodeState::Ready
                && node.payload().is_ready()
                && !node.payload().is_complete()
            {
                node.set_state(NodeState::Dispatched)
                    .expect("Ready -> Dispatched is a valid transition");
                return Some(id);
            }
        }
        None
    }

    /// Commit the start of a dispatched node's run.
    ///
    /// Returns the payload handle and the run's cancellation token. A node
    /// that is already running (duplicate dispatch) is tolerated: logged
    /// and `Ok(None)`. A node cancelled between dispatch and start, or
    /// whose readiness regressed, is returned to `Idle` (with pool
    /// accounting) and reported as `NotExecutable`.
    pub fn begin_run(
        &self,
        id: NodeId,
    ) -> Result<Option<(PayloadHandle, CancellationToken)>, WorkflowError> {
        let mut events = Vec::new();
        let result;
        {
            let mut tables = self.tables.lock();
            let node = tables.node_mut(id)?;

            if node.is_running() {
                tracing::error!(node = %id, "node is already running, duplicate dispatch ignored");
                return Ok(None);
            }

            if node.take_cancel_request() {
                node.force_idle();
                events.push(WorkflowEvent::NodeFinished {
                    id,
                    success: false,
                    canceled: true,
                });
                settle_after_removal(&mut tables, &mut events);
                result = Ok(None);
            } else if !node.payload().is_ready() {
                tracing::warn!(node = %id, "node is no longer executable, returning it to the pool");
                node.force_idle();
                settle_after_removal(&mut tables, &mut events);
                result = Err(WorkflowError::NotExecutable(id));
            } else {
                node.set_state(NodeState::Running)?;
                let token = CancellationToken::new();
                node.mark_started(token.clone());
                let payload = node.payload().clone();
                events.push(WorkflowEvent::NodeStarted { id });
                result = Ok(Some((payload, token)));
            }
        }
        self.emit_all_pool(events);
        result
    }

    /// Commit the end of a run and re-evaluate the pool.
    ///
    /// Bookkeeping is written before any event is emitted, so observers of
    /// the completion event always see consistent post-run state. The node
    /// returns to `Idle` regardless of outcome — failed nodes are not
    /// retried; whatever retry policy exists belongs to the payload.
    pub fn finish_run(
        &self,
        id: NodeId,
        success: bool,
        canceled: bool,
    ) -> Result<(), WorkflowError> {
        let mut events = Vec::new();
        {
            let mut tables = self.tables.lock();
            let node = tables.node_mut(id)?;

            node.mark_finished(success, canceled);
            node.force_idle();
            let canceled = node.last_run().is_some_and(|r| r.canceled);
            events.push(WorkflowEvent::NodeFinished {
                id,
                success,
                canceled,
            });

            // Re-sweep: pending nodes anywhere, auto-running successors of
            // the node that just finished.
            let mut newly_ready = false;
            let successors: HashSet<NodeId> = node_successors(&tables, id);
            for (&nid, node) in &mut tables.nodes {
                let payload = node.payload();
                if payload.is_complete() {
                    continue;
                }
                let auto = node.state() == NodeState::Idle
                    && successors.contains(&nid)
                    && payload.auto_run();
                let pending = node.state() == NodeState::Pending;
                if (pending || auto) && payload.is_ready() {
                    let _ = node.set_state(NodeState::Ready);
                    newly_ready = true;
                }
            }

            if newly_ready {
                events.push(WorkflowEvent::ExecPoolChanged);
            } else if !tables.any_in_flight() {
                tables.clear_round_marks();
                events.push(WorkflowEvent::ExecPoolDone);
            }
        }
        self.emit_all_pool(events);
        Ok(())
    }

    /// Cancel every node still in the pool.
    ///
    /// Nodes that never started (`Pending`/`Ready`) are simply returned to
    /// `Idle` and report a cancelled completion. In-flight nodes receive a
    /// cancellation signal through their token — cooperatively: a payload
    /// that ignores the token runs to completion, and the pool drains when
    /// its completion event arrives.
    pub fn cancel_all(&self) {
        let mut events = Vec::new();
        {
            let mut tables = self.tables.lock();
            let ids: Vec<NodeId> = tables.nodes.keys().copied().collect();
            cancel_nodes(&mut tables, &ids, &mut events);
            settle_after_removal(&mut tables, &mut events);
        }
        self.emit_all_pool(events);
    }

    /// Cancel a node and its transitive successors, leaving unrelated
    /// branches of the graph undisturbed.
    pub fn cancel_from(&self, id: NodeId) -> Result<(), WorkflowError> {
        let mut events = Vec::new();
        {
            let mut tables = self.tables.lock();
            tables.node(id)?;
            let mut targets = vec![id];
            targets.extend(tables.all_successors(id));
            cancel_nodes(&mut tables, &targets, &mut events);
            settle_after_removal(&mut tables, &mut events);
        }
        self.emit_all_pool(events);
        Ok(())
    }

    fn emit_pool_status(&self, status: PoolStatus) {
        match status {
            PoolStatus::Changed => self.bus.emit(WorkflowEvent::ExecPoolChanged),
            PoolStatus::Done => self.bus.emit(WorkflowEvent::ExecPoolDone),
        }
    }

    fn emit_all_pool(&self, events: Vec<WorkflowEvent>) {
        for event in events {
            self.bus.emit(event);
        }
    }
}

/// Direct successors of a node (empty if the node is unknown).
fn node_successors(tables: &Tables, id: NodeId) -> HashSet<NodeId> {
    tables
        .nodes
        .get(&id)
        .map(|n| n.successor_ids().into_iter().collect())
        .unwrap_or_default()
}

/// Collect the target and every incomplete predecessor reachable from it,
/// plus auto-running successors of that set.
fn collect_up_to(tables: &Tables, target: NodeId) -> Vec<NodeId> {
    let mut marked: Vec<NodeId> = Vec::new();
    let mut seen: HashSet<NodeId> = HashSet::from([target]);
    let mut queue = VecDeque::from([target]);

    while let Some(id) = queue.pop_front() {
        let Some(node) = tables.nodes.get(&id) else {
            continue;
        };
        if node.payload().is_complete() {
            // Its own inputs were satisfied when it ran; do not recurse.
            continue;
        }
        marked.push(id);
        for (port, slot) in node.predecessors().iter().enumerate() {
            match slot {
                None => {
                    tracing::error!(
                        node = %id,
                        port,
                        "input port has no incoming connection, node cannot execute"
                    );
                }
                Some(pred) => {
                    let pred = *pred;
                    if seen.insert(pred) {
                        queue.push_back(pred);
                    }
                }
            }
        }
    }

    // Auto-running successors join the round without being asked for.
    let mut auto_queue: VecDeque<NodeId> = marked.iter().copied().collect();
    while let Some(id) = auto_queue.pop_front() {
        let Some(node) = tables.nodes.get(&id) else {
            continue;
        };
        for succ in node.successor_ids() {
            let Some(succ_node) = tables.nodes.get(&succ) else {
                continue;
            };
            if succ_node.payload().auto_run()
                && !succ_node.payload().is_complete()
                && seen.insert(succ)
            {
                marked.push(succ);
                auto_queue.push_back(succ);
            }
        }
    }

    marked
}

/// Reset never-started nodes and signal in-flight ones.
fn cancel_nodes(tables: &mut Tables, ids: &[NodeId], events: &mut Vec<WorkflowEvent>) {
    for &id in ids {
        let Ok(node) = tables.node_mut(id) else {
            continue;
        };
        match node.state() {
            NodeState::Pending | NodeState::Ready => {
                node.force_idle();
                events.push(WorkflowEvent::NodeFinished {
                    id,
                    success: false,
                    canceled: true,
                });
            }
            NodeState::Dispatched | NodeState::Running => {
                node.request_cancel();
            }
            NodeState::Idle => {}
        }
    }
}

/// After a node left the pool without running, check whether the round is
/// over: with nothing in flight, either hand the driver the remaining
/// `Ready` nodes or declare the pool done.
fn settle_after_removal(tables: &mut Tables, events: &mut Vec<WorkflowEvent>) {
    if tables.any_in_flight() {
        return;
    }
    let any_ready = tables
        .nodes
        .values()
        .any(|n| n.state() == NodeState::Ready);
    if any_ready {
        events.push(WorkflowEvent::ExecPoolChanged);
    } else {
        tables.clear_round_marks();
        events.push(WorkflowEvent::ExecPoolDone);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::payload::testkit::StubPayload;
    use crate::payload::Payload;

    fn ready_payload() -> Arc<StubPayload> {
        Arc::new(StubPayload::new())
    }

    /// Diamond a -> b, a -> c, b -> d, c -> d plus an isolated node e.
    struct Diamond {
        wf: Workflow,
        a: NodeId,
        b: NodeId,
        c: NodeId,
        d: NodeId,
        e: NodeId,
    }

    fn diamond_with_isolated() -> Diamond {
        let wf = Workflow::new();
        let a = wf
            .add_node(Arc::new(StubPayload::with_ports(0, 2)))
            .unwrap();
        let b = wf.add_node(ready_payload()).unwrap();
        let c = wf.add_node(ready_payload()).unwrap();
        let d = wf
            .add_node(Arc::new(StubPayload::with_ports(2, 0)))
            .unwrap();
        let e = wf.add_node(ready_payload()).unwrap();
        wf.add_connection(a, 0, b, 0).unwrap();
        wf.add_connection(a, 1, c, 0).unwrap();
        wf.add_connection(b, 0, d, 0).unwrap();
        wf.add_connection(c, 0, d, 1).unwrap();
        Diamond { wf, a, b, c, d, e }
    }

    #[test]
    fn prepare_all_marks_ready_nodes() {
        let wf = Workflow::new();
        let a = wf.add_node(ready_payload()).unwrap();
        let unready = Arc::new(StubPayload::unready());
        let b = wf.add_node(unready).unwrap();

        assert_eq!(wf.prepare_all(), PoolStatus::Changed);
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Ready);
        assert_eq!(wf.node_state(b).unwrap(), NodeState::Pending);
    }

    #[test]
    fn prepare_all_with_nothing_to_do_reports_done() {
        let wf = Workflow::new();
        let unready = Arc::new(StubPayload::unready());
        let a = wf.add_node(unready).unwrap();
        let mut sub = wf.events();

        assert_eq!(wf.prepare_all(), PoolStatus::Done);
        // The lone pending mark was cleaned up again.
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Idle);
        assert_eq!(sub.drain(), vec![WorkflowEvent::ExecPoolDone]);
    }

    #[test]
    fn prepare_all_skips_completed_nodes() {
        let wf = Workflow::new();
        let done = Arc::new(StubPayload::new());
        done.run(&CancellationToken::new());
        let a = wf.add_node(done).unwrap();
        let b = wf.add_node(ready_payload()).unwrap();

        assert_eq!(wf.prepare_all(), PoolStatus::Changed);
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Idle);
        assert_eq!(wf.node_state(b).unwrap(), NodeState::Ready);
    }

    #[test]
    fn prepare_up_to_marks_required_ancestors_only() {
        let Diamond { wf, a, b, c, d, e } = diamond_with_isolated();

        assert_eq!(wf.prepare_up_to(d).unwrap(), PoolStatus::Changed);
        for id in [a, b, c, d] {
            assert!(
                wf.node_state(id).unwrap().is_marked(),
                "{id} should be part of the round"
            );
        }
        // The isolated node stays untouched.
        assert_eq!(wf.node_state(e).unwrap(), NodeState::Idle);
    }

    #[test]
    fn prepare_up_to_unknown_node_fails() {
        let wf = Workflow::new();
        let err = wf.prepare_up_to(NodeId::new(4)).unwrap_err();
        assert!(matches!(err, WorkflowError::NodeNotFound(_)));
    }

    #[test]
    fn prepare_up_to_skips_predecessors_of_completed_nodes() {
        // a -> b -> c where b already ran: marking up to c must not
        // revisit a. b's inputs are assumed satisfied from its own run —
        // deliberately asymmetric with is_executable_up_to.
        let wf = Workflow::new();
        let a = wf.add_node(Arc::new(StubPayload::with_ports(0, 1))).unwrap();
        let done = Arc::new(StubPayload::new());
        done.run(&CancellationToken::new());
        assert!(done.is_complete());
        let b = wf.add_node(done).unwrap();
        let c = wf.add_node(Arc::new(StubPayload::with_ports(1, 0))).unwrap();
        wf.add_connection(a, 0, b, 0).unwrap();
        wf.add_connection(b, 0, c, 0).unwrap();

        assert_eq!(wf.prepare_up_to(c).unwrap(), PoolStatus::Changed);
        assert_eq!(wf.node_state(c).unwrap(), NodeState::Ready);
        assert_eq!(wf.node_state(b).unwrap(), NodeState::Idle);
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Idle);
    }

    #[test]
    fn prepare_up_to_logs_and_continues_on_missing_predecessor() {
        // d's second input is never connected; the sweep still marks the
        // reachable part.
        let wf = Workflow::new();
        let a = wf.add_node(Arc::new(StubPayload::with_ports(0, 1))).unwrap();
        let d = wf.add_node(Arc::new(StubPayload::with_ports(2, 0))).unwrap();
        wf.add_connection(a, 0, d, 0).unwrap();

        assert_eq!(wf.prepare_up_to(d).unwrap(), PoolStatus::Changed);
        assert!(wf.node_state(a).unwrap().is_marked());
        assert!(wf.node_state(d).unwrap().is_marked());
    }

    #[test]
    fn next_runnable_flips_to_dispatched() {
        let wf = Workflow::new();
        let a = wf.add_node(ready_payload()).unwrap();
        wf.prepare_all();

        assert_eq!(wf.next_runnable(), Some(a));
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Dispatched);
        // Handed out once; nothing else is ready.
        assert_eq!(wf.next_runnable(), None);
    }

    #[test]
    fn next_runnable_rechecks_readiness() {
        let wf = Workflow::new();
        let stub = ready_payload();
        let a = wf.add_node(stub.clone() as _).unwrap();
        wf.prepare_all();

        stub.set_ready(false);
        assert_eq!(wf.next_runnable(), None);
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Ready);
    }

    #[test]
    fn begin_and_finish_run_cycle() {
        let wf = Workflow::new();
        let a = wf.add_node(ready_payload()).unwrap();
        wf.prepare_all();
        let id = wf.next_runnable().unwrap();
        assert_eq!(id, a);

        let (payload, token) = wf.begin_run(a).unwrap().unwrap();
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Running);

        let success = payload.run(&token);
        wf.finish_run(a, success, token.is_cancelled()).unwrap();

        assert_eq!(wf.node_state(a).unwrap(), NodeState::Idle);
        let record = wf.last_run(a).unwrap().unwrap();
        assert!(record.success);
        assert!(!record.canceled);
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn finish_run_emits_done_when_pool_drains() {
        let wf = Workflow::new();
        let a = wf.add_node(ready_payload()).unwrap();
        let mut sub = wf.events();
        wf.prepare_all();
        let id = wf.next_runnable().unwrap();
        let (payload, token) = wf.begin_run(id).unwrap().unwrap();
        payload.run(&token);
        wf.finish_run(a, true, false).unwrap();

        let events = sub.drain();
        assert_eq!(events.last(), Some(&WorkflowEvent::ExecPoolDone));
        assert!(events.contains(&WorkflowEvent::NodeStarted { id: a }));
        assert!(events.contains(&WorkflowEvent::NodeFinished {
            id: a,
            success: true,
            canceled: false,
        }));
    }

    #[test]
    fn finish_run_wakes_pending_dependents() {
        // b only becomes ready once a completed; the completion sweep must
        // flip it from Pending to Ready and announce the change.
        let wf = Workflow::new();
        let a_stub = Arc::new(StubPayload::with_ports(0, 1));
        let b_stub = Arc::new(StubPayload::unready());
        let a = wf.add_node(a_stub).unwrap();
        let b = wf.add_node(b_stub.clone() as _).unwrap();
        wf.add_connection(a, 0, b, 0).unwrap();

        wf.prepare_all();
        let id = wf.next_runnable().unwrap();
        assert_eq!(id, a);
        let (payload, token) = wf.begin_run(a).unwrap().unwrap();
        payload.run(&token);

        let mut sub = wf.events();
        b_stub.set_ready(true);
        wf.finish_run(a, true, false).unwrap();

        assert_eq!(wf.node_state(b).unwrap(), NodeState::Ready);
        let events = sub.drain();
        assert_eq!(events.last(), Some(&WorkflowEvent::ExecPoolChanged));
    }

    #[test]
    fn duplicate_dispatch_is_tolerated() {
        let wf = Workflow::new();
        let a = wf.add_node(ready_payload()).unwrap();
        wf.prepare_all();
        wf.next_runnable().unwrap();
        let first = wf.begin_run(a).unwrap();
        assert!(first.is_some());

        // A second start for the same node is logged and ignored.
        let second = wf.begin_run(a).unwrap();
        assert!(second.is_none());
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Running);
    }

    #[test]
    fn begin_run_aborts_when_readiness_regressed() {
        let wf = Workflow::new();
        let stub = ready_payload();
        let a = wf.add_node(stub.clone() as _).unwrap();
        wf.prepare_all();
        wf.next_runnable().unwrap();

        stub.set_ready(false);
        let mut sub = wf.events();
        let err = wf.begin_run(a).unwrap_err();
        assert!(matches!(err, WorkflowError::NotExecutable(_)));
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Idle);
        // The round cannot continue with anything else, so it closes.
        assert_eq!(sub.drain(), vec![WorkflowEvent::ExecPoolDone]);
    }

    #[test]
    fn cancel_all_resets_marked_nodes_without_running_them() {
        let wf = Workflow::new();
        let stub = ready_payload();
        let a = wf.add_node(stub.clone() as _).unwrap();
        let mut sub = wf.events();
        wf.prepare_all();
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Ready);

        wf.cancel_all();
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Idle);
        assert_eq!(stub.run_count(), 0);

        let events = sub.drain();
        assert!(events.contains(&WorkflowEvent::NodeFinished {
            id: a,
            success: false,
            canceled: true,
        }));
        assert_eq!(events.last(), Some(&WorkflowEvent::ExecPoolDone));
    }

    #[test]
    fn cancel_all_signals_running_nodes_through_their_token() {
        let wf = Workflow::new();
        let a = wf.add_node(ready_payload()).unwrap();
        wf.prepare_all();
        wf.next_runnable().unwrap();
        let (_payload, token) = wf.begin_run(a).unwrap().unwrap();

        let mut sub = wf.events();
        wf.cancel_all();
        assert!(token.is_cancelled());
        // Still in flight: the pool is not done until the worker reports.
        assert_eq!(sub.drain(), vec![]);

        wf.finish_run(a, false, token.is_cancelled()).unwrap();
        let record = wf.last_run(a).unwrap().unwrap();
        assert!(record.canceled);
        assert_eq!(sub.drain().last(), Some(&WorkflowEvent::ExecPoolDone));
    }

    #[test]
    fn cancel_between_dispatch_and_start_prevents_the_run() {
        let wf = Workflow::new();
        let stub = ready_payload();
        let a = wf.add_node(stub.clone() as _).unwrap();
        wf.prepare_all();
        wf.next_runnable().unwrap();
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Dispatched);

        wf.cancel_all();
        // The worker arrives late; the start must turn into a cancelled
        // completion instead of a run.
        let started = wf.begin_run(a).unwrap();
        assert!(started.is_none());
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Idle);
        assert_eq!(stub.run_count(), 0);
    }

    #[test]
    fn cancel_from_spares_unrelated_branches() {
        let Diamond { wf, a, b, c, d, e } = diamond_with_isolated();
        wf.prepare_all();

        wf.cancel_from(b).unwrap();
        // b and d (its only transitive successor) are out; a, c, e stay.
        assert_eq!(wf.node_state(b).unwrap(), NodeState::Idle);
        assert_eq!(wf.node_state(d).unwrap(), NodeState::Idle);
        assert!(wf.node_state(a).unwrap().is_marked());
        assert!(wf.node_state(c).unwrap().is_marked());
        assert!(wf.node_state(e).unwrap().is_marked());
    }

    #[test]
    fn auto_running_successor_joins_the_round() {
        let wf = Workflow::new();
        let a = wf.add_node(Arc::new(StubPayload::with_ports(0, 1))).unwrap();
        let auto = Arc::new(StubPayload::auto_running());
        let v = wf.add_node(auto).unwrap();
        wf.add_connection(a, 0, v, 0).unwrap();

        wf.prepare_up_to(a).unwrap();
        assert!(wf.node_state(a).unwrap().is_marked());
        assert!(wf.node_state(v).unwrap().is_marked());
    }

    #[test]
    fn failed_nodes_are_not_retried() {
        let wf = Workflow::new();
        let failing = Arc::new(StubPayload::failing());
        let a = wf.add_node(failing.clone() as _).unwrap();
        wf.prepare_all();
        wf.next_runnable().unwrap();
        let (payload, token) = wf.begin_run(a).unwrap().unwrap();
        let success = payload.run(&token);
        assert!(!success);
        wf.finish_run(a, success, false).unwrap();

        // The failure stays put: node idle, incomplete, no re-dispatch.
        assert_eq!(wf.node_state(a).unwrap(), NodeState::Idle);
        assert!(!wf.last_run(a).unwrap().unwrap().success);
        assert_eq!(wf.next_runnable(), None);
        assert_eq!(failing.run_count(), 1);
    }
}
