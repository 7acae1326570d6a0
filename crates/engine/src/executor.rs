//! The execution driver.
//!
//! Drives a [`Workflow`]'s execution pool to completion: seeds a round
//! with a preparation sweep, pulls dispatchable nodes, runs each payload
//! on its own worker, and waits on the workflow's event stream until the
//! pool reports itself done.
//!
//! Workers never touch graph topology; their only interaction with shared
//! state is the single completion call after the payload returns. The
//! pool commits all bookkeeping under its lock before emitting events, so
//! the driver (and any other subscriber) always observes consistent
//! post-completion state.

use std::sync::Arc;

use lattice_core::NodeId;
use lattice_workflow::event::EventSubscriber;
use lattice_workflow::{PoolStatus, Workflow, WorkflowEvent};

use crate::error::EngineError;

/// Asynchronous executor for a shared workflow.
///
/// One executor drives one workflow; worker parallelism follows the
/// graph's width (every dispatchable node gets its own task, payload code
/// runs on the blocking pool).
#[derive(Debug, Clone)]
pub struct Executor {
    workflow: Arc<Workflow>,
}

impl Executor {
    /// Create an executor for the given workflow.
    #[must_use]
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self { workflow }
    }

    /// The driven workflow.
    #[must_use]
    pub fn workflow(&self) -> &Arc<Workflow> {
        &self.workflow
    }

    /// Execute every incomplete node in the workflow and wait until the
    /// pool drains.
    ///
    /// Nodes that fail stay incomplete and are not retried; independent
    /// branches keep running. Returns once nothing is runnable and
    /// nothing is in flight.
    pub async fn execute_all(&self) -> Result<(), EngineError> {
        // Subscribe before the sweep so no pool signal can be missed.
        let mut events = self.workflow.events();
        let status = self.workflow.prepare_all();
        self.drive(status, &mut events).await
    }

    /// Execute the target node and every predecessor required for it,
    /// then wait until the pool drains.
    pub async fn execute_up_to(&self, target: NodeId) -> Result<(), EngineError> {
        let mut events = self.workflow.events();
        let status = self.workflow.prepare_up_to(target)?;
        self.drive(status, &mut events).await
    }

    /// Cancel every node still in the pool (cooperatively for nodes whose
    /// worker already started).
    pub fn cancel_all(&self) {
        self.workflow.cancel_all();
    }

    /// Cancel a node and its transitive successors, leaving unrelated
    /// branches running.
    pub fn cancel_from(&self, id: NodeId) -> Result<(), EngineError> {
        self.workflow.cancel_from(id)?;
        Ok(())
    }

    /// The dispatch loop: pull nodes while they are available, then block
    /// on the event stream until the pool changes or completes.
    async fn drive(
        &self,
        status: PoolStatus,
        events: &mut EventSubscriber,
    ) -> Result<(), EngineError> {
        if status == PoolStatus::Done {
            return Ok(());
        }
        self.dispatch_ready();
        loop {
            match events.recv().await {
                Some(WorkflowEvent::ExecPoolChanged) => self.dispatch_ready(),
                Some(WorkflowEvent::ExecPoolDone) => return Ok(()),
                Some(_) => {}
                None => return Err(EngineError::EventStreamClosed),
            }
        }
    }

    /// Hand out every currently dispatchable node to a worker.
    ///
    /// `next_runnable` returning `None` is not terminal — completions may
    /// surface new `Ready` nodes, announced via `ExecPoolChanged`.
    fn dispatch_ready(&self) {
        while let Some(id) = self.workflow.next_runnable() {
            self.spawn_worker(id);
        }
    }

    /// Run one node on its own worker task.
    ///
    /// The payload's synchronous `run` executes on the blocking pool; a
    /// panic inside it is caught at the join point and recorded as a
    /// failed run. The completion call happens in every case.
    fn spawn_worker(&self, id: NodeId) {
        let workflow = Arc::clone(&self.workflow);
        tokio::spawn(async move {
            let (payload, token) = match workflow.begin_run(id) {
                Ok(Some(run)) => run,
                // Duplicate dispatch or a cancelled/regressed start; the
                // pool has already settled the node.
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!(node = %id, %err, "node could not start");
                    return;
                }
            };

            let run_token = token.clone();
            let outcome = tokio::task::spawn_blocking(move || payload.run(&run_token)).await;
            let success = match outcome {
                Ok(success) => success,
                Err(join_err) => {
                    tracing::error!(node = %id, ?join_err, "node worker panicked");
                    false
                }
            };

            if let Err(err) = workflow.finish_run(id, success, token.is_cancelled()) {
                tracing::error!(node = %id, %err, "could not record node completion");
            }
        });
    }
}
