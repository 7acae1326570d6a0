//! Engine error types.

use lattice_workflow::WorkflowError;
use thiserror::Error;

/// Errors that can occur while driving a workflow execution.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A workflow operation failed.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The workflow's event stream closed while a round was still running.
    #[error("workflow event stream closed during execution")]
    EventStreamClosed,
}
