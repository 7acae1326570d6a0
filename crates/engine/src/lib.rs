#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Lattice Engine
//!
//! The asynchronous execution driver for Lattice workflow graphs. The
//! [`Executor`] seeds an execution round on a shared
//! [`Workflow`](lattice_workflow::Workflow), spawns one worker per
//! dispatchable node, and waits on the workflow's event stream until the
//! execution pool drains.

pub mod error;
pub mod executor;

pub use error::EngineError;
pub use executor::Executor;
