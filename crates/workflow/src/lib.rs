#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Lattice Workflow
//!
//! The workflow graph model for the Lattice execution engine: a mutable
//! DAG of nodes wrapping pluggable payloads, connected port-to-port, with
//! an execution pool that marks runnable nodes and tracks their runs.
//!
//! This crate provides:
//!
//! - [`Payload`] — the opaque unit of work behind every node, and
//!   [`PayloadRegistry`] for resolving payload kinds at load time
//! - [`WorkflowNode`] and [`Connection`] — the graph containers
//! - [`Workflow`] — the manager owning the tables, id counters,
//!   connection legality checks, and persistence (`save`/`load`)
//! - [`NodeState`] and [`PoolStatus`] — the scheduling state machine
//! - [`WorkflowEvent`] and [`EventBus`] — broadcast change notifications
//!
//! Execution itself (worker tasks, the dispatch loop) lives in the
//! `lattice-engine` crate; everything it does goes through the pool
//! operations on [`Workflow`].

pub mod connection;
pub mod error;
pub mod event;
pub mod extra;
pub mod graph;
pub mod node;
pub mod payload;
pub mod persist;
pub mod pool;
pub mod registry;
pub mod state;

pub use connection::Connection;
pub use error::WorkflowError;
pub use event::{EventBus, EventSubscriber, WorkflowEvent};
pub use extra::ExtraInfo;
pub use graph::Workflow;
pub use node::{RunRecord, WorkflowNode};
pub use payload::{Payload, PayloadHandle};
pub use pool::PoolStatus;
pub use registry::{PayloadFactory, PayloadRegistry};
pub use state::{NodeState, can_transition, validate_transition};
