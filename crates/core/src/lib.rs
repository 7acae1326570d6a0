#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Lattice Core
//!
//! Core types for the Lattice workflow engine: strongly-typed integer
//! identifiers for nodes and connections, and the port classification
//! shared by the graph model and the payload interface.

pub mod id;
pub mod port;

pub use id::{ConnectionId, NodeId};
pub use port::PortKind;
