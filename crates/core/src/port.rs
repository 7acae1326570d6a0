//! Port classification for node inputs and outputs.

use serde::{Deserialize, Serialize};

/// The kind of content flowing through a port.
///
/// A connection may only join two ports of the same kind: data flows to
/// data inputs, models to model inputs. Mixed connections are rejected by
/// the workflow's legality check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    /// Carries table-like data between processing steps.
    Data,
    /// Carries a trained model or other control artifact.
    Model,
}

impl PortKind {
    /// Returns `true` for data ports.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data)
    }

    /// Returns `true` for model ports.
    #[must_use]
    pub fn is_model(&self) -> bool {
        matches!(self, Self::Model)
    }
}

impl std::fmt::Display for PortKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Model => write!(f, "model"),
        }
    }
}
