//! Per-node scheduler state and transition validation.

use serde::{Deserialize, Serialize};

use crate::error::WorkflowError;

/// The scheduler-side state of a single node.
///
/// States are driven exclusively by the scheduling pool, either during a
/// full sweep or in response to a completion event:
///
/// ```text
/// Idle -> Pending      marked for execution, payload not yet ready
/// Idle -> Ready        marked for execution, payload ready
/// Pending -> Ready     sweep observed readiness
/// Ready -> Dispatched  handed out for execution
/// Dispatched -> Running  worker actually started
/// Running -> Idle      completion (success, failure, or cancel)
/// Pending|Ready -> Idle  cancellation reset
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Not part of the current execution round.
    Idle,
    /// Marked for execution, waiting for its payload to become ready.
    Pending,
    /// Eligible for dispatch right now.
    Ready,
    /// Handed out to the dispatch loop, worker not yet started.
    Dispatched,
    /// A worker is executing the payload.
    Running,
}

impl NodeState {
    /// Returns `true` if a worker has been committed to this node.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Dispatched | Self::Running)
    }

    /// Returns `true` if the node is marked for the current round but has
    /// not been handed out yet.
    #[must_use]
    pub fn is_marked(&self) -> bool {
        matches!(self, Self::Pending | Self::Ready)
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pending => write!(f, "pending"),
            Self::Ready => write!(f, "ready"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Returns `true` if the transition from `from` to `to` is valid.
#[must_use]
pub fn can_transition(from: NodeState, to: NodeState) -> bool {
    matches!(
        (from, to),
        (NodeState::Idle, NodeState::Pending)
            | (NodeState::Idle, NodeState::Ready)
            | (NodeState::Pending, NodeState::Ready)
            | (NodeState::Ready, NodeState::Dispatched)
            | (NodeState::Dispatched, NodeState::Running)
            | (NodeState::Running, NodeState::Idle)
            | (NodeState::Pending, NodeState::Idle)
            | (NodeState::Ready, NodeState::Idle)
    )
}

/// Validate a transition, returning an error if invalid.
pub fn validate_transition(from: NodeState, to: NodeState) -> Result<(), WorkflowError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(WorkflowError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(NodeState::Idle, NodeState::Pending)]
    #[case(NodeState::Idle, NodeState::Ready)]
    #[case(NodeState::Pending, NodeState::Ready)]
    #[case(NodeState::Ready, NodeState::Dispatched)]
    #[case(NodeState::Dispatched, NodeState::Running)]
    #[case(NodeState::Running, NodeState::Idle)]
    #[case(NodeState::Pending, NodeState::Idle)]
    #[case(NodeState::Ready, NodeState::Idle)]
    fn valid_transitions(#[case] from: NodeState, #[case] to: NodeState) {
        assert!(can_transition(from, to));
        assert!(validate_transition(from, to).is_ok());
    }

    #[rstest]
    #[case(NodeState::Idle, NodeState::Dispatched)]
    #[case(NodeState::Idle, NodeState::Running)]
    #[case(NodeState::Pending, NodeState::Dispatched)]
    #[case(NodeState::Ready, NodeState::Running)]
    #[case(NodeState::Running, NodeState::Ready)]
    #[case(NodeState::Dispatched, NodeState::Idle)]
    #[case(NodeState::Idle, NodeState::Idle)]
    fn invalid_transitions(#[case] from: NodeState, #[case] to: NodeState) {
        assert!(!can_transition(from, to));
        let err = validate_transition(from, to).unwrap_err();
        assert!(err.to_string().contains("invalid transition"));
    }

    #[test]
    fn in_flight_states() {
        assert!(NodeState::Dispatched.is_in_flight());
        assert!(NodeState::Running.is_in_flight());
        assert!(!NodeState::Idle.is_in_flight());
        assert!(!NodeState::Pending.is_in_flight());
        assert!(!NodeState::Ready.is_in_flight());
    }

    #[test]
    fn marked_states() {
        assert!(NodeState::Pending.is_marked());
        assert!(NodeState::Ready.is_marked());
        assert!(!NodeState::Idle.is_marked());
        assert!(!NodeState::Dispatched.is_marked());
        assert!(!NodeState::Running.is_marked());
    }

    #[test]
    fn display_formatting() {
        assert_eq!(NodeState::Idle.to_string(), "idle");
        assert_eq!(NodeState::Pending.to_string(), "pending");
        assert_eq!(NodeState::Ready.to_string(), "ready");
        assert_eq!(NodeState::Dispatched.to_string(), "dispatched");
        assert_eq!(NodeState::Running.to_string(), "running");
    }

    #[test]
    fn serde_roundtrip() {
        for state in [
            NodeState::Idle,
            NodeState::Pending,
            NodeState::Ready,
            NodeState::Dispatched,
            NodeState::Running,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            let back: NodeState = serde_json::from_str(&json).unwrap();
            assert_eq!(state, back, "roundtrip failed for {state}");
        }
    }
}
