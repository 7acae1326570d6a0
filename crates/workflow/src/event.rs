//! Workflow lifecycle events and the broadcast bus carrying them.
//!
//! Uses [`tokio::sync::broadcast`] for fan-out delivery to multiple
//! subscribers. Events are projections of state that has already been
//! committed — the workflow emits them only after the corresponding
//! mutation (including run bookkeeping) is visible, so an observer can
//! never read a stale running flag through an event.

use std::sync::atomic::{AtomicU64, Ordering};

use lattice_core::{ConnectionId, NodeId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A change in the workflow graph or its execution pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    /// A node was added to the graph.
    NodeAdded {
        /// The new node.
        id: NodeId,
    },
    /// A node (and, beforehand, all its connections) was removed.
    NodeRemoved {
        /// The removed node.
        id: NodeId,
    },
    /// A connection was added to the graph.
    ConnectionAdded {
        /// The new connection.
        id: ConnectionId,
    },
    /// A connection was removed from the graph.
    ConnectionRemoved {
        /// The removed connection.
        id: ConnectionId,
    },
    /// A node's payload received new configuration.
    NodeConfigured {
        /// The configured node.
        id: NodeId,
    },
    /// A node's payload was reset.
    NodeReset {
        /// The reset node.
        id: NodeId,
    },
    /// A node's extra info was replaced.
    NodeExtraInfoChanged {
        /// The affected node.
        id: NodeId,
    },
    /// A connection's extra info was replaced.
    ConnectionExtraInfoChanged {
        /// The affected connection.
        id: ConnectionId,
    },
    /// A worker started executing a node.
    NodeStarted {
        /// The node being executed.
        id: NodeId,
    },
    /// A node left the execution pool. For nodes that actually ran, the
    /// flags carry the run outcome; a node cancelled before its worker
    /// started reports `success: false, canceled: true`.
    NodeFinished {
        /// The finished node.
        id: NodeId,
        /// Whether the payload reported success.
        success: bool,
        /// Whether cancellation ended the run (or prevented it).
        canceled: bool,
    },
    /// New nodes became dispatchable; the driver should pull again.
    ExecPoolChanged,
    /// The execution pool drained: nothing runnable, nothing in flight.
    ExecPoolDone,
}

/// Broadcast-based event bus.
///
/// Delivers events to all active subscribers. If no subscribers are
/// listening, events are silently dropped (fire-and-forget).
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
    emitted: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    ///
    /// When the channel is full, the oldest events are dropped (lagging
    /// subscribers will see the gap and continue with newer events).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: WorkflowEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        // Ignore send error (no active receivers).
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Total number of events emitted since creation.
    #[must_use]
    pub fn total_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        // Each node contributes a handful of events per round; headroom
        // keeps a busy driver from lagging past a pool signal.
        Self::new(256)
    }
}

/// Subscription handle for receiving events from the [`EventBus`].
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<WorkflowEvent>,
}

impl EventSubscriber {
    /// Receive the next event, waiting asynchronously.
    ///
    /// Returns `None` once the bus has been dropped. A lagged subscriber
    /// skips the missed events and continues.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
