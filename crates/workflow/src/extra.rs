//! Opaque layout/annotation metadata attached to nodes and connections.

use serde::{Deserialize, Serialize};

/// Supplemental information the graph core stores but never interprets —
/// typically a visual editor's coordinates or annotations.
///
/// The `class_name` discriminator travels with the content so a consumer
/// can re-materialize its own type from the saved tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraInfo {
    /// Discriminator naming the consumer-side type of the content.
    pub class_name: String,
    /// Arbitrary structured content.
    pub content: serde_json::Value,
}

impl ExtraInfo {
    /// Create a new extra-info record.
    #[must_use]
    pub fn new(class_name: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            class_name: class_name.into(),
            content,
        }
    }
}
