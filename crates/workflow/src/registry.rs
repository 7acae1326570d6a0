//! Factory registry for payload kinds.
//!
//! Deserialization resolves each node's payload by a kind string stored in
//! the settings tree. The registry maps that string to a factory closure,
//! populated at process startup. There is no dynamic class loading; an
//! unknown kind is a typed error and the offending node is skipped by the
//! loader.

use std::collections::HashMap;

use crate::error::WorkflowError;
use crate::payload::PayloadHandle;

/// Factory closure producing a payload from its saved settings.
pub type PayloadFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<PayloadHandle, WorkflowError> + Send + Sync>;

/// Maps payload kind strings to their factories.
///
/// Registration happens before the registry is shared with any loader;
/// lookups are read-only afterwards.
#[derive(Default)]
pub struct PayloadRegistry {
    factories: HashMap<String, PayloadFactory>,
}

impl PayloadRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under a kind string.
    ///
    /// Registering the same kind twice is an error; replacing a factory
    /// silently would make load results depend on registration order.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> Result<(), WorkflowError>
    where
        F: Fn(&serde_json::Value) -> Result<PayloadHandle, WorkflowError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(WorkflowError::DuplicatePayloadKind(kind));
        }
        self.factories.insert(kind, Box::new(factory));
        Ok(())
    }

    /// Create a payload of the given kind from its saved settings.
    pub fn create(
        &self,
        kind: &str,
        settings: &serde_json::Value,
    ) -> Result<PayloadHandle, WorkflowError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| WorkflowError::UnknownPayloadKind(kind.to_owned()))?;
        factory(settings)
    }

    /// `true` if a factory is registered under the kind.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// All registered kind strings, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for PayloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
