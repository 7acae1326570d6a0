//! The pluggable unit of work executed by a node.

use std::fmt;
use std::sync::Arc;

use lattice_core::PortKind;
use tokio_util::sync::CancellationToken;

/// A unit of work plugged into a workflow node.
///
/// The scheduler treats payloads as opaque: it only asks whether they are
/// ready, whether they have already produced a result, and runs them on a
/// worker. Port counts and kinds are queried once at node construction and
/// must not change afterwards.
///
/// Implementations use interior mutability — every method takes `&self`
/// because the owning node shares the payload with at most one worker at a
/// time. `run` must observe the cancellation token for cooperative early
/// exit; a payload that ignores it simply runs to completion.
pub trait Payload: Send + Sync + fmt::Debug {
    /// Registry discriminator, used to resolve the factory at load time.
    fn kind(&self) -> &str;

    /// Number of input ports.
    fn input_count(&self) -> usize;

    /// Number of output ports.
    fn output_count(&self) -> usize;

    /// Kind of the given input port.
    fn input_kind(&self, port: usize) -> PortKind {
        let _ = port;
        PortKind::Data
    }

    /// Kind of the given output port.
    fn output_kind(&self, port: usize) -> PortKind {
        let _ = port;
        PortKind::Data
    }

    /// `true` if all required configuration is present and the unit could
    /// run now (given its predecessors' results).
    fn is_ready(&self) -> bool;

    /// `true` if the unit has already produced its result.
    fn is_complete(&self) -> bool;

    /// Execute the unit synchronously. Returns `true` on success.
    ///
    /// The token is a request, not a guarantee; implementations should
    /// poll it at convenient points and bail out early when cancelled.
    fn run(&self, cancel: &CancellationToken) -> bool;

    /// Discard any produced result.
    fn reset(&self);

    /// Apply new configuration. Returns the resulting readiness.
    fn configure(&self, settings: &serde_json::Value) -> bool {
        let _ = settings;
        self.is_ready()
    }

    /// `true` if the node should run by itself as soon as its inputs are
    /// available, without being marked explicitly.
    fn auto_run(&self) -> bool {
        false
    }

    /// Serialize the payload's own configuration.
    fn save_settings(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}

/// Shared handle to a payload, as held by a node and briefly by a worker.
pub type PayloadHandle = Arc<dyn Payload>;


#[cfg(test)]
mod tests {
    use super::testkit::StubPayload;
    use super::*;

    #[test]
    fn default_port_kinds_are_data() {
        let p = StubPayload::new();
        assert_eq!(p.input_kind(0), PortKind::Data);
        assert_eq!(p.output_kind(0), PortKind::Data);
    }

    #[test]
    fn default_configure_reports_readiness() {
        let p = StubPayload::new();
        assert!(p.configure(&serde_json::json!({})));
        let p = StubPayload::unready();
        assert!(!p.configure(&serde_json::json!({})));
    }

    #[test]
    fn run_marks_complete_on_success() {
        let p = StubPayload::new();
        assert!(!p.is_complete());
        assert!(p.run(&CancellationToken::new()));
        assert!(p.is_complete());
        p.reset();
        assert!(!p.is_complete());
    }

    #[test]
    fn cancelled_token_short_circuits_run() {
        let p = StubPayload::new();
        let token = CancellationToken::new();
        token.cancel();
        assert!(!p.run(&token));
        assert!(!p.is_complete());
    }
}
