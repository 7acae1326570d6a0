//! Unique identifiers for Lattice entities.
//!
//! Nodes and connections are identified by process-unique sequential
//! integers handed out by the owning workflow's counters (and persisted
//! with it, so re-opened graphs never reuse ids). Each identifier type
//! is a distinct newtype, preventing a node id from being passed where a
//! connection id is expected.
//!
//! All ID types are `Copy` (8 bytes, stack-allocated) and support:
//! - `new(u64)` for construction from a raw counter value
//! - `as_u64()` for raw access
//! - Full serde support (serializes as the bare integer)
//! - `Display`, `FromStr`, `Eq`, `Ord`, `Hash`

/// Defines an integer-backed identifier newtype.
macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw counter value.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw integer value.
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "#{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim_start_matches('#').parse().map(Self)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifier of a node within a workflow graph.
    NodeId
);

define_id!(
    /// Identifier of a connection (directed edge) within a workflow graph.
    ConnectionId
);
