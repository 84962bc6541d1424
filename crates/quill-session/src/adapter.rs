use std::fmt::Debug;

use quill_wire::{JobRequest, OwnerIdPlacement, PartialKind};
use serde_json::Value;
use thiserror::Error;

/// Enumerates supported `MergeError` values.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{adapter} jobs do not produce {kind} units")]
    UnsupportedKind {
        adapter: &'static str,
        kind: PartialKind,
    },
    #[error("malformed {what}: {source}")]
    Malformed {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },
}

/// Job-specific half of a session: endpoint, request shape and merge rule.
pub trait JobAdapter: Send + 'static {
    type Accumulator: Clone + Default + Debug + Send + 'static;

    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Endpoint path relative to the WebSocket base URL.
    fn endpoint_path(&self, request: &JobRequest) -> String;

    fn owner_placement(&self) -> OwnerIdPlacement;

    /// Folds one incremental unit into the accumulator. On error the
    /// accumulator must be left unchanged.
    fn merge(
        &self,
        accumulator: &mut Self::Accumulator,
        kind: PartialKind,
        unit: Value,
    ) -> Result<(), MergeError>;

    /// Reads the server's terminal payload into a replacement accumulator.
    fn decode_result(&self, result: Value) -> Result<Self::Accumulator, MergeError>;
}
