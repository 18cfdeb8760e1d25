use std::{mem::discriminant, sync::Arc};

use alloy::transports::{RpcError, TransportErrorKind};
use thiserror::Error;

use crate::types::{IngestorResult, Position};

/// Errors emitted by the ingestor and its collaborators.
///
/// `IngestError` values are returned by builder `connect()` methods and are also yielded by the
/// event stream (as `Err(IngestError)` items). Errors on the stream are informational: the
/// ingestor keeps running after sending them.
#[derive(Error, Debug, Clone)]
pub enum IngestError {
    /// The underlying RPC transport returned an error.
    #[error("RPC error: {0}")]
    RpcError(Arc<RpcError<TransportErrorKind>>),

    /// A timeout elapsed while waiting for a remote response.
    #[error("Operation timed out")]
    Timeout,

    /// The connection was lost or the liveness probe went unanswered.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The push subscription fell behind and the node's pushes were overwritten before they were
    /// read. The connection is treated as lost.
    #[error("Log subscription lagged, {0} pushes lost")]
    Lagged(u64),

    /// The backfill query returned `null` instead of a (possibly empty) list of logs.
    #[error("Log query from {from} returned null instead of a list")]
    ReconciliationUnavailable { from: Position },

    /// A raw log could not be decoded into a named event.
    #[error("Failed to decode log at {position}: {reason}")]
    Decode { position: Position, reason: String },

    /// Submitting an operation or waiting for its acceptance failed.
    #[error("Submission failed: {0}")]
    Submission(String),

    /// The log has no block number, transaction index or log index (e.g. a pending log).
    #[error("Log is missing its position in the chain history")]
    MissingPosition,

    /// The configured maximum block range is invalid (must be greater than zero).
    #[error("Max block range must be greater than 0")]
    InvalidMaxBlockRange,

    /// The configured stream buffer capacity is invalid (must be greater than zero).
    #[error("Stream buffer capacity must be greater than 0")]
    InvalidBufferCapacity,

    /// A background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl IngestError {
    /// Whether the error was caused by the transport rather than by the data or the caller.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IngestError::RpcError(_)
                | IngestError::Timeout
                | IngestError::TransportFailure(_)
                | IngestError::Lagged(_)
        )
    }
}

impl From<RpcError<TransportErrorKind>> for IngestError {
    fn from(error: RpcError<TransportErrorKind>) -> Self {
        IngestError::RpcError(Arc::new(error))
    }
}

impl From<tokio::time::error::Elapsed> for IngestError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        IngestError::Timeout
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(error: tokio::task::JoinError) -> Self {
        IngestError::TaskFailed(error.to_string())
    }
}

impl PartialEq<IngestError> for IngestorResult {
    fn eq(&self, other: &IngestError) -> bool {
        match self {
            Ok(_) => false,
            Err(err) => discriminant(err) == discriminant(other),
        }
    }
}
