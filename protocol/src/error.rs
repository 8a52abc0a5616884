//! Error taxonomy for the PosiStageNet protocol engine.
//!
//! Failures fall into two groups:
//! - **Input failures** (`MalformedChunk`, `UnknownPacketType`, `ReassemblyConflict`)
//!   come from untrusted network bytes. The receiver counts and drops them.
//! - **Host-facing failures** (`Socket`, `InvalidConfig`, `InvalidState`, `Encoding`)
//!   are returned from `start`/`tick` calls and may be acted on by the host.

use std::io;
use thiserror::Error;

/// Result type alias used across the PSN crates.
pub type Result<T, E = PsnError> = std::result::Result<T, E>;

/// Main error type for PSN encoding, decoding and transport.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PsnError {
    #[error("{context}: {length} bytes exceeds the limit of {limit}")]
    Encoding {
        context: &'static str,
        length: usize,
        limit: usize,
    },

    #[error("malformed chunk data at offset {offset}: {reason}")]
    MalformedChunk { offset: usize, reason: String },

    #[error("unknown packet type {id:#06x}")]
    UnknownPacketType { id: u16 },

    #[error("fragment metadata conflict for frame {frame_id}: expected {expected} fragments, got {found}")]
    ReassemblyConflict {
        frame_id: u32,
        expected: u16,
        found: u16,
    },

    #[error("socket {operation} failed")]
    Socket {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("invalid state: {reason}")]
    InvalidState { reason: String },
}

impl PsnError {
    /// Helper constructor for malformed wire data.
    pub fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        PsnError::MalformedChunk {
            offset,
            reason: reason.into(),
        }
    }

    /// Helper constructor for socket failures.
    pub fn socket(operation: &'static str, source: io::Error) -> Self {
        PsnError::Socket { operation, source }
    }

    /// Helper constructor for configuration errors.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        PsnError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Helper constructor for state machine misuse.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        PsnError::InvalidState {
            reason: reason.into(),
        }
    }

    /// Returns whether the operation may succeed when retried on a later tick.
    ///
    /// Steady-state socket errors are recoverable; malformed input, bad
    /// configuration and oversized payloads will fail the same way again.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PsnError::Socket { .. } => true,
            PsnError::Encoding { .. } => false,
            PsnError::MalformedChunk { .. } => false,
            PsnError::UnknownPacketType { .. } => false,
            PsnError::ReassemblyConflict { .. } => false,
            PsnError::InvalidConfig { .. } => false,
            PsnError::InvalidState { .. } => false,
        }
    }

    /// Returns true for errors caused by bytes received from the network.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PsnError::MalformedChunk { .. }
                | PsnError::UnknownPacketType { .. }
                | PsnError::ReassemblyConflict { .. }
        )
    }
}
