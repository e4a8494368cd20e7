// This module defines error types for the mode switching pass using the
// thiserror crate. None of these are user errors: a malformed CFG means an
// earlier pass handed over inconsistent predecessor/successor lists or block
// membership, and a switch invariant failure means the solved annotations
// disagree with what the instrumenter can materialize. Either way the caller
// is expected to abort compilation. PassResult<T> is the convenience alias.

//! Error types for the mode switching pass.

use thiserror::Error;

/// Upstream or internal invariant violations detected by the pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PassError {
    #[error("Malformed CFG: {reason}")]
    MalformedCfg { reason: String },

    #[error("Mode switch invariant violated in block {block}: {reason}")]
    SwitchInvariant { block: String, reason: String },
}

/// Result type alias for pass operations.
pub type PassResult<T> = Result<T, PassError>;
