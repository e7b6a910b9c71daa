// The scoring-model capability.
//
// The neural network is opaque to the decode loop: anything that scores
// an (index, position) sequence into per-position logits satisfies the
// contract. Checkpoint loading, batching, device placement and any
// incremental-state caching live behind the trait; the loop only ever
// reads the final row.
//
// A model failure is fatal to the current request. The loop never
// retries; a failure mid-sequence cannot be resumed from a clean
// state, so the error is surfaced to the caller as-is.

use std::fmt;

/// Anything that can score a token sequence.
///
/// `forward` must accept sequences of growing length across calls and
/// return one row of logits per input position, each row as wide as the
/// vocabulary. Implementations shared across concurrent requests must
/// not mix per-call context; each request owns its own sequences.
pub trait ScoringModel {
    fn forward(&self, indices: &[u32], positions: &[u32]) -> Result<Vec<Vec<f32>>, ModelError>;
}

/// Failures from a scoring-model invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The output shape does not match (sequence length, vocab size).
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
    /// The consumed logits row contains NaN.
    InvalidLogits,
    /// Any backend-specific failure (device, checkpoint, numeric).
    Backend(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::ShapeMismatch { expected, got } => write!(
                f,
                "scoring model returned shape {}x{}, expected {}x{}",
                got.0, got.1, expected.0, expected.1
            ),
            ModelError::InvalidLogits => write!(f, "scoring model produced NaN logits"),
            ModelError::Backend(message) => write!(f, "scoring model failure: {message}"),
        }
    }
}

impl std::error::Error for ModelError {}
