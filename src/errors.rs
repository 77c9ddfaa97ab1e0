/// Domain-specific error types for the pricing engine.
/// Only malformed input and unusable configuration are errors:
/// - Numeric singularities (T=0, sigma=0) are branched, never raised
/// - A single leg's unsolved volatility is a value, not an error
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("degenerate scale: {0}")]
    DegenerateScale(String),

    #[error("no volatility could be resolved for any of {legs} legs")]
    NoConvergence { legs: usize },

    #[error("calendar error: {0}")]
    Calendar(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Reject non-finite or non-positive values at the boundary.
pub(crate) fn ensure_positive(name: &str, value: f64) -> EngineResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "{name} must be positive and finite, got {value}"
        )));
    }
    Ok(())
}
