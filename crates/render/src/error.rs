//! Engine error types.

use thiserror::Error;

/// Errors surfaced by the frame engine.
///
/// Fatal driver states (device lost, fence timeout, descriptor pool
/// overflow) never appear here; those terminate the process through
/// `ember_core::fatal`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("RHI error: {0}")]
    Rhi(#[from] ember_rhi::RhiError),

    #[error("Core error: {0}")]
    Core(#[from] ember_core::Error),

    #[error("Invalid frame state: {0}")]
    InvalidState(String),

    #[error("Shader watch error: {0}")]
    Watch(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::InvalidState("end_frame without begin_frame".to_string());
        assert!(err.to_string().contains("end_frame without begin_frame"));
    }

    #[test]
    fn test_rhi_error_conversion() {
        let rhi = ember_rhi::RhiError::NoSuitableGpu;
        let err: EngineError = rhi.into();
        assert!(matches!(err, EngineError::Rhi(_)));
    }
}
