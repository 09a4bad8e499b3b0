//! Error types for the renderer.

use thiserror::Error;

/// Top-level error type for the renderer.
#[derive(Error, Debug)]
pub enum Error {
    /// Graphics backend errors
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Shader compilation or reload errors
    #[error("Shader error: {0}")]
    Shader(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the renderer's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminates the process after an unrecoverable GPU failure.
///
/// Device loss, a fence wait that exceeds its bound, and descriptor pool
/// exhaustion all leave the GPU context in a state with no safe
/// continuation. The diagnostic is logged before the process dies so it
/// reaches whatever subscriber is installed.
pub fn fatal(context: &str, detail: impl std::fmt::Display) -> ! {
    tracing::error!("fatal renderer failure in {}: {}", context, detail);
    panic!("fatal renderer failure in {}: {}", context, detail);
}
