use thiserror::Error;

/// Failure reported by a transcription or tag-inference backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not decode backend response: {0}")]
    Decode(String),

    #[error("audio encoding failed: {0}")]
    Audio(String),

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("backend unavailable: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

pub type Result<T, E = CollaboratorError> = core::result::Result<T, E>;
