use thiserror::Error;

pub type Result<T, E = CorpusError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("I/O error reading {path}: {message}")]
    Io { path: String, message: String },
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("unsupported file extension: {0}")]
    UnsupportedFormat(String),
    #[error("sample {sample_id}: tag '{tag}' is not in the '{dimension}' vocabulary")]
    UnknownTag {
        sample_id: String,
        dimension: String,
        tag: String,
    },
    #[error("duplicate sample id: {0}")]
    DuplicateSample(String),
    #[error("corpus contains no samples")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MatchError {
    /// Nothing to rank against. Distinct from a low best score.
    #[error("no candidates: the corpus is empty")]
    NoCandidates,
}
