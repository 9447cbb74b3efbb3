use crate::SessionState;
use std::fmt;
use std::time::Duration;
use tag_corpus::MatchError;
use thiserror::Error;
use voice_infer::CollaboratorError;

/// Which collaborator call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    IntermediateTranscription,
    FinalTranscription,
    SpeculativeInference,
    FreshInference,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::IntermediateTranscription => "intermediate transcription",
            Stage::FinalTranscription => "final transcription",
            Stage::SpeculativeInference => "speculative inference",
            Stage::FreshInference => "tag inference",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{stage} failed: {source}")]
    Collaborator {
        stage: Stage,
        #[source]
        source: CollaboratorError,
    },

    #[error("speculative inference did not finish within {0:?}")]
    Timeout(Duration),

    #[error("corpus is empty; no sample can be selected")]
    EmptyCorpus,

    #[error("{count} target tags outside the vocabulary were ignored")]
    InvalidTag { count: usize },

    #[error("No speech detected")]
    NoSpeech,

    #[error("stop received before any audio")]
    NoAudio,

    #[error("'{action}' is not allowed while {state}")]
    InvalidState {
        state: SessionState,
        action: &'static str,
    },

    #[error("{0}")]
    Protocol(String),

    #[error("client disconnected")]
    Disconnected,
}

impl SessionError {
    /// Fatal errors end the utterance with a terminal `error` message and
    /// move the session to `Failed`; the rest are reported or logged only.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::Collaborator { stage, .. } => {
                matches!(stage, Stage::FinalTranscription | Stage::FreshInference)
            }
            SessionError::EmptyCorpus
            | SessionError::NoSpeech
            | SessionError::NoAudio
            | SessionError::Disconnected => true,
            SessionError::Timeout(_)
            | SessionError::InvalidTag { .. }
            | SessionError::InvalidState { .. }
            | SessionError::Protocol(_) => false,
        }
    }

    pub fn collaborator(stage: Stage, source: CollaboratorError) -> Self {
        SessionError::Collaborator { stage, source }
    }
}

impl From<MatchError> for SessionError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::NoCandidates => SessionError::EmptyCorpus,
        }
    }
}

pub type Result<T, E = SessionError> = core::result::Result<T, E>;
