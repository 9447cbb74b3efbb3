#[cfg(feature = "openai")]
use crate::{OpenAiTagInferencer, OpenAiTranscriber};
#[cfg(feature = "mock")]
use crate::{KeywordTagger, ScriptedTranscriber};
use crate::{
    BackendKind, CollaboratorError, InferenceConfig, TagInferencer, Transcriber, TranscriberConfig,
};
use std::sync::Arc;
#[cfg(feature = "mock")]
use std::time::Duration;
use tag_corpus::TagVocabulary;

pub fn new_transcriber(cfg: &TranscriberConfig) -> Result<Arc<dyn Transcriber>, CollaboratorError> {
    match cfg.backend {
        BackendKind::Mock => {
            #[cfg(feature = "mock")]
            {
                Ok(Arc::new(ScriptedTranscriber::from_config(cfg)))
            }
            #[cfg(not(feature = "mock"))]
            {
                Err(CollaboratorError::Unsupported("mock feature not enabled".into()))
            }
        }
        BackendKind::OpenAi => {
            #[cfg(feature = "openai")]
            {
                OpenAiTranscriber::new(cfg).map(|t| Arc::new(t) as Arc<dyn Transcriber>)
            }
            #[cfg(not(feature = "openai"))]
            {
                Err(CollaboratorError::Unsupported("openai feature not enabled".into()))
            }
        }
    }
}

pub fn new_tag_inferencer(
    cfg: &InferenceConfig,
    vocabulary: TagVocabulary,
) -> Result<Arc<dyn TagInferencer>, CollaboratorError> {
    match cfg.backend {
        BackendKind::Mock => {
            #[cfg(feature = "mock")]
            {
                let tagger = KeywordTagger::new(vocabulary)
                    .with_latency(Duration::from_millis(cfg.mock_latency_ms));
                Ok(Arc::new(tagger))
            }
            #[cfg(not(feature = "mock"))]
            {
                let _ = vocabulary;
                Err(CollaboratorError::Unsupported("mock feature not enabled".into()))
            }
        }
        BackendKind::OpenAi => {
            #[cfg(feature = "openai")]
            {
                OpenAiTagInferencer::new(cfg, vocabulary)
                    .map(|t| Arc::new(t) as Arc<dyn TagInferencer>)
            }
            #[cfg(not(feature = "openai"))]
            {
                let _ = vocabulary;
                Err(CollaboratorError::Unsupported("openai feature not enabled".into()))
            }
        }
    }
}
