use crate::{AudioClip, Result};
use async_trait::async_trait;
use tag_corpus::TargetTagSet;

/// Speech-to-text over a complete buffer. Each call sees the whole utterance
/// so far, not a delta.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: AudioClip<'_>) -> Result<String>;

    fn name(&self) -> &str {
        "transcriber"
    }
}

/// Turns a transcript into target tags.
///
/// Implementations must only return tags that exist in the vocabulary they
/// were built with; anything else is dropped before returning.
#[async_trait]
pub trait TagInferencer: Send + Sync {
    async fn infer(&self, text: &str) -> Result<TargetTagSet>;

    fn name(&self) -> &str {
        "tag-inferencer"
    }
}
