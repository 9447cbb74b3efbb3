//! voice-infer: transcription and tag-inference collaborators
//!
//! Both collaborators are async traits shared as `Arc<dyn ...>` between a
//! session and its background tasks. Mock backends run offline; the `openai`
//! feature adds HTTP backends.

mod types;
pub use types::{AudioClip, AudioFormat, BackendKind, InferenceConfig, TranscriberConfig};

mod error;
pub use error::{CollaboratorError, Result};

mod traits;
pub use traits::{TagInferencer, Transcriber};

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{KeywordTagger, ScriptedTranscriber};

#[cfg(feature = "openai")]
mod openai;
#[cfg(feature = "openai")]
pub use openai::{parse_completion, system_prompt, OpenAiTagInferencer, OpenAiTranscriber};

pub mod wav;

pub mod plugin;
pub use plugin::{new_tag_inferencer, new_transcriber};
