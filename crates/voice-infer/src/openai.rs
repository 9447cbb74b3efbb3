//! HTTP backends for an OpenAI-compatible API: Whisper transcription and
//! chat-completion tag inference.

use crate::wav::encode_wav;
use crate::{
    AudioClip, CollaboratorError, InferenceConfig, Result, TagInferencer, Transcriber,
    TranscriberConfig,
};
use async_trait::async_trait;
use std::time::Duration;
use tag_corpus::{TagVocabulary, TargetTagSet};

const API_KEY_ENV: &str = "OPENAI_API_KEY";

fn resolve_api_key(configured: &Option<String>) -> Result<String> {
    configured
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
        .ok_or_else(|| CollaboratorError::Credentials(format!("{API_KEY_ENV} is not set")))
}

fn build_client(timeout_ms: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .map_err(|e| CollaboratorError::Transport(e.to_string()))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(CollaboratorError::Http { status, body })
}

pub struct OpenAiTranscriber {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    language: Option<String>,
    api_key: String,
}

impl OpenAiTranscriber {
    pub fn new(cfg: &TranscriberConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(cfg.request_timeout_ms)?,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            language: cfg.language.clone(),
            api_key: resolve_api_key(&cfg.api_key)?,
        })
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: AudioClip<'_>) -> Result<String> {
        let wav = encode_wav(audio)?;
        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", file);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let start = std::time::Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        let text = check_status(resp)
            .await?
            .text()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))?;

        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            seconds = audio.duration_secs(),
            "whisper transcription"
        );
        Ok(text.trim().to_string())
    }

    fn name(&self) -> &str {
        "openai-whisper"
    }
}

pub struct OpenAiTagInferencer {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: String,
    vocabulary: TagVocabulary,
    system_prompt: String,
}

impl OpenAiTagInferencer {
    pub fn new(cfg: &InferenceConfig, vocabulary: TagVocabulary) -> Result<Self> {
        Ok(Self {
            client: build_client(cfg.request_timeout_ms)?,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
            api_key: resolve_api_key(&cfg.api_key)?,
            system_prompt: system_prompt(&vocabulary),
            vocabulary,
        })
    }
}

/// Instructions listing every valid tag, so the model answers in vocabulary.
pub fn system_prompt(vocabulary: &TagVocabulary) -> String {
    let mut prompt = String::from(
        "You are a feline bioacoustics expert. Read what a person said to their cat \
         and decide which kind of meow the cat should answer with.\n\n\
         Reply with a JSON object holding one array of tags per dimension and a \
         \"reasoning\" string. Valid tags:\n",
    );
    for dimension in vocabulary.dimensions() {
        let tags: Vec<&str> = vocabulary
            .tags(dimension)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default();
        prompt.push_str(&format!("- {dimension}: {}\n", tags.join(", ")));
    }
    prompt.push_str(
        "\nPick 1-3 tags per dimension. Leave breed_voice empty unless a breed is \
         mentioned. Never invent tags.",
    );
    prompt
}

#[async_trait]
impl TagInferencer for OpenAiTagInferencer {
    async fn infer(&self, text: &str) -> Result<TargetTagSet> {
        #[derive(serde::Serialize)]
        struct Message<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(serde::Serialize)]
        struct ChatReq<'a> {
            model: &'a str,
            temperature: f32,
            messages: Vec<Message<'a>>,
            response_format: serde_json::Value,
        }
        #[derive(serde::Deserialize)]
        struct ChoiceMessage {
            content: Option<String>,
        }
        #[derive(serde::Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }
        #[derive(serde::Deserialize)]
        struct ChatResp {
            choices: Vec<Choice>,
        }

        let user = format!("The person said to the cat: \"{text}\"");
        let req = ChatReq {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                Message {
                    role: "system",
                    content: &self.system_prompt,
                },
                Message {
                    role: "user",
                    content: &user,
                },
            ],
            response_format: serde_json::json!({ "type": "json_object" }),
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;
        let body: ChatResp = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::Decode("empty completion".into()))?;
        parse_completion(&content, &self.vocabulary)
    }

    fn name(&self) -> &str {
        "openai-chat"
    }
}

/// Parse the model's JSON answer and keep only vocabulary tags.
pub fn parse_completion(content: &str, vocabulary: &TagVocabulary) -> Result<TargetTagSet> {
    let value: serde_json::Value =
        serde_json::from_str(content).map_err(|e| CollaboratorError::Decode(e.to_string()))?;
    let target = TargetTagSet::from_flat_json(&value)
        .ok_or_else(|| CollaboratorError::Decode("completion is not a JSON object".into()))?;
    let (target, rejected) = vocabulary.sanitize(target);
    if !rejected.is_empty() {
        let dropped: Vec<String> = rejected
            .iter()
            .map(|t| format!("{}:{}", t.dimension, t.tag))
            .collect();
        tracing::warn!(?dropped, "model returned tags outside the vocabulary");
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tag_corpus::vocabulary::{EMOTION, INTENT};

    #[test]
    fn test_prompt_lists_vocabulary() {
        let prompt = system_prompt(&TagVocabulary::default());
        assert!(prompt.contains("requesting_food"));
        assert!(prompt.contains("- breed_voice: bright_voice, deep_voice"));
    }

    #[test]
    fn test_parse_completion_sanitizes() {
        let content = r#"{
            "emotion": ["hungry", "ravenous"],
            "intent": "requesting_food",
            "reasoning": "asks for dinner"
        }"#;
        let target = parse_completion(content, &TagVocabulary::default()).unwrap();
        assert_eq!(target.tags_for(EMOTION).unwrap().len(), 1);
        assert_eq!(target.primary(INTENT), Some("requesting_food"));
        assert_eq!(target.rationale, "asks for dinner");
    }

    #[test]
    fn test_parse_completion_rejects_garbage() {
        assert!(matches!(
            parse_completion("not json", &TagVocabulary::default()),
            Err(CollaboratorError::Decode(_))
        ));
        assert!(parse_completion("[1, 2]", &TagVocabulary::default()).is_err());
    }

    #[test]
    fn test_configured_api_key_wins() {
        let key = resolve_api_key(&Some("sk-test".into())).unwrap();
        assert_eq!(key, "sk-test");
    }
}
