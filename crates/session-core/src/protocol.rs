//! Message-level session protocol, independent of the transport.
//!
//! Control messages are JSON objects tagged by `type`; audio travels as raw
//! PCM frames next to them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tag_corpus::vocabulary::{EMOTION, INTENT};
use tag_corpus::{Candidate, TagMap, TargetTagSet};

/// One frame from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Audio(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(alias = "configure")]
    Config {
        #[serde(default)]
        breed_preference: Option<String>,
    },
    Start,
    Stop,
    Reset,
}

const CLIENT_TYPES: &[&str] = &["config", "configure", "start", "stop", "reset"];

impl ClientMessage {
    /// Parse a text frame. The error string is sent back to the client as a
    /// non-fatal `error`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| "Invalid JSON".to_string())?;
        let kind = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        if !CLIENT_TYPES.contains(&kind.as_str()) {
            return Err(format!("Unknown message type: {kind}"));
        }
        serde_json::from_value(value).map_err(|e| format!("Invalid '{kind}' message: {e}"))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSample {
    pub sample_id: String,
    pub breed: String,
    pub context: String,
    pub tags: TagMap,
    pub match_score: f64,
    pub matched_tags: BTreeMap<String, Vec<String>>,
}

impl From<&Candidate<'_>> for SelectedSample {
    fn from(candidate: &Candidate<'_>) -> Self {
        Self {
            sample_id: candidate.sample.id.clone(),
            breed: candidate.sample.breed.clone(),
            context: candidate.sample.context.clone(),
            tags: candidate.sample.tags.clone(),
            match_score: candidate.score,
            matched_tags: candidate.matched_tags.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub transcript: String,
    pub selected_sample: SelectedSample,
    pub target_tags: TagMap,
    pub rationale: String,
    /// Whether the speculative tags were reused instead of a fresh inference.
    pub reused_speculative: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    PartialTranscript {
        text: String,
        is_final: bool,
    },
    Preview {
        emotion: Vec<String>,
        intent: Vec<String>,
        rationale: String,
    },
    Result(Box<TranslationResult>),
    Error {
        detail: String,
        fatal: bool,
    },
}

impl ServerMessage {
    pub fn partial(text: impl Into<String>) -> Self {
        ServerMessage::PartialTranscript {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn final_transcript(text: impl Into<String>) -> Self {
        ServerMessage::PartialTranscript {
            text: text.into(),
            is_final: true,
        }
    }

    pub fn preview(tags: &TargetTagSet) -> Self {
        let list = |dimension: &str| -> Vec<String> {
            tags.tags_for(dimension)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };
        ServerMessage::Preview {
            emotion: list(EMOTION),
            intent: list(INTENT),
            rationale: tags.rationale.clone(),
        }
    }

    pub fn error(detail: impl Into<String>, fatal: bool) -> Self {
        ServerMessage::Error {
            detail: detail.into(),
            fatal,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::PartialTranscript { .. } => "partial_transcript",
            ServerMessage::Preview { .. } => "preview",
            ServerMessage::Result(_) => "result",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// `result` and fatal `error` end an utterance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::Result(_) | ServerMessage::Error { fatal: true, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_messages() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"config","breed_preference":"Maine Coon"}"#),
            Ok(ClientMessage::Config {
                breed_preference: Some("Maine Coon".into())
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"configure"}"#),
            Ok(ClientMessage::Config {
                breed_preference: None
            })
        );
        assert_eq!(ClientMessage::parse(r#"{"type":"stop"}"#), Ok(ClientMessage::Stop));
        assert_eq!(ClientMessage::parse(r#"{"type":"reset"}"#), Ok(ClientMessage::Reset));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(ClientMessage::parse("{nope"), Err("Invalid JSON".to_string()));
        assert_eq!(
            ClientMessage::parse(r#"{"type":"dance"}"#),
            Err("Unknown message type: dance".to_string())
        );
        assert_eq!(
            ClientMessage::parse(r#"{"kind":"stop"}"#),
            Err("Unknown message type: ".to_string())
        );
    }

    #[test]
    fn test_server_wire_format() {
        let json = serde_json::to_value(ServerMessage::partial("I am")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "partial_transcript", "text": "I am", "is_final": false})
        );

        let json = serde_json::to_value(ServerMessage::error("No speech detected", true)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["fatal"], true);
    }

    #[test]
    fn test_result_is_flat_and_omits_missing_audio() {
        let result = TranslationResult {
            transcript: "feed me".into(),
            selected_sample: SelectedSample {
                sample_id: "F_01".into(),
                breed: "Maine Coon".into(),
                context: "Food".into(),
                tags: TagMap::new(),
                match_score: 0.6,
                matched_tags: BTreeMap::new(),
            },
            target_tags: TagMap::new(),
            rationale: "hungry".into(),
            reused_speculative: true,
            audio_base64: None,
        };
        let json = serde_json::to_value(ServerMessage::Result(Box::new(result))).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["selected_sample"]["sample_id"], "F_01");
        assert_eq!(json["reused_speculative"], true);
        assert!(json.get("audio_base64").is_none());

        let back: ServerMessage = serde_json::from_value(json).unwrap();
        assert!(back.is_terminal());
    }

    #[test]
    fn test_preview_lists_emotion_and_intent() {
        let tags = TargetTagSet::new("dinner")
            .with_tags(EMOTION, ["hungry"])
            .with_tags(INTENT, ["requesting_food"]);
        assert_eq!(
            ServerMessage::preview(&tags),
            ServerMessage::Preview {
                emotion: vec!["hungry".into()],
                intent: vec!["requesting_food".into()],
                rationale: "dinner".into(),
            }
        );
    }
}
