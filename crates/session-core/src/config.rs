use serde::{Deserialize, Serialize};
use speculative::SpeculativeConfig;
use std::path::PathBuf;
use std::time::Duration;
use tag_corpus::MatchConfig;
use voice_infer::{AudioFormat, InferenceConfig, TranscriberConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub audio: AudioFormat,
    /// Minimum time between intermediate transcriptions.
    pub transcription_interval_ms: u64,
    /// Buffered audio required before the first intermediate transcription.
    pub min_buffer_ms: u64,
    /// Longest utterance kept; later frames are dropped.
    pub max_buffer_ms: u64,
    pub speculative: SpeculativeConfig,
    pub matching: MatchConfig,
    /// Return to `Connected` right after a result or fatal error.
    pub auto_reset: bool,
    /// Use the last intermediate transcript when the final call fails.
    pub final_fallback_to_partial: bool,
    /// Directory that sample `file_path`s are relative to; enables `audio_base64`.
    pub assets_root: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio: AudioFormat::default(),
            transcription_interval_ms: 2_500,
            min_buffer_ms: 1_000,
            max_buffer_ms: 60_000,
            speculative: SpeculativeConfig::default(),
            matching: MatchConfig::default(),
            auto_reset: true,
            final_fallback_to_partial: false,
            assets_root: None,
        }
    }
}

impl SessionConfig {
    pub fn transcription_interval(&self) -> Duration {
        Duration::from_millis(self.transcription_interval_ms)
    }
}

/// Everything a server process needs: where to listen, what to load and
/// which collaborators to build.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen: String,
    pub corpus_path: PathBuf,
    /// Replaces the built-in tag vocabulary when set.
    pub vocabulary_path: Option<PathBuf>,
    pub session: SessionConfig,
    pub transcriber: TranscriberConfig,
    pub inference: InferenceConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            corpus_path: PathBuf::from("assets/sample_corpus.json"),
            vocabulary_path: None,
            session: SessionConfig::default(),
            transcriber: TranscriberConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.audio.sample_rate_hz, 16_000);
        assert_eq!(cfg.transcription_interval(), Duration::from_millis(2_500));
        assert_eq!(cfg.speculative.min_content_units, 5);
        assert_eq!(cfg.speculative.similarity_threshold, 0.7);
        assert_eq!(cfg.speculative.await_timeout_ms, 5_000);
        assert_eq!(cfg.matching.preference_bonus, 0.05);
        assert!(cfg.auto_reset);
        assert!(!cfg.final_fallback_to_partial);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg: SessionConfig = serde_json::from_str(
            r#"{ "auto_reset": false, "speculative": { "similarity_threshold": 0.8 } }"#,
        )
        .unwrap();
        assert!(!cfg.auto_reset);
        assert_eq!(cfg.speculative.similarity_threshold, 0.8);
        assert_eq!(cfg.speculative.await_timeout_ms, 5_000);
        assert_eq!(cfg.max_buffer_ms, 60_000);
    }

    #[test]
    fn test_daemon_config_round_trips_without_secrets() {
        let mut cfg = DaemonConfig::default();
        cfg.inference.api_key = Some("sk-secret".into());
        let json = cfg.to_json_pretty().unwrap();
        assert!(!json.contains("sk-secret"));

        let back = DaemonConfig::from_json(&json).unwrap();
        assert_eq!(back.listen, "0.0.0.0:8000");
        assert_eq!(back.session, SessionConfig::default());
        assert!(back.inference.api_key.is_none());
    }

    #[test]
    fn test_daemon_config_overrides() {
        let cfg = DaemonConfig::from_json(
            r#"{ "listen": "127.0.0.1:9000", "session": { "auto_reset": false } }"#,
        )
        .unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:9000");
        assert!(!cfg.session.auto_reset);
        assert_eq!(cfg.corpus_path, PathBuf::from("assets/sample_corpus.json"));
    }
}
