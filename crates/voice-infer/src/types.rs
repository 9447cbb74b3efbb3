use serde::{Deserialize, Serialize};

/// Layout of raw PCM: signed 16-bit little-endian, interleaved channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            channels: 1,
        }
    }
}

impl AudioFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate_hz as usize * self.channels.max(1) as usize * Self::BYTES_PER_SAMPLE
    }

    pub fn bytes_for_millis(&self, millis: u64) -> usize {
        let bytes = self.bytes_per_second() as u64 * millis / 1000;
        // keep whole frames
        let frame = (self.channels.max(1) as usize * Self::BYTES_PER_SAMPLE) as u64;
        (bytes - bytes % frame) as usize
    }
}

/// Borrowed view of buffered audio handed to a transcriber.
#[derive(Debug, Clone, Copy)]
pub struct AudioClip<'a> {
    pub format: AudioFormat,
    pub pcm: &'a [u8],
}

impl<'a> AudioClip<'a> {
    pub fn new(format: AudioFormat, pcm: &'a [u8]) -> Self {
        Self { format, pcm }
    }

    pub fn duration_secs(&self) -> f64 {
        let bps = self.format.bytes_per_second();
        if bps == 0 {
            return 0.0;
        }
        self.pcm.len() as f64 / bps as f64
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    /// Decode into i16 samples; a trailing odd byte is ignored.
    pub fn samples(&self) -> impl Iterator<Item = i16> + 'a {
        self.pcm
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Mock,
    OpenAi,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mock" => Ok(Self::Mock),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    pub backend: BackendKind,
    pub model: String,
    pub endpoint: String,
    pub language: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    /// Utterance revealed by the mock backend.
    pub mock_script: String,
    pub mock_words_per_second: f64,
    pub mock_latency_ms: u64,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mock,
            model: "whisper-1".to_string(),
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            language: None,
            api_key: None,
            request_timeout_ms: 30_000,
            mock_script: "I miss you so much when you are away".to_string(),
            mock_words_per_second: 2.5,
            mock_latency_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub backend: BackendKind,
    pub model: String,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub request_timeout_ms: u64,
    pub mock_latency_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Mock,
            model: "gpt-4o".to_string(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            temperature: 0.7,
            request_timeout_ms: 30_000,
            mock_latency_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_duration() {
        let format = AudioFormat::default();
        let pcm = vec![0u8; format.bytes_per_second() / 2];
        let clip = AudioClip::new(format, &pcm);
        assert!((clip.duration_secs() - 0.5).abs() < 1e-9);
        assert_eq!(clip.samples().count(), 4000);
    }

    #[test]
    fn test_bytes_for_millis_whole_frames() {
        let stereo = AudioFormat {
            sample_rate_hz: 44_100,
            channels: 2,
        };
        assert_eq!(stereo.bytes_for_millis(1) % 4, 0);
        assert_eq!(AudioFormat::default().bytes_for_millis(1000), 32_000);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("openai".parse::<BackendKind>(), Ok(BackendKind::OpenAi));
        assert!("vosk".parse::<BackendKind>().is_err());
    }
}
