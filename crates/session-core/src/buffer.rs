use std::time::Duration;
use tokio::time::Instant;
use voice_infer::{AudioClip, AudioFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// Only part of the frame fit under the cap.
    Truncated { dropped: usize },
    /// The buffer is full; the whole frame was dropped.
    Full,
    /// The buffer was frozen by a stop signal.
    Frozen,
}

/// The utterance so far, as one contiguous PCM buffer, plus the cadence of
/// intermediate transcriptions over it.
#[derive(Debug)]
pub struct AudioBuffer {
    format: AudioFormat,
    pcm: Vec<u8>,
    max_bytes: usize,
    min_bytes: usize,
    interval: Duration,
    last_attempt: Option<Instant>,
    frozen: bool,
}

impl AudioBuffer {
    pub fn new(format: AudioFormat, min_buffer_ms: u64, max_buffer_ms: u64, interval: Duration) -> Self {
        Self {
            format,
            pcm: Vec::new(),
            max_bytes: format.bytes_for_millis(max_buffer_ms),
            min_bytes: format.bytes_for_millis(min_buffer_ms),
            interval,
            last_attempt: None,
            frozen: false,
        }
    }

    pub fn push(&mut self, frame: &[u8]) -> PushOutcome {
        if self.frozen {
            return PushOutcome::Frozen;
        }
        let room = self.max_bytes.saturating_sub(self.pcm.len());
        if room == 0 {
            return PushOutcome::Full;
        }
        if frame.len() <= room {
            self.pcm.extend_from_slice(frame);
            return PushOutcome::Accepted;
        }
        self.pcm.extend_from_slice(&frame[..room]);
        PushOutcome::Truncated {
            dropped: frame.len() - room,
        }
    }

    /// True when enough audio is buffered and the cadence interval has passed
    /// since the previous attempt.
    pub fn should_transcribe(&self, now: Instant) -> bool {
        if self.frozen || self.pcm.len() < self.min_bytes {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn mark_attempt(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    pub fn clip(&self) -> AudioClip<'_> {
        AudioClip::new(self.format, &self.pcm)
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len_bytes(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.clip().duration_secs())
    }

    pub fn clear(&mut self) {
        self.pcm.clear();
        self.last_attempt = None;
        self.frozen = false;
    }
}
