use crate::{AudioClip, CollaboratorError, Result, TagInferencer, Transcriber, TranscriberConfig};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tag_corpus::vocabulary::{ACOUSTIC, EMOTION, INTENT, SOCIAL_CONTEXT};
use tag_corpus::{TagVocabulary, TargetTagSet};

/// Transcriber that reveals a fixed script in proportion to buffered audio,
/// so repeated calls over a growing buffer return growing prefixes.
pub struct ScriptedTranscriber {
    words: Vec<String>,
    words_per_second: f64,
    latency: Duration,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(script: &str, words_per_second: f64) -> Self {
        Self {
            words: script.split_whitespace().map(str::to_string).collect(),
            words_per_second,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn from_config(cfg: &TranscriberConfig) -> Self {
        Self::new(&cfg.mock_script, cfg.mock_words_per_second)
            .with_latency(Duration::from_millis(cfg.mock_latency_ms))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio: AudioClip<'_>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let revealed = (audio.duration_secs() * self.words_per_second).floor() as usize;
        let n = revealed.min(self.words.len());
        Ok(self.words[..n].join(" "))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct KeywordRule {
    keywords: &'static [&'static str],
    tags: &'static [(&'static str, &'static str)],
}

const RULES: &[KeywordRule] = &[
    KeywordRule {
        keywords: &["hungry", "food", "eat", "feed", "饿", "吃"],
        tags: &[
            (EMOTION, "hungry"),
            (INTENT, "requesting_food"),
            (ACOUSTIC, "high_pitch"),
            (SOCIAL_CONTEXT, "feeding_time"),
        ],
    },
    KeywordRule {
        keywords: &["miss", "lonely", "alone", "away", "想", "孤单"],
        tags: &[
            (EMOTION, "lonely"),
            (INTENT, "seeking_companionship"),
            (ACOUSTIC, "prolonged"),
            (SOCIAL_CONTEXT, "separation"),
        ],
    },
    KeywordRule {
        keywords: &["pet", "love", "cuddle", "good", "摸", "爱"],
        tags: &[
            (EMOTION, "content"),
            (INTENT, "expressing_comfort"),
            (ACOUSTIC, "soft"),
            (SOCIAL_CONTEXT, "being_petted"),
        ],
    },
    KeywordRule {
        keywords: &["stop", "no", "leave", "angry", "不要", "走开"],
        tags: &[
            (EMOTION, "annoyed"),
            (INTENT, "protesting"),
            (ACOUSTIC, "loud"),
        ],
    },
    KeywordRule {
        keywords: &["hello", "hi", "welcome", "home", "你好"],
        tags: &[
            (EMOTION, "eager"),
            (INTENT, "greeting"),
            (ACOUSTIC, "rising_tone"),
            (SOCIAL_CONTEXT, "near_owner"),
        ],
    },
];

const FALLBACK: &[(&str, &str)] = &[
    (EMOTION, "calm"),
    (INTENT, "expressing_comfort"),
    (ACOUSTIC, "mid_pitch"),
    (ACOUSTIC, "medium_length"),
    (SOCIAL_CONTEXT, "near_owner"),
];

/// Offline tagger driven by keyword rules.
pub struct KeywordTagger {
    vocabulary: TagVocabulary,
    latency: Duration,
    calls: AtomicUsize,
}

impl KeywordTagger {
    pub fn new(vocabulary: TagVocabulary) -> Self {
        Self {
            vocabulary,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tag(&self, text: &str) -> TargetTagSet {
        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let hit = |keyword: &str| {
            if keyword.is_ascii() {
                words.contains(&keyword)
            } else {
                lowered.contains(keyword)
            }
        };

        let mut matched = Vec::new();
        let mut target = TargetTagSet::default();
        for rule in RULES {
            if let Some(keyword) = rule.keywords.iter().find(|k| hit(**k)) {
                matched.push(*keyword);
                for (dimension, tag) in rule.tags {
                    target = target.with_tags(dimension, [*tag]);
                }
            }
        }

        if matched.is_empty() {
            for (dimension, tag) in FALLBACK {
                target = target.with_tags(dimension, [*tag]);
            }
            target.rationale = "no keyword matched; assuming a calm, comfortable cat".to_string();
        } else {
            target.rationale = format!("matched keywords: {}", matched.join(", "));
        }
        target
    }
}

#[async_trait]
impl TagInferencer for KeywordTagger {
    async fn infer(&self, text: &str) -> Result<TargetTagSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if text.trim().is_empty() {
            return Err(CollaboratorError::Failed("empty transcript".into()));
        }
        let (target, rejected) = self.vocabulary.sanitize(self.tag(text));
        if !rejected.is_empty() {
            tracing::debug!(count = rejected.len(), "keyword tags outside the vocabulary dropped");
        }
        Ok(target)
    }

    fn name(&self) -> &str {
        "keyword"
    }
}
