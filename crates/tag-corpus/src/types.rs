use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tags keyed by dimension name.
pub type TagMap = BTreeMap<String, BTreeSet<String>>;

/// One immutable entry of the sample corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedSample {
    pub id: String,
    /// Path of the recording, relative to the assets root.
    #[serde(default)]
    pub file_path: String,
    #[serde(default = "unknown")]
    pub breed: String,
    /// Recording context (e.g. `Food`, `Isolation`, `Brushing`).
    #[serde(default = "unknown")]
    pub context: String,
    #[serde(default)]
    pub valence: f64,
    #[serde(default)]
    pub arousal: f64,
    #[serde(default)]
    pub tags: TagMap,
}

fn unknown() -> String {
    "Unknown".to_string()
}

impl TaggedSample {
    pub fn tags_for(&self, dimension: &str) -> Option<&BTreeSet<String>> {
        self.tags.get(dimension)
    }
}

/// Tags describing the ideal response sound, as produced by tag inference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetTagSet {
    #[serde(default)]
    pub tags: TagMap,
    #[serde(default)]
    pub rationale: String,
}

impl TargetTagSet {
    pub fn new(rationale: impl Into<String>) -> Self {
        Self {
            tags: TagMap::new(),
            rationale: rationale.into(),
        }
    }

    /// Builder-style helper, mostly for tests and mock backends.
    pub fn with_tags<I, S>(mut self, dimension: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(dimension.to_string())
            .or_default()
            .extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn tags_for(&self, dimension: &str) -> Option<&BTreeSet<String>> {
        self.tags.get(dimension)
    }

    /// First tag of a dimension in set order, if any.
    pub fn primary(&self, dimension: &str) -> Option<&str> {
        self.tags
            .get(dimension)
            .and_then(|set| set.iter().next())
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.values().all(BTreeSet::is_empty)
    }

    /// Parse the flat wire form emitted by inference backends:
    /// `{"emotion": [...], "intent": [...], "reasoning": "..."}`.
    pub fn from_flat_json(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut out = TargetTagSet::default();
        for (key, val) in object {
            match (key.as_str(), val) {
                ("reasoning" | "rationale", serde_json::Value::String(s)) => {
                    out.rationale = s.clone();
                }
                (_, serde_json::Value::Array(items)) => {
                    let set = out.tags.entry(key.clone()).or_default();
                    set.extend(items.iter().filter_map(|v| v.as_str()).map(str::to_string));
                }
                (_, serde_json::Value::String(s)) if !s.is_empty() => {
                    out.tags.entry(key.clone()).or_default().insert(s.clone());
                }
                _ => {}
            }
        }
        Some(out)
    }
}
