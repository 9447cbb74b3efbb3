//! Fixed per-dimension tag vocabulary.

use crate::{TagMap, TargetTagSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const EMOTION: &str = "emotion";
pub const INTENT: &str = "intent";
pub const ACOUSTIC: &str = "acoustic";
pub const SOCIAL_CONTEXT: &str = "social_context";
pub const BREED_VOICE: &str = "breed_voice";

/// Valid tags per dimension. Read-only after load and shared across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagVocabulary {
    dimensions: BTreeMap<String, BTreeSet<String>>,
}

/// A tag rejected by [`TagVocabulary::sanitize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTag {
    pub dimension: String,
    pub tag: String,
}

impl TagVocabulary {
    pub fn new(dimensions: BTreeMap<String, BTreeSet<String>>) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> impl Iterator<Item = &str> {
        self.dimensions.keys().map(String::as_str)
    }

    pub fn tags(&self, dimension: &str) -> Option<&BTreeSet<String>> {
        self.dimensions.get(dimension)
    }

    pub fn contains(&self, dimension: &str, tag: &str) -> bool {
        self.dimensions
            .get(dimension)
            .is_some_and(|tags| tags.contains(tag))
    }

    pub fn len(&self) -> usize {
        self.dimensions.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split a tag map into its in-vocabulary part and the offending tags.
    pub fn partition(&self, tags: &TagMap) -> (TagMap, Vec<InvalidTag>) {
        let mut kept = TagMap::new();
        let mut rejected = Vec::new();
        for (dimension, set) in tags {
            let entry = kept.entry(dimension.clone()).or_default();
            for tag in set {
                if self.contains(dimension, tag) {
                    entry.insert(tag.clone());
                } else {
                    rejected.push(InvalidTag {
                        dimension: dimension.clone(),
                        tag: tag.clone(),
                    });
                }
            }
        }
        kept.retain(|dimension, _| self.dimensions.contains_key(dimension));
        (kept, rejected)
    }

    /// Drop every out-of-vocabulary tag from an inference result.
    pub fn sanitize(&self, target: TargetTagSet) -> (TargetTagSet, Vec<InvalidTag>) {
        let (tags, rejected) = self.partition(&target.tags);
        (
            TargetTagSet {
                tags,
                rationale: target.rationale,
            },
            rejected,
        )
    }
}

impl Default for TagVocabulary {
    /// The five-dimension taxonomy the sample corpus is tagged with.
    fn default() -> Self {
        let table: [(&str, &[&str]); 5] = [
            (
                EMOTION,
                &[
                    "hungry",
                    "eager",
                    "demanding",
                    "anxious",
                    "lonely",
                    "distressed",
                    "content",
                    "relaxed",
                    "annoyed",
                    "agitated",
                    "calm",
                ],
            ),
            (
                INTENT,
                &[
                    "requesting_food",
                    "demanding_attention",
                    "seeking_companionship",
                    "expressing_comfort",
                    "protesting",
                    "greeting",
                ],
            ),
            (
                ACOUSTIC,
                &[
                    "high_pitch",
                    "low_pitch",
                    "mid_pitch",
                    "short_burst",
                    "medium_length",
                    "prolonged",
                    "loud",
                    "soft",
                    "rising_tone",
                    "falling_tone",
                    "trembling",
                ],
            ),
            (
                SOCIAL_CONTEXT,
                &[
                    "feeding_time",
                    "alone_at_home",
                    "separation",
                    "being_petted",
                    "physical_contact",
                    "near_owner",
                ],
            ),
            (BREED_VOICE, &["deep_voice", "bright_voice"]),
        ];

        let dimensions = table
            .iter()
            .map(|(dim, tags)| {
                (
                    dim.to_string(),
                    tags.iter().map(|t| t.to_string()).collect(),
                )
            })
            .collect();
        Self { dimensions }
    }
}
