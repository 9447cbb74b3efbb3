//! Weighted multi-dimension tag matching.
//!
//! Each dimension contributes `weight * jaccard(target, sample)`; a sample
//! whose breed equals the caller's preference gets a flat bonus on top.
//! Ranking is stable, so equal scores keep corpus insertion order and the
//! same target always picks the same winner.

use crate::vocabulary::{ACOUSTIC, BREED_VOICE, EMOTION, INTENT, SOCIAL_CONTEXT};
use crate::{CorpusIndex, MatchError, TagMap, TaggedSample, TargetTagSet};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Relative importance of each dimension. Dimensions not listed score zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionWeights(BTreeMap<String, f64>);

impl DimensionWeights {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self(weights)
    }

    pub fn single(dimension: &str, weight: f64) -> Self {
        Self(BTreeMap::from([(dimension.to_string(), weight)]))
    }

    pub fn get(&self, dimension: &str) -> Option<f64> {
        self.0.get(dimension).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(d, w)| (d.as_str(), *w))
    }
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self(BTreeMap::from([
            (EMOTION.to_string(), 0.30),
            (INTENT.to_string(), 0.30),
            (ACOUSTIC.to_string(), 0.15),
            (SOCIAL_CONTEXT.to_string(), 0.15),
            (BREED_VOICE.to_string(), 0.10),
        ]))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub weights: DimensionWeights,
    /// Added once to a candidate whose breed equals the preference.
    pub preference_bonus: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            weights: DimensionWeights::default(),
            preference_bonus: 0.05,
        }
    }
}

/// One scored corpus entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub sample: &'a TaggedSample,
    pub score: f64,
    /// Overlapping tags per dimension; dimensions without overlap are absent.
    pub matched_tags: BTreeMap<String, Vec<String>>,
    /// Position of the sample in the corpus.
    pub index: usize,
}

/// Jaccard coefficient `|a ∩ b| / |a ∪ b|`, defined as `0.0` when both are empty.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Score one sample. `target` must already be restricted to the vocabulary.
pub fn score_sample(
    target: &TagMap,
    sample: &TaggedSample,
    weights: &DimensionWeights,
) -> (f64, BTreeMap<String, Vec<String>>) {
    let empty = BTreeSet::new();
    let mut total = 0.0;
    let mut matched = BTreeMap::new();

    for (dimension, weight) in weights.iter() {
        let wanted = target.get(dimension).unwrap_or(&empty);
        let have = sample.tags_for(dimension).unwrap_or(&empty);
        total += weight * jaccard(wanted, have);

        let overlap: Vec<String> = wanted.intersection(have).cloned().collect();
        if !overlap.is_empty() {
            matched.insert(dimension.to_string(), overlap);
        }
    }
    (total, matched)
}

/// Rank every corpus sample against `target`, best first.
pub fn rank<'a>(
    target: &TargetTagSet,
    corpus: &'a CorpusIndex,
    config: &MatchConfig,
    preference: Option<&str>,
) -> Result<Vec<Candidate<'a>>, MatchError> {
    if corpus.is_empty() {
        return Err(MatchError::NoCandidates);
    }

    let (known, rejected) = corpus.vocabulary().partition(&target.tags);
    if !rejected.is_empty() {
        let ignored: Vec<String> = rejected
            .iter()
            .map(|t| format!("{}:{}", t.dimension, t.tag))
            .collect();
        tracing::warn!(?ignored, "ignoring target tags outside the vocabulary");
    }

    let mut candidates: Vec<Candidate<'a>> = corpus
        .samples()
        .iter()
        .enumerate()
        .map(|(index, sample)| {
            let (mut score, matched_tags) = score_sample(&known, sample, &config.weights);
            if preference.is_some_and(|p| p == sample.breed) {
                score += config.preference_bonus;
            }
            Candidate {
                sample,
                score,
                matched_tags,
                index,
            }
        })
        .collect();

    // Stable sort: ties keep insertion order.
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(candidates)
}

pub fn top_k<'a>(
    target: &TargetTagSet,
    corpus: &'a CorpusIndex,
    config: &MatchConfig,
    preference: Option<&str>,
    k: usize,
) -> Result<Vec<Candidate<'a>>, MatchError> {
    let mut ranked = rank(target, corpus, config, preference)?;
    ranked.truncate(k.max(1));
    Ok(ranked)
}

pub fn best_match<'a>(
    target: &TargetTagSet,
    corpus: &'a CorpusIndex,
    config: &MatchConfig,
    preference: Option<&str>,
) -> Result<Candidate<'a>, MatchError> {
    rank(target, corpus, config, preference)?
        .into_iter()
        .next()
        .ok_or(MatchError::NoCandidates)
}
