use crate::similarity::similarity_ratio;
use crate::{CacheState, SpeculativeCacheEntry};
use tag_corpus::TargetTagSet;

/// Why finalize has to run a fresh inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FreshReason {
    NoEntry,
    Pending,
    Failed,
    TimedOut,
    Dissimilar { similarity: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReuseDecision {
    Reuse {
        tags: TargetTagSet,
        similarity: f64,
    },
    Fresh(FreshReason),
}

impl ReuseDecision {
    pub fn is_reuse(&self) -> bool {
        matches!(self, ReuseDecision::Reuse { .. })
    }
}

/// Decide whether a speculative result still describes the final transcript.
/// Reuse requires a ready entry whose text is at least `threshold` similar.
pub fn decide_reuse(
    entry: Option<&SpeculativeCacheEntry>,
    final_text: &str,
    threshold: f64,
) -> ReuseDecision {
    let Some(entry) = entry else {
        return ReuseDecision::Fresh(FreshReason::NoEntry);
    };
    let tags = match &entry.state {
        CacheState::Ready(tags) => tags,
        CacheState::Pending => return ReuseDecision::Fresh(FreshReason::Pending),
        CacheState::Failed(_) => return ReuseDecision::Fresh(FreshReason::Failed),
        CacheState::TimedOut => return ReuseDecision::Fresh(FreshReason::TimedOut),
    };

    let similarity = similarity_ratio(&entry.text, final_text);
    if similarity >= threshold {
        ReuseDecision::Reuse {
            tags: tags.clone(),
            similarity,
        }
    } else {
        ReuseDecision::Fresh(FreshReason::Dissimilar { similarity })
    }
}
