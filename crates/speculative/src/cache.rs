use tag_corpus::TargetTagSet;

#[derive(Debug, Clone, PartialEq)]
pub enum CacheState {
    /// Inference is running in the background.
    Pending,
    Ready(TargetTagSet),
    Failed(String),
    /// Finalize stopped waiting; a late result is discarded.
    TimedOut,
}

impl CacheState {
    pub fn is_pending(&self) -> bool {
        matches!(self, CacheState::Pending)
    }
}

/// The speculative result of one session, keyed by the partial text it was
/// computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeculativeCacheEntry {
    pub text: String,
    pub generation: u64,
    pub state: CacheState,
}

/// Single-slot store. Each `begin` opens a new generation; completions for
/// any other generation are stale and ignored.
#[derive(Debug, Default)]
pub struct SpeculativeCache {
    entry: Option<SpeculativeCacheEntry>,
    next_generation: u64,
}

impl SpeculativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is cached with a pending entry for `text`.
    pub fn begin(&mut self, text: impl Into<String>) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.entry = Some(SpeculativeCacheEntry {
            text: text.into(),
            generation,
            state: CacheState::Pending,
        });
        generation
    }

    /// Record the outcome of `generation`. Returns `false` when the outcome
    /// is stale: superseded, cleared, timed out or already completed.
    pub fn complete(&mut self, generation: u64, outcome: Result<TargetTagSet, String>) -> bool {
        match self.entry.as_mut() {
            Some(entry) if entry.generation == generation && entry.state.is_pending() => {
                entry.state = match outcome {
                    Ok(tags) => CacheState::Ready(tags),
                    Err(detail) => CacheState::Failed(detail),
                };
                true
            }
            _ => false,
        }
    }

    pub fn mark_timed_out(&mut self, generation: u64) {
        if let Some(entry) = self.entry.as_mut() {
            if entry.generation == generation && entry.state.is_pending() {
                entry.state = CacheState::TimedOut;
            }
        }
    }

    pub fn entry(&self) -> Option<&SpeculativeCacheEntry> {
        self.entry.as_ref()
    }

    pub fn generation(&self) -> Option<u64> {
        self.entry.as_ref().map(|e| e.generation)
    }

    /// Drop the entry. Generations keep increasing so that results of tasks
    /// started before the clear can never match again.
    pub fn clear(&mut self) {
        self.entry = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tag_corpus::vocabulary::EMOTION;

    fn tags() -> TargetTagSet {
        TargetTagSet::new("test").with_tags(EMOTION, ["hungry"])
    }

    #[test]
    fn test_complete_current_generation() {
        let mut cache = SpeculativeCache::new();
        let generation = cache.begin("feed me now please");
        assert!(cache.entry().unwrap().state.is_pending());
        assert!(cache.complete(generation, Ok(tags())));
        assert_eq!(cache.entry().unwrap().state, CacheState::Ready(tags()));
        // second completion of the same generation is ignored
        assert!(!cache.complete(generation, Err("late".into())));
    }

    #[test]
    fn test_superseded_result_is_discarded() {
        let mut cache = SpeculativeCache::new();
        let old = cache.begin("I am");
        let new = cache.begin("I am very hungry");
        assert!(new > old);
        assert!(!cache.complete(old, Ok(tags())));
        let entry = cache.entry().unwrap();
        assert_eq!(entry.text, "I am very hungry");
        assert!(entry.state.is_pending());
    }

    #[test]
    fn test_timed_out_entry_rejects_late_result() {
        let mut cache = SpeculativeCache::new();
        let generation = cache.begin("slow text");
        cache.mark_timed_out(generation);
        assert!(!cache.complete(generation, Ok(tags())));
        assert_eq!(cache.entry().unwrap().state, CacheState::TimedOut);
    }

    #[test]
    fn test_clear_invalidates_generation() {
        let mut cache = SpeculativeCache::new();
        let generation = cache.begin("text");
        cache.clear();
        assert!(cache.entry().is_none());
        assert!(!cache.complete(generation, Ok(tags())));
        assert!(cache.begin("again") > generation);
    }

    #[test]
    fn test_failure_recorded() {
        let mut cache = SpeculativeCache::new();
        let generation = cache.begin("text");
        assert!(cache.complete(generation, Err("HTTP 500".into())));
        assert_eq!(
            cache.entry().unwrap().state,
            CacheState::Failed("HTTP 500".into())
        );
    }
}
