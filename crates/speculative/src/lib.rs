//! speculative: start tag inference before the speaker finishes, then decide
//! at finalize time whether that early result still holds.
//!
//! One [`SpeculativeScheduler`] lives inside each session. It owns the
//! single-slot [`SpeculativeCache`] and the handle of the in-flight task;
//! nothing here is shared across sessions.

mod content;
pub use content::content_units;

mod similarity;
pub use similarity::similarity_ratio;

mod cache;
pub use cache::{CacheState, SpeculativeCache, SpeculativeCacheEntry};

mod reuse;
pub use reuse::{decide_reuse, FreshReason, ReuseDecision};

mod scheduler;
pub use scheduler::{
    AwaitOutcome, Completion, SpeculativeConfig, SpeculativeScheduler, TriggerOutcome,
};
