//! tag-corpus: tag vocabulary, tagged sample corpus and the weighted matching engine
//!
//! The corpus and vocabulary are loaded once per process and then only read.
//! Matching is a pure function of a target tag set, the corpus and the weights.

mod types;
pub use types::{TagMap, TaggedSample, TargetTagSet};

mod error;
pub use error::{CorpusError, MatchError, Result};

pub mod vocabulary;
pub use vocabulary::{InvalidTag, TagVocabulary};

mod loader;
pub use loader::{load_corpus_file, load_vocabulary_file, CorpusIndex};

pub mod matcher;
pub use matcher::{best_match, rank, top_k, Candidate, DimensionWeights, MatchConfig};
