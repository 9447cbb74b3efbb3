use crate::{CorpusError, Result, TagVocabulary, TaggedSample};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// In-memory sample collection plus the vocabulary it is tagged against.
///
/// Built once at startup and shared as `Arc<CorpusIndex>`; nothing mutates it
/// afterwards, so concurrent sessions read it without synchronization.
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    samples: Vec<TaggedSample>,
    vocabulary: TagVocabulary,
}

impl CorpusIndex {
    /// Validate samples against the vocabulary and build the index.
    ///
    /// Insertion order is preserved; the matcher uses it to break ties.
    pub fn new(samples: Vec<TaggedSample>, vocabulary: TagVocabulary) -> Result<Self> {
        let mut seen = HashSet::with_capacity(samples.len());
        for sample in &samples {
            if !seen.insert(sample.id.as_str()) {
                return Err(CorpusError::DuplicateSample(sample.id.clone()));
            }
            for (dimension, tags) in &sample.tags {
                if let Some(tag) = tags.iter().find(|t| !vocabulary.contains(dimension, t.as_str())) {
                    return Err(CorpusError::UnknownTag {
                        sample_id: sample.id.clone(),
                        dimension: dimension.clone(),
                        tag: tag.clone(),
                    });
                }
            }
        }
        Ok(Self {
            samples,
            vocabulary,
        })
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn samples(&self) -> &[TaggedSample] {
        &self.samples
    }

    pub fn vocabulary(&self) -> &TagVocabulary {
        &self.vocabulary
    }

    pub fn get(&self, id: &str) -> Option<&TaggedSample> {
        self.samples.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fail with [`CorpusError::Empty`] when there is nothing to match against.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.samples.is_empty() {
            return Err(CorpusError::Empty);
        }
        Ok(())
    }
}

/// Corpus file written by the tagging pipeline. Only `samples` is required.
#[derive(Debug, Deserialize)]
struct CorpusFile {
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    total_samples: Option<usize>,
    samples: Vec<TaggedSample>,
}

fn read_structured<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).map_err(|e| CorpusError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let parse_err = |message: String| CorpusError::Parse {
        path: path.display().to_string(),
        message,
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&raw).map_err(|e| parse_err(e.to_string())),
        Some("yml" | "yaml") => serde_yaml::from_str(&raw).map_err(|e| parse_err(e.to_string())),
        other => Err(CorpusError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

pub fn load_vocabulary_file(path: impl AsRef<Path>) -> Result<TagVocabulary> {
    read_structured(path.as_ref())
}

/// Load and validate a corpus file. An empty corpus is an error: no session
/// may start without candidates.
pub fn load_corpus_file(path: impl AsRef<Path>, vocabulary: TagVocabulary) -> Result<CorpusIndex> {
    let path = path.as_ref();
    let file: CorpusFile = read_structured(path)?;
    if let Some(expected) = file.total_samples {
        if expected != file.samples.len() {
            tracing::warn!(
                expected,
                actual = file.samples.len(),
                "corpus sample count does not match header"
            );
        }
    }
    let index = CorpusIndex::new(file.samples, vocabulary)?;
    index.ensure_ready()?;
    tracing::info!(
        path = %path.display(),
        version = file.version.as_deref().unwrap_or("unversioned"),
        samples = index.len(),
        "loaded tagged sample corpus"
    );
    Ok(index)
}
