use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use session_core::{
    run_session, ClientMessage, DaemonConfig, Inbound, SessionDeps, SessionMetrics,
    StreamingSession,
};
use speculative::{content_units, similarity_ratio};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tag_corpus::{load_corpus_file, load_vocabulary_file, top_k, CorpusIndex, TagVocabulary, TargetTagSet};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use voice_infer::wav::read_wav_file;
use voice_infer::{new_tag_inferencer, new_transcriber};

#[derive(Parser, Debug)]
#[command(
    name = "meow",
    version,
    about = "Meowsformer offline tools",
    disable_help_subcommand = true
)]
struct Cli {
    /// Tag vocabulary file; the built-in vocabulary is used otherwise
    #[arg(long, global = true)]
    vocabulary: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the tag vocabulary
    Vocab,
    /// Summarize a sample corpus
    Corpus {
        #[arg(long, default_value = "assets/sample_corpus.json")]
        file: PathBuf,
    },
    /// Rank corpus samples against a target tag set
    Match {
        #[arg(long, default_value = "assets/sample_corpus.json")]
        corpus: PathBuf,
        /// Flat JSON, e.g. '{"emotion":["hungry"],"intent":["requesting_food"]}'
        #[arg(long)]
        target: String,
        /// Preferred breed
        #[arg(long)]
        breed: Option<String>,
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
    /// Similarity ratio of two transcripts and the reuse verdict
    Similarity {
        speculative: String,
        final_text: String,
        #[arg(long, default_value_t = 0.7)]
        threshold: f64,
    },
    /// Stream a WAV file through a full session and print every server message
    Simulate {
        /// 16-bit PCM WAV file
        #[arg(long)]
        wav: PathBuf,
        /// Daemon config providing session settings and backends
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Utterance the mock transcriber reveals
        #[arg(long)]
        script: Option<String>,
        #[arg(long)]
        breed: Option<String>,
        /// Frame length sent per audio message
        #[arg(long, default_value_t = 200)]
        chunk_ms: u64,
        /// Playback speed; 1.0 sends audio in real time
        #[arg(long, default_value_t = 1.0)]
        speed: f64,
    },
    /// Write the default daemon config
    ConfigInit {
        #[arg(long, default_value = "meowsformer.json")]
        out: PathBuf,
        /// Overwrite an existing file
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();
    let vocabulary = load_vocabulary(cli.vocabulary.as_deref())?;

    match cli.command {
        Commands::Vocab => vocab(&vocabulary),
        Commands::Corpus { file } => corpus_summary(&load_corpus(&file, vocabulary)?),
        Commands::Match {
            corpus,
            target,
            breed,
            top,
        } => match_target(&load_corpus(&corpus, vocabulary)?, &target, breed.as_deref(), top),
        Commands::Similarity {
            speculative,
            final_text,
            threshold,
        } => similarity(&speculative, &final_text, threshold),
        Commands::Simulate {
            wav,
            config,
            corpus,
            script,
            breed,
            chunk_ms,
            speed,
        } => {
            let mut daemon = match config {
                Some(path) => read_config(&path)?,
                None => DaemonConfig::default(),
            };
            if let Some(corpus) = corpus {
                daemon.corpus_path = corpus;
            }
            if let Some(script) = script {
                daemon.transcriber.mock_script = script;
            }
            let opts = SimulateOpts {
                wav,
                breed,
                chunk_ms: chunk_ms.max(10),
                speed: if speed > 0.0 { speed } else { 1.0 },
            };
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start runtime")?;
            runtime.block_on(simulate(daemon, vocabulary, opts))
        }
        Commands::ConfigInit { out, force } => config_init(&out, force),
    }
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_vocabulary(path: Option<&Path>) -> Result<TagVocabulary> {
    match path {
        Some(p) => load_vocabulary_file(p)
            .with_context(|| format!("failed to load vocabulary {}", p.display())),
        None => Ok(TagVocabulary::default()),
    }
}

fn load_corpus(path: &Path, vocabulary: TagVocabulary) -> Result<CorpusIndex> {
    load_corpus_file(path, vocabulary)
        .with_context(|| format!("failed to load corpus {}", path.display()))
}

fn read_config(path: &Path) -> Result<DaemonConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    DaemonConfig::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))
}

fn vocab(vocabulary: &TagVocabulary) -> Result<()> {
    for dimension in vocabulary.dimensions() {
        let tags: Vec<&str> = vocabulary
            .tags(dimension)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default();
        println!("{dimension}\t{}", tags.join(", "));
    }
    Ok(())
}

/// Occurrences per value, most frequent first.
fn histogram<'a>(values: impl Iterator<Item = &'a str>) -> Vec<(&'a str, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut sorted: Vec<_> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    sorted
}

fn corpus_summary(corpus: &CorpusIndex) -> Result<()> {
    println!("samples: {}", corpus.len());
    let samples = corpus.samples();
    let sections: [(&str, Vec<(&str, usize)>); 2] = [
        ("breed", histogram(samples.iter().map(|s| s.breed.as_str()))),
        ("context", histogram(samples.iter().map(|s| s.context.as_str()))),
    ];
    for (title, rows) in sections {
        println!("{title}:");
        for (value, count) in rows {
            println!("  {value}\t{count}");
        }
    }
    for dimension in corpus.vocabulary().dimensions() {
        let rows = histogram(
            samples
                .iter()
                .filter_map(|s| s.tags_for(dimension))
                .flat_map(|set| set.iter().map(String::as_str)),
        );
        if rows.is_empty() {
            continue;
        }
        println!("{dimension}:");
        for (tag, count) in rows {
            println!("  {tag}\t{count}");
        }
    }
    Ok(())
}

fn parse_target(raw: &str) -> Result<TargetTagSet> {
    let value: serde_json::Value = serde_json::from_str(raw).context("target is not valid JSON")?;
    TargetTagSet::from_flat_json(&value)
        .ok_or_else(|| anyhow::anyhow!("target must be a JSON object"))
}

fn match_target(corpus: &CorpusIndex, raw: &str, breed: Option<&str>, top: usize) -> Result<()> {
    let target = parse_target(raw)?;
    let session = DaemonConfig::default().session;
    let ranked = top_k(&target, corpus, &session.matching, breed, top)?;
    for (rank, candidate) in ranked.iter().enumerate() {
        println!(
            "{}\t{:.3}\t{}\t{}\t{}",
            rank + 1,
            candidate.score,
            candidate.sample.id,
            candidate.sample.breed,
            serde_json::to_string(&candidate.matched_tags)?
        );
    }
    Ok(())
}

fn similarity(speculative: &str, final_text: &str, threshold: f64) -> Result<()> {
    let ratio = similarity_ratio(speculative, final_text);
    println!("ratio: {ratio:.3}");
    println!(
        "content units: {} / {}",
        content_units(speculative),
        content_units(final_text)
    );
    let verdict = if ratio >= threshold { "reuse" } else { "fresh" };
    println!("verdict: {verdict} (threshold {threshold})");
    Ok(())
}

struct SimulateOpts {
    wav: PathBuf,
    breed: Option<String>,
    chunk_ms: u64,
    speed: f64,
}

async fn simulate(mut config: DaemonConfig, vocabulary: TagVocabulary, opts: SimulateOpts) -> Result<()> {
    let (format, pcm) = read_wav_file(&opts.wav)
        .with_context(|| format!("failed to read {}", opts.wav.display()))?;
    if format != config.session.audio {
        warn!(
            sample_rate_hz = format.sample_rate_hz,
            channels = format.channels,
            "WAV format differs from the configured session format, using the WAV format"
        );
        config.session.audio = format;
    }

    let corpus = load_corpus(&config.corpus_path, vocabulary.clone())?;
    let deps = SessionDeps {
        corpus: corpus.into_shared(),
        transcriber: new_transcriber(&config.transcriber).context("failed to create transcriber")?,
        inferencer: new_tag_inferencer(&config.inference, vocabulary)
            .context("failed to create tag inferencer")?,
        metrics: SessionMetrics::new().map_err(anyhow::Error::msg)?,
    };

    let (in_tx, in_rx) = mpsc::channel(64);
    let (out_tx, mut out_rx) = mpsc::channel(256);
    let session = StreamingSession::new(deps, Arc::new(config.session), out_tx);
    let driver = tokio::spawn(run_session(session, in_rx));
    let (done_tx, done_rx) = oneshot::channel();
    let printer = tokio::spawn(async move {
        let mut done_tx = Some(done_tx);
        while let Some(msg) = out_rx.recv().await {
            println!("{}", serde_json::to_string(&msg)?);
            if msg.is_terminal() {
                if let Some(done) = done_tx.take() {
                    let _ = done.send(());
                }
            }
        }
        Ok::<_, serde_json::Error>(())
    });

    if let Some(breed) = opts.breed {
        let msg = ClientMessage::Config {
            breed_preference: Some(breed),
        };
        in_tx.send(Inbound::Text(msg.to_json())).await?;
    }
    in_tx.send(Inbound::Text(ClientMessage::Start.to_json())).await?;

    let chunk_bytes = format.bytes_for_millis(opts.chunk_ms).max(1);
    let pace = Duration::from_secs_f64(opts.chunk_ms as f64 / 1_000.0 / opts.speed);
    info!(
        seconds = pcm.len() as f64 / format.bytes_per_second() as f64,
        chunks = pcm.len().div_ceil(chunk_bytes),
        "streaming audio"
    );
    for chunk in pcm.chunks(chunk_bytes) {
        if in_tx.send(Inbound::Audio(chunk.to_vec())).await.is_err() {
            warn!("session closed before the audio ended");
            break;
        }
        tokio::time::sleep(pace).await;
    }
    let _ = in_tx.send(Inbound::Text(ClientMessage::Stop.to_json())).await;
    // hanging up earlier would abandon the utterance
    let _ = done_rx.await;
    drop(in_tx);

    let state = driver.await.context("session task failed")?;
    printer.await.context("printer task failed")??;
    info!(%state, "simulation finished");
    Ok(())
}

fn config_init(out: &Path, force: bool) -> Result<()> {
    if out.exists() && !force {
        anyhow::bail!("{} exists; pass --force to overwrite", out.display());
    }
    let json = DaemonConfig::default().to_json_pretty()?;
    std::fs::write(out, json + "\n").with_context(|| format!("failed to write {}", out.display()))?;
    println!("wrote {}", out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_orders_by_count() {
        let rows = histogram(["b", "a", "b", "c", "a", "b"].into_iter());
        assert_eq!(rows, [("b", 3), ("a", 2), ("c", 1)]);
    }

    #[test]
    fn test_parse_target() {
        let target = parse_target(r#"{"emotion":["hungry"],"reasoning":"dinner"}"#).unwrap();
        assert_eq!(target.rationale, "dinner");
        assert!(parse_target("[]").is_err());
        assert!(parse_target("nope").is_err());
    }

    #[test]
    fn test_config_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("meow.json");
        config_init(&out, false).unwrap();
        assert!(config_init(&out, false).is_err());
        config_init(&out, true).unwrap();

        let written = read_config(&out).unwrap();
        assert_eq!(written.listen, DaemonConfig::default().listen);
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::parse_from([
            "meow",
            "simulate",
            "--wav",
            "hello.wav",
            "--script",
            "I am very hungry now",
            "--speed",
            "4",
        ]);
        match cli.command {
            Commands::Simulate {
                wav, script, speed, ..
            } => {
                assert_eq!(wav, PathBuf::from("hello.wav"));
                assert_eq!(script.as_deref(), Some("I am very hungry now"));
                assert_eq!(speed, 4.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
