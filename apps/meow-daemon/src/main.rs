use anyhow::{Context, Result};
use clap::Parser;
use session_core::DaemonConfig;
use std::path::{Path, PathBuf};
use tracing::info;
use voice_infer::BackendKind;

mod server;

#[derive(Parser)]
#[command(name = "meow-daemon")]
#[command(about = "Meowsformer streaming translation daemon")]
struct Args {
    /// JSON config file; built-in defaults apply when it does not exist
    #[arg(long, default_value = "meowsformer.json")]
    config: PathBuf,

    /// Listen address, e.g. 0.0.0.0:8000
    #[arg(long)]
    listen: Option<String>,

    /// Sample corpus (JSON or YAML)
    #[arg(long)]
    corpus: Option<PathBuf>,

    /// Tag vocabulary replacing the built-in one
    #[arg(long)]
    vocabulary: Option<PathBuf>,

    /// Directory holding the sample recordings
    #[arg(long)]
    assets_root: Option<PathBuf>,

    /// Transcription backend (mock, openai)
    #[arg(long)]
    asr_backend: Option<BackendKind>,

    /// Tag inference backend (mock, openai)
    #[arg(long)]
    tagger_backend: Option<BackendKind>,
}

impl Args {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(corpus) = self.corpus {
            config.corpus_path = corpus;
        }
        if let Some(vocabulary) = self.vocabulary {
            config.vocabulary_path = Some(vocabulary);
        }
        if let Some(root) = self.assets_root {
            config.session.assets_root = Some(root);
        }
        if let Some(kind) = self.asr_backend {
            config.transcriber.backend = kind;
        }
        if let Some(kind) = self.tagger_backend {
            config.inference.backend = kind;
        }
    }
}

fn load_config(path: &Path) -> Result<DaemonConfig> {
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
        return Ok(DaemonConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    DaemonConfig::from_json(&raw).with_context(|| format!("invalid config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();

    let args = Args::parse();
    let mut config = load_config(&args.config)?;
    args.apply(&mut config);

    info!("Meowsformer daemon starting");
    info!(
        corpus = %config.corpus_path.display(),
        transcriber = ?config.transcriber.backend,
        inferencer = ?config.inference.backend,
        "configuration loaded"
    );

    let state = server::AppState::build(&config)?;
    server::serve(&config.listen, state).await
}

fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8000");
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meow.json");
        std::fs::write(&path, r#"{ "listen": "127.0.0.1:9000" }"#).unwrap();
        let mut config = load_config(&path).unwrap();

        let args = Args::parse_from([
            "meow-daemon",
            "--corpus",
            "corpus.yaml",
            "--tagger-backend",
            "openai",
        ]);
        args.apply(&mut config);
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.corpus_path, PathBuf::from("corpus.yaml"));
        assert_eq!(config.inference.backend, BackendKind::OpenAi);
        assert_eq!(config.transcriber.backend, BackendKind::Mock);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ listen").unwrap();
        assert!(load_config(&path).is_err());
    }
}
