//! HTTP surface: one streaming session per WebSocket connection, plus health
//! and metrics endpoints.

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use session_core::{
    run_session, DaemonConfig, Inbound, ServerMessage, SessionConfig, SessionDeps, SessionMetrics,
    StreamingSession,
};
use std::sync::Arc;
use tag_corpus::{load_corpus_file, load_vocabulary_file, CorpusError, CorpusIndex, TagVocabulary};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use voice_infer::{new_tag_inferencer, new_transcriber};

const INBOUND_CAPACITY: usize = 64;
const OUTBOUND_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct AppState {
    deps: SessionDeps,
    session: Arc<SessionConfig>,
}

impl AppState {
    /// Load the corpus and build the collaborators shared by all sessions.
    pub fn build(config: &DaemonConfig) -> Result<Self> {
        let vocabulary = match &config.vocabulary_path {
            Some(path) => load_vocabulary_file(path)
                .with_context(|| format!("failed to load vocabulary {}", path.display()))?,
            None => TagVocabulary::default(),
        };

        // Sessions report an empty corpus to their clients, so a missing
        // file does not stop the server.
        let corpus = if config.corpus_path.exists() {
            match load_corpus_file(&config.corpus_path, vocabulary.clone()) {
                Ok(corpus) => corpus,
                Err(CorpusError::Empty) => {
                    warn!(path = %config.corpus_path.display(), "corpus file holds no samples");
                    CorpusIndex::new(Vec::new(), vocabulary.clone())?
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to load corpus {}", config.corpus_path.display())
                    })
                }
            }
        } else {
            warn!(path = %config.corpus_path.display(), "corpus file not found, serving an empty corpus");
            CorpusIndex::new(Vec::new(), vocabulary.clone())?
        };
        info!(
            samples = corpus.len(),
            dimensions = corpus.vocabulary().len(),
            "corpus loaded"
        );

        let transcriber =
            new_transcriber(&config.transcriber).context("failed to create transcriber")?;
        let inferencer = new_tag_inferencer(&config.inference, vocabulary)
            .context("failed to create tag inferencer")?;
        let metrics = SessionMetrics::new().map_err(anyhow::Error::msg)?;

        Ok(Self {
            deps: SessionDeps {
                corpus: corpus.into_shared(),
                transcriber,
                inferencer,
                metrics,
            },
            session: Arc::new(config.session.clone()),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/translate", get(ws_handler))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

pub async fn serve(listen: &str, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    let addr = listener
        .local_addr()
        .context("failed to read local listener address")?;

    info!(address = %addr, "starting websocket server");
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "samples": state.deps.corpus.len(),
        "transcriber": state.deps.transcriber.name(),
        "inferencer": state.deps.inferencer.name(),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.deps.metrics.encode_text(),
    )
}

async fn ws_handler(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |ws| async move {
        if let Err(err) = handle_socket(state, ws).await {
            error!(error = %err, "websocket handler failed");
        }
    })
}

async fn handle_socket(state: AppState, socket: WebSocket) -> Result<()> {
    let (mut sender, mut receiver) = socket.split();

    let (in_tx, in_rx) = mpsc::channel::<Inbound>(INBOUND_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let payload = match serde_json::to_string(&msg) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(error = %err, "failed to serialize websocket payload");
                    continue;
                }
            };
            if sender.send(Message::Text(payload)).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let session = StreamingSession::new(state.deps.clone(), Arc::clone(&state.session), out_tx);
    let session_id = session.id();
    let processor = tokio::spawn(run_session(session, in_rx));

    loop {
        let message = tokio::select! {
            message = receiver.next() => message,
            // the session gave up on this connection
            _ = in_tx.closed() => break,
        };
        let Some(Ok(message)) = message else {
            break;
        };
        let inbound = match message {
            Message::Binary(data) => Inbound::Audio(data),
            Message::Text(text) => Inbound::Text(text),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if in_tx.send(inbound).await.is_err() {
            break;
        }
    }

    drop(in_tx);
    let final_state = processor.await.context("session task failed")?;
    if let Err(err) = send_task.await {
        warn!(%session_id, error = %err, "send task failed");
    }
    info!(%session_id, %final_state, "connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::path::Path;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tower::ServiceExt;

    const CORPUS: &str = r#"{
        "version": "1",
        "samples": [
            {
                "id": "F_MC_01",
                "file_path": "food/F_MC_01.wav",
                "breed": "Maine Coon",
                "context": "Food",
                "tags": { "emotion": ["hungry"], "intent": ["requesting_food"] }
            },
            {
                "id": "I_ES_01",
                "file_path": "isolation/I_ES_01.wav",
                "breed": "European Shorthair",
                "context": "Isolation",
                "tags": { "emotion": ["lonely"], "intent": ["seeking_companionship"] }
            }
        ]
    }"#;

    fn config(dir: &Path) -> DaemonConfig {
        let corpus_path = dir.join("corpus.json");
        std::fs::write(&corpus_path, CORPUS).unwrap();
        let mut config = DaemonConfig {
            corpus_path,
            ..DaemonConfig::default()
        };
        config.transcriber.mock_script = "feed me now I am hungry".into();
        config.transcriber.mock_words_per_second = 10.0;
        config
    }

    async fn get_body(state: AppState, uri: &str) -> (StatusCode, String) {
        let resp = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::build(&config(dir.path())).unwrap();
        let (status, body) = get_body(state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["samples"], 2);
        assert_eq!(json["transcriber"], "scripted");
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::build(&config(dir.path())).unwrap();
        let (status, body) = get_body(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("meow_sessions_started"));
    }

    #[test]
    fn test_missing_corpus_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig {
            corpus_path: dir.path().join("missing.json"),
            ..DaemonConfig::default()
        };
        let state = AppState::build(&config).unwrap();
        assert!(state.deps.corpus.is_empty());
    }

    #[test]
    fn test_corrupt_corpus_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let corpus_path = dir.path().join("corpus.json");
        std::fs::write(&corpus_path, "{ not json").unwrap();
        let config = DaemonConfig {
            corpus_path,
            ..DaemonConfig::default()
        };
        assert!(AppState::build(&config).is_err());
    }

    #[tokio::test]
    async fn test_websocket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::build(&config(dir.path())).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state).into_make_service())
                .await
                .unwrap();
        });

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/translate"))
            .await
            .unwrap();
        ws.send(WsMessage::Text(
            r#"{"type":"config","breed_preference":"Maine Coon"}"#.into(),
        ))
        .await
        .unwrap();
        // 600 ms of audio stays below the first transcription threshold
        for _ in 0..3 {
            ws.send(WsMessage::Binary(vec![0; 6_400])).await.unwrap();
        }
        ws.send(WsMessage::Text(r#"{"type":"stop"}"#.into()))
            .await
            .unwrap();

        let mut received = Vec::new();
        while let Some(frame) = ws.next().await {
            let WsMessage::Text(text) = frame.unwrap() else {
                continue;
            };
            let msg: ServerMessage = serde_json::from_str(&text).unwrap();
            let done = msg.is_terminal();
            received.push(msg);
            if done {
                break;
            }
        }

        assert_eq!(received[0], ServerMessage::final_transcript("feed me now I am hungry"));
        let ServerMessage::Result(result) = &received[1] else {
            panic!("expected result, got {:?}", received[1]);
        };
        assert_eq!(result.selected_sample.sample_id, "F_MC_01");
        assert!(!result.reused_speculative);
    }
}
