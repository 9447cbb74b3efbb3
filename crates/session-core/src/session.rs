//! The per-connection coordinator.
//!
//! A [`StreamingSession`] owns everything about one client: the audio buffer,
//! the speculative scheduler and the state machine. [`run_session`] drives it
//! from a channel of inbound frames, so the same code serves the WebSocket
//! daemon and the offline simulator.

use crate::buffer::{AudioBuffer, PushOutcome};
use crate::{
    ClientMessage, Inbound, Result, SelectedSample, ServerMessage, SessionConfig, SessionError,
    SessionMetrics, SessionState, Stage, TranslationResult,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use speculative::{
    decide_reuse, AwaitOutcome, Completion, ReuseDecision, SpeculativeScheduler, TriggerOutcome,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tag_corpus::{best_match, CorpusIndex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use voice_infer::{TagInferencer, Transcriber};

/// Process-wide collaborators handed to every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub corpus: Arc<CorpusIndex>,
    pub transcriber: Arc<dyn Transcriber>,
    pub inferencer: Arc<dyn TagInferencer>,
    pub metrics: SessionMetrics,
}

/// Whether the driver should keep reading from the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

pub struct StreamingSession {
    id: Uuid,
    config: Arc<SessionConfig>,
    corpus: Arc<CorpusIndex>,
    transcriber: Arc<dyn Transcriber>,
    inferencer: Arc<dyn TagInferencer>,
    metrics: SessionMetrics,
    scheduler: SpeculativeScheduler,
    buffer: AudioBuffer,
    latest_partial: String,
    preference: Option<String>,
    speculative_fired: bool,
    counted_active: bool,
    state: SessionState,
    out: mpsc::Sender<ServerMessage>,
}

impl StreamingSession {
    pub fn new(
        deps: SessionDeps,
        config: Arc<SessionConfig>,
        out: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let scheduler =
            SpeculativeScheduler::new(Arc::clone(&deps.inferencer), config.speculative.clone());
        let buffer = AudioBuffer::new(
            config.audio,
            config.min_buffer_ms,
            config.max_buffer_ms,
            config.transcription_interval(),
        );
        Self {
            id: Uuid::new_v4(),
            config,
            corpus: deps.corpus,
            transcriber: deps.transcriber,
            inferencer: deps.inferencer,
            metrics: deps.metrics,
            scheduler,
            buffer,
            latest_partial: String::new(),
            preference: None,
            speculative_fired: false,
            counted_active: false,
            state: SessionState::Idle,
            out,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn preference(&self) -> Option<&str> {
        self.preference.as_deref()
    }

    pub fn latest_partial(&self) -> &str {
        &self.latest_partial
    }

    pub fn buffered(&self) -> Duration {
        self.buffer.duration()
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        if !from.can_transition_to(to) {
            warn!(session_id = %self.id, %from, %to, "ignoring invalid state transition");
            return;
        }
        self.state = to;
        info!(session_id = %self.id, %from, %to, "session state changed");
    }

    async fn emit(&self, msg: ServerMessage) {
        let kind = msg.kind();
        if self.out.send(msg).await.is_err() {
            debug!(session_id = %self.id, kind, "client gone, dropping message");
        }
    }

    /// Report a non-fatal error to the client; the state is left alone.
    async fn reject(&self, err: SessionError) {
        warn!(session_id = %self.id, state = %self.state, error = %err, "request rejected");
        self.emit(ServerMessage::error(err.to_string(), false)).await;
    }

    fn try_connect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(SessionError::InvalidState {
                state: self.state,
                action: "connect",
            });
        }
        self.corpus
            .ensure_ready()
            .map_err(|_| SessionError::EmptyCorpus)?;
        self.transition(SessionState::Connected);
        Ok(())
    }

    /// Idle -> Connected. An empty corpus fails the session before any
    /// audio is accepted.
    pub async fn open(&mut self) -> Flow {
        match self.try_connect() {
            Ok(()) => {
                self.metrics.sessions_started.inc();
                self.metrics.active_sessions.inc();
                self.counted_active = true;
                info!(
                    session_id = %self.id,
                    samples = self.corpus.len(),
                    transcriber = self.transcriber.name(),
                    inferencer = self.inferencer.name(),
                    "session opened"
                );
                Flow::Continue
            }
            Err(err) => self.fail(err).await,
        }
    }

    /// Drop everything tied to the current utterance. The breed preference
    /// survives.
    fn discard(&mut self) {
        if self.scheduler.is_pending() {
            self.metrics.stale_results_dropped.inc();
        }
        self.scheduler.reset();
        self.buffer.clear();
        self.latest_partial.clear();
        self.speculative_fired = false;
    }

    /// Back to a fresh `Connected` session.
    fn restart(&mut self) -> Flow {
        self.discard();
        self.transition(SessionState::Idle);
        match self.try_connect() {
            Ok(()) => Flow::Continue,
            Err(err) => {
                error!(session_id = %self.id, error = %err, "session cannot reconnect");
                self.transition(SessionState::Failed);
                Flow::Close
            }
        }
    }

    /// End the utterance with a fatal error.
    async fn fail(&mut self, err: SessionError) -> Flow {
        error!(session_id = %self.id, state = %self.state, error = %err, "utterance failed");
        self.emit(ServerMessage::error(err.to_string(), true)).await;
        self.transition(SessionState::Failed);
        self.discard();
        self.metrics.utterances_failed.inc();

        if matches!(err, SessionError::EmptyCorpus) {
            return Flow::Close;
        }
        if self.config.auto_reset {
            return self.restart();
        }
        Flow::Continue
    }

    pub async fn handle(&mut self, inbound: Inbound) -> Flow {
        match inbound {
            Inbound::Audio(frame) => {
                self.on_audio(&frame).await;
                Flow::Continue
            }
            Inbound::Text(text) => match ClientMessage::parse(&text) {
                Ok(msg) => self.on_control(msg).await,
                Err(detail) => {
                    self.reject(SessionError::Protocol(detail)).await;
                    Flow::Continue
                }
            },
        }
    }

    async fn on_control(&mut self, msg: ClientMessage) -> Flow {
        match msg {
            ClientMessage::Config { breed_preference } => {
                self.preference = breed_preference
                    .map(|b| b.trim().to_string())
                    .filter(|b| !b.is_empty());
                info!(session_id = %self.id, preference = ?self.preference, "breed preference set");
                Flow::Continue
            }
            ClientMessage::Start => {
                match self.state {
                    SessionState::Connected => self.transition(SessionState::Recording),
                    SessionState::Recording => {}
                    state => {
                        self.reject(SessionError::InvalidState {
                            state,
                            action: "start",
                        })
                        .await
                    }
                }
                Flow::Continue
            }
            ClientMessage::Stop => self.finalize().await,
            ClientMessage::Reset => {
                info!(session_id = %self.id, state = %self.state, "reset requested");
                self.restart()
            }
        }
    }

    async fn on_audio(&mut self, frame: &[u8]) {
        match self.state {
            SessionState::Connected => self.transition(SessionState::Recording),
            SessionState::Recording => {}
            state => {
                self.reject(SessionError::InvalidState {
                    state,
                    action: "audio",
                })
                .await;
                return;
            }
        }

        match self.buffer.push(frame) {
            PushOutcome::Accepted => {}
            PushOutcome::Truncated { dropped } => {
                warn!(session_id = %self.id, dropped, "utterance reached its maximum length, audio truncated")
            }
            PushOutcome::Full => {
                debug!(session_id = %self.id, bytes = frame.len(), "buffer full, frame dropped");
                return;
            }
            PushOutcome::Frozen => return,
        }

        self.maybe_transcribe().await;
    }

    /// Re-transcribe the whole buffer when the cadence allows it.
    async fn maybe_transcribe(&mut self) {
        let now = Instant::now();
        if !self.buffer.should_transcribe(now) {
            return;
        }
        self.buffer.mark_attempt(now);

        match self.transcriber.transcribe(self.buffer.clip()).await {
            Ok(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    debug!(session_id = %self.id, "intermediate transcript is empty");
                    return;
                }
                debug!(session_id = %self.id, chars = text.chars().count(), "intermediate transcript");
                self.latest_partial = text.clone();
                self.maybe_speculate(&text);
                self.emit(ServerMessage::partial(text)).await;
            }
            Err(source) => {
                self.metrics.collaborator_errors.inc();
                let err = SessionError::collaborator(Stage::IntermediateTranscription, source);
                warn!(session_id = %self.id, error = %err, "keeping previous partial transcript");
            }
        }
    }

    /// Fire background inference once per utterance, as soon as the partial
    /// transcript carries enough content.
    fn maybe_speculate(&mut self, text: &str) {
        if self.speculative_fired {
            return;
        }
        match self.scheduler.trigger(text) {
            TriggerOutcome::BelowThreshold { units } => {
                debug!(session_id = %self.id, units, "partial transcript too short to speculate")
            }
            TriggerOutcome::Started { generation }
            | TriggerOutcome::Superseded { generation, .. } => {
                self.speculative_fired = true;
                self.metrics.speculative_started.inc();
                info!(session_id = %self.id, generation, "speculative inference started");
            }
            TriggerOutcome::AlreadyRunning { .. } => self.speculative_fired = true,
        }
    }

    /// A background inference settled while the client was still talking.
    pub async fn on_speculative(&mut self, completion: Completion) {
        match completion {
            Completion::Ready {
                generation, tags, ..
            } => {
                if self.state == SessionState::Recording {
                    info!(session_id = %self.id, generation, "speculative tags ready");
                    self.emit(ServerMessage::preview(&tags)).await;
                }
            }
            Completion::Failed { generation, detail } => {
                self.metrics.collaborator_errors.inc();
                warn!(
                    session_id = %self.id,
                    generation,
                    stage = %Stage::SpeculativeInference,
                    %detail,
                    "finalize will infer from scratch"
                );
            }
        }
    }

    async fn finalize(&mut self) -> Flow {
        match self.state {
            SessionState::Recording => {}
            SessionState::Connected => return self.fail(SessionError::NoAudio).await,
            state => {
                self.reject(SessionError::InvalidState {
                    state,
                    action: "stop",
                })
                .await;
                return Flow::Continue;
            }
        }
        if self.buffer.is_empty() {
            return self.fail(SessionError::NoAudio).await;
        }

        self.transition(SessionState::Finalizing);
        self.buffer.freeze();
        let started = Instant::now();
        let timeout = self.config.speculative.await_timeout();
        info!(
            session_id = %self.id,
            buffered_ms = self.buffer.duration().as_millis() as u64,
            speculative_pending = self.scheduler.is_pending(),
            "finalizing utterance"
        );

        // The final transcription does not depend on the speculative result,
        // so both waits overlap.
        let (transcribed, awaited) = tokio::join!(
            self.transcriber.transcribe(self.buffer.clip()),
            self.scheduler.await_result(timeout)
        );

        match awaited {
            AwaitOutcome::Timeout => {
                self.metrics.speculative_timeouts.inc();
                self.metrics.stale_results_dropped.inc();
                warn!(session_id = %self.id, error = %SessionError::Timeout(timeout), "ignoring speculative result");
            }
            AwaitOutcome::Failed(detail) => {
                debug!(session_id = %self.id, %detail, "speculative inference failed")
            }
            AwaitOutcome::Ready(_) | AwaitOutcome::NoTask => {}
        }

        let transcript = match transcribed {
            Ok(text) => text.trim().to_string(),
            Err(source) => {
                self.metrics.collaborator_errors.inc();
                if self.config.final_fallback_to_partial && !self.latest_partial.is_empty() {
                    warn!(session_id = %self.id, error = %source, "final transcription failed, using last partial");
                    self.latest_partial.clone()
                } else {
                    return self
                        .fail(SessionError::collaborator(Stage::FinalTranscription, source))
                        .await;
                }
            }
        };

        self.emit(ServerMessage::final_transcript(transcript.clone()))
            .await;
        if transcript.is_empty() {
            return self.fail(SessionError::NoSpeech).await;
        }

        let threshold = self.config.speculative.similarity_threshold;
        let (tags, reused) = match decide_reuse(self.scheduler.entry(), &transcript, threshold) {
            ReuseDecision::Reuse { tags, similarity } => {
                self.metrics.speculative_reused.inc();
                info!(session_id = %self.id, similarity, "reusing speculative tags");
                (tags, true)
            }
            ReuseDecision::Fresh(reason) => {
                info!(session_id = %self.id, ?reason, "running tag inference on final transcript");
                self.metrics.fresh_inferences.inc();
                match self.inferencer.infer(&transcript).await {
                    Ok(tags) => (tags, false),
                    Err(source) => {
                        self.metrics.collaborator_errors.inc();
                        return self
                            .fail(SessionError::collaborator(Stage::FreshInference, source))
                            .await;
                    }
                }
            }
        };

        let (_, rejected) = self.corpus.vocabulary().partition(&tags.tags);
        if !rejected.is_empty() {
            let err = SessionError::InvalidTag {
                count: rejected.len(),
            };
            warn!(session_id = %self.id, error = %err, "matching on the remaining tags");
        }

        let corpus = Arc::clone(&self.corpus);
        let config = Arc::clone(&self.config);
        let preference = self.preference.clone();
        let candidate = match best_match(&tags, &corpus, &config.matching, preference.as_deref()) {
            Ok(candidate) => candidate,
            Err(err) => return self.fail(err.into()).await,
        };
        let audio_base64 = self.load_sample_audio(&candidate.sample.file_path).await;
        let selected = SelectedSample::from(&candidate);

        info!(
            session_id = %self.id,
            sample_id = %selected.sample_id,
            score = selected.match_score,
            reused,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "utterance translated"
        );
        let result = TranslationResult {
            transcript,
            selected_sample: selected,
            target_tags: tags.tags,
            rationale: tags.rationale,
            reused_speculative: reused,
            audio_base64,
        };
        self.emit(ServerMessage::Result(Box::new(result))).await;
        self.transition(SessionState::Completed);
        self.metrics.utterances_completed.inc();

        if self.config.auto_reset {
            return self.restart();
        }
        Flow::Continue
    }

    /// Read the selected recording from the assets root. A missing file only
    /// omits the audio from the result.
    async fn load_sample_audio(&self, file_path: &str) -> Option<String> {
        let root = self.config.assets_root.as_deref()?;
        if file_path.is_empty() {
            return None;
        }
        let path = root.join(Path::new(file_path));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Some(BASE64.encode(bytes)),
            Err(e) => {
                warn!(session_id = %self.id, path = %path.display(), error = %e, "sample audio unavailable");
                None
            }
        }
    }

    /// The client went away. Pending work is cancelled and an unfinished
    /// utterance is abandoned.
    pub fn disconnect(&mut self) {
        if matches!(
            self.state,
            SessionState::Recording | SessionState::Finalizing
        ) {
            warn!(session_id = %self.id, state = %self.state, error = %SessionError::Disconnected, "abandoning utterance");
            self.transition(SessionState::Failed);
            self.metrics.utterances_failed.inc();
        }
        self.discard();
        if self.counted_active {
            self.metrics.active_sessions.dec();
            self.counted_active = false;
        }
        info!(session_id = %self.id, state = %self.state, "session closed");
    }
}

/// Client frames held back while another frame is being handled.
const MAX_BACKLOG: usize = 256;

/// Drive one session until the client disconnects or the session cannot
/// continue. Returns the final state.
pub async fn run_session(
    mut session: StreamingSession,
    mut inbound: mpsc::Receiver<Inbound>,
) -> SessionState {
    if session.open().await == Flow::Close {
        session.disconnect();
        return session.state();
    }

    let mut backlog = VecDeque::new();
    loop {
        let frame = match backlog.pop_front() {
            Some(frame) => frame,
            None => tokio::select! {
                frame = inbound.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
                completion = session.scheduler.next_completion() => {
                    session.on_speculative(completion).await;
                    continue;
                }
            },
        };
        match handle_watching(&mut session, frame, &mut inbound, &mut backlog).await {
            Some(Flow::Continue) => {}
            Some(Flow::Close) => break,
            None => {
                warn!(session_id = %session.id, state = %session.state, "client left while a message was in flight");
                break;
            }
        }
    }

    session.disconnect();
    session.state()
}

/// Handle one frame while still listening to the client, so a hang-up during
/// a long finalize is noticed. Frames arriving meanwhile are queued in order.
/// Returns `None` when the client is gone; the handler is dropped unfinished.
async fn handle_watching(
    session: &mut StreamingSession,
    frame: Inbound,
    inbound: &mut mpsc::Receiver<Inbound>,
    backlog: &mut VecDeque<Inbound>,
) -> Option<Flow> {
    let handling = session.handle(frame);
    tokio::pin!(handling);
    loop {
        tokio::select! {
            biased;
            flow = &mut handling => return Some(flow),
            frame = inbound.recv(), if backlog.len() < MAX_BACKLOG => match frame {
                Some(frame) => backlog.push_back(frame),
                None => return None,
            },
        }
    }
}
