use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct SessionMetrics {
    pub registry: Registry,
    pub sessions_started: IntCounter,
    pub utterances_completed: IntCounter,
    pub utterances_failed: IntCounter,
    pub active_sessions: IntGauge,
    pub speculative_started: IntCounter,
    pub speculative_reused: IntCounter,
    pub fresh_inferences: IntCounter,
    pub speculative_timeouts: IntCounter,
    pub stale_results_dropped: IntCounter,
    pub collaborator_errors: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, String> {
    let c = IntCounter::new(name, help).map_err(|e| format!("metrics init error: {e}"))?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|e| format!("metrics register error: {e}"))?;
    Ok(c)
}

impl SessionMetrics {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let active_sessions = IntGauge::new("meow_sessions_active", "Sessions currently connected")
            .map_err(|e| format!("metrics init error: {e}"))?;
        registry
            .register(Box::new(active_sessions.clone()))
            .map_err(|e| format!("metrics register error: {e}"))?;

        Ok(Self {
            sessions_started: counter(&registry, "meow_sessions_started", "Sessions accepted")?,
            utterances_completed: counter(
                &registry,
                "meow_utterances_completed",
                "Utterances that produced a result",
            )?,
            utterances_failed: counter(
                &registry,
                "meow_utterances_failed",
                "Utterances that ended in a fatal error",
            )?,
            speculative_started: counter(
                &registry,
                "meow_speculative_started",
                "Speculative tag inferences started",
            )?,
            speculative_reused: counter(
                &registry,
                "meow_speculative_reused",
                "Final results that reused the speculative tags",
            )?,
            fresh_inferences: counter(
                &registry,
                "meow_fresh_inferences",
                "Synchronous tag inferences run at finalize",
            )?,
            speculative_timeouts: counter(
                &registry,
                "meow_speculative_timeouts",
                "Finalize waits that hit the speculative timeout",
            )?,
            stale_results_dropped: counter(
                &registry,
                "meow_speculative_stale_dropped",
                "Speculative results discarded as stale or cancelled",
            )?,
            collaborator_errors: counter(
                &registry,
                "meow_collaborator_errors",
                "Failed transcription or inference calls",
            )?,
            active_sessions,
            registry,
        })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
