//! session-core: the streaming session coordinator
//!
//! One [`StreamingSession`] per client connection. Audio frames accumulate in
//! a buffer that is re-transcribed as a whole on a fixed cadence; once the
//! partial transcript carries enough content a speculative tag inference runs
//! in the background. On `stop` the final transcript either reuses those tags
//! or triggers a fresh inference, and the best matching corpus sample is
//! returned to the client.

mod state;
pub use state::SessionState;

mod error;
pub use error::{Result, SessionError, Stage};

mod config;
pub use config::{DaemonConfig, SessionConfig};

pub mod buffer;
pub use buffer::{AudioBuffer, PushOutcome};

mod protocol;
pub use protocol::{ClientMessage, Inbound, SelectedSample, ServerMessage, TranslationResult};

mod metrics;
pub use metrics::SessionMetrics;

mod session;
pub use session::{run_session, Flow, SessionDeps, StreamingSession};
