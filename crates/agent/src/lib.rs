//! The reply pipeline: from a chat message to a reconciled bot reply.
//!
//! For every accepted trigger the [`Responder`]:
//!
//! 1. **Filters** the event (own messages, broadcast mentions, unmentioned)
//! 2. **Acquires** the single-flight permit or drops the trigger
//! 3. **Collects** the conversation window (reply chain + recent history)
//! 4. **Builds** the stop set and **renders** the template-specific prompt
//! 5. **Runs** a generation session that polls the backend, posting the first
//!    usable text and editing it until the output stops changing

pub mod context;
pub mod flight;
pub mod postprocess;
pub mod responder;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{HistoryCollector, PromptRenderer, StopSet};
pub use flight::{FlightGate, FlightPermit};
pub use postprocess::{PostProcessor, Reply};
pub use responder::{IgnoreReason, Responder, TriggerOutcome};
pub use session::{
    CancellationFlag, GenerationSession, SessionController, SessionOutcome, SessionState, TickAction,
};
