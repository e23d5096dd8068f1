pub mod orchestrator;
pub mod poller;

pub use orchestrator::{
    CallbackOutcome, InitiateOutcome, InitiateRequest, OrchestratorError, OrchestratorSettings,
    RateQuote, TransactionOrchestrator,
};
pub use poller::{PollOutcome, StatusPoller};
