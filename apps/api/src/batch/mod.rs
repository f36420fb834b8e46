pub mod handlers;
pub mod orchestrator;
pub mod prompts;

pub use orchestrator::{BatchError, BatchOrchestrator, OrchestratorSettings};
