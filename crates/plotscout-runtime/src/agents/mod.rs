//! Pipeline stages.
//!
//! Each stage turns upstream data into prompts and validates what comes
//! back. The driver owns the calls so stages stay free of I/O.

mod advisor;
mod analyst;
mod collector;
mod driver;
pub mod parsing;
pub mod prompts;
mod traits;

pub use advisor::{AdvisorStage, ADVISOR_TASK_KEY};
pub use analyst::AnalystStage;
pub use collector::CollectorStage;
pub use driver::run_stage;
pub use parsing::{extract_json, validate_output, SchemaValidationError};
pub use traits::{AgentStage, PromptTask, StageError, StageId, StageInput};
