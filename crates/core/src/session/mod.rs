//! Survey session: the stage machine, prompt generation, and the orchestrator
//! that ties them to bus events.

pub mod orchestrator;
pub mod prompt;
pub mod state;

pub use orchestrator::{Orchestrator, Outbound};
pub use prompt::{LlmPrompts, PromptError, PromptGenerator, PromptRequest, PromptStage, TemplatePrompts};
pub use state::{Rejected, SessionState, Stage};
