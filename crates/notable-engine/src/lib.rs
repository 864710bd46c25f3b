//! Notable execution engine.
//!
//! Tool registry and dispatch, planning rules, the priority scheduler, the
//! note runner with its retry/escalation policy, and the `NoteSystem`
//! service that wires them together.

pub mod error;
pub mod llm;
pub mod rules;
pub mod runner;
pub mod scheduler;
pub mod system;
pub mod tool;

pub use error::{BoxError, RuleError, RunError, SchedulerError, SystemError, ToolError};
pub use llm::LanguageModel;
pub use rules::{Decision, Mutation, PlanningRule, RuleContext, RuleEngine, RulePhase};
pub use runner::{NoteRunner, RunOutcome};
pub use scheduler::Scheduler;
pub use system::{Bootstrap, NewTask, NoteSystem, NoteSystemBuilder};
pub use tool::{
    tool_fn, ApiToolConfig, AuthType, Dispatcher, HttpMethod, ToolBody, ToolDefinition,
    ToolImplementation, ToolRegistry, ToolType,
};
