pub mod instructions;
pub mod runtime;
pub mod tool;

pub use self::runtime::{AgentEvent, AgentOutcome, GenerationAgent};
