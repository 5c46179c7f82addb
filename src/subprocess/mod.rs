//! Process abstraction layer used to spawn and supervise agent CLIs.
//!
//! The executor never touches [`tokio::process`] directly; it goes through
//! the [`agent::AgentSpawner`] trait so production runs spawn a real child
//! while tests drive a scripted [`agent::MockAgentSpawner`].

pub mod agent;
pub mod builder;
pub mod error;

pub use agent::{
    AgentSpawner, ExitOutcome, MockAgentScript, MockAgentSpawner, ProcessCommand, SpawnedAgent,
    TokioAgentSpawner,
};
pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
