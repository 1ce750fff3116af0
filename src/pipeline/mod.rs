//! Rating update pipeline
//!
//! One change event flows through the adapter, the reader, the Elo calculator
//! and the writer, driven by the orchestrator which owns the retry and
//! dead-letter policy.

pub mod adapter;
pub mod orchestrator;
pub mod reader;
pub mod writer;

// Re-export commonly used types
pub use adapter::ChangeEventAdapter;
pub use orchestrator::{
    InvocationOutcome, InvocationState, Orchestrator, PipelineStats, PipelineStep,
};
pub use reader::PlayerScoreReader;
pub use writer::ScoreWriter;
