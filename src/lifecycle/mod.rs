// src/lifecycle/mod.rs

//! Process lifecycle: states, transitions and crash-recovery checkpoints.

pub mod checkpoint;
pub mod machine;
pub mod state;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore};
pub use machine::{StateChangeCallback, StateMachine};
pub use state::{AgentState, StateContext, TransitionRecord};
