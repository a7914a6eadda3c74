//! Reference model for model-based testing.
//!
//! The model is a plain arrival-ordered queue that captures WHO may hold the
//! lock without any coordination machinery. It serves as the oracle against
//! which the real lock, running over the in-memory ensemble, is verified.
//!
//! # Design Principles
//!
//! - Simplicity: The model should be obviously correct
//! - Deterministic: Same inputs produce same outputs

pub mod operation;
mod world;

pub use operation::{ClientId, Operation, OperationError, OperationResult};
pub use world::{ModelWorld, ObservableState};
