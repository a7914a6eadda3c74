//! Test harness for zklock.
//!
//! An in-memory coordination ensemble implementing the `Coordinator` trait,
//! with session expiry, connection blips and injected faults, plus a
//! reference model of the lock queue.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation. Operations are
//! applied to both the model and the real lock over a [`MemoryEnsemble`],
//! and their observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod memory;
pub mod model;

pub use memory::{MemoryEnsemble, MemorySession, Op, SessionId};
pub use model::{
    ClientId, ModelWorld, ObservableState, Operation, OperationError, OperationResult,
};
