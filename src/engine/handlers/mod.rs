//! Typed step handlers.
//!
//! One module per step type. Each handler turns a resolved input plus its
//! config into a [`StepOutput`](super::executor::StepOutput) or a typed
//! engine error; none of them touches persistence.

pub mod agent;
pub mod api;
pub mod branch;
pub mod data;
