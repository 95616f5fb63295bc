//! # Finloop Core Library
//!
//! Confidence-gated saga orchestration for financial workflows: the confidence gate,
//! compensation ledger, review signalling, and the built-in workflow definitions.

pub mod error;
pub mod models;
pub mod services;
pub mod workflow;

pub use error::WorkflowError;
