//! CLI command handling

pub mod handlers;
pub mod workflow_handlers;
