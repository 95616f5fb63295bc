//! Data models for finloop

pub mod configuration;
pub mod results;
pub mod workflow;

pub use configuration::*;
pub use results::*;
pub use workflow::*;
