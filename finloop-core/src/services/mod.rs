//! Collaborators, the decision store and logging helpers

pub mod business;
pub mod decision_store;
pub mod logging;
pub mod simulated;

pub use business::*;
pub use decision_store::*;
pub use simulated::*;
