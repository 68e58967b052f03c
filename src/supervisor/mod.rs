//! Supervisor module for session lifecycle, crash recovery and health.

mod breaker;
mod error;
mod health;
mod report;
mod response;
mod runner;
mod state;

pub use breaker::*;
pub use error::*;
pub use health::*;
pub use report::*;
pub use response::*;
pub use runner::*;
pub use state::*;
