//! Aider Supervisor - keeps an interactive aider session alive and scriptable.

pub mod config;
pub mod filter;
pub mod process;
pub mod service;
pub mod supervisor;
