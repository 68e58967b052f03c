//! Output filtering for the assistant's text streams.
//!
//! The assistant has no framing on its output, so the filter decides three
//! things per line: whether it is startup noise, whether it is the idle
//! prompt, and what the line looks like with terminal escapes removed.

mod output;
mod patterns;

pub use output::*;
pub use patterns::*;
