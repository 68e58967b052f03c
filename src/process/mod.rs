//! Assistant process spawning and stream plumbing.

mod pump;
mod spawn;

pub use pump::*;
pub use spawn::*;
