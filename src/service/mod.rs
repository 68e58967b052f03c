//! Service surface: the operations exposed to callers, quick-start
//! workflows and the JSON-line request channel used by `serve`.

mod ops;
mod protocol;
mod server;
mod workflow;

pub use ops::*;
pub use protocol::*;
pub use server::*;
pub use workflow::*;
