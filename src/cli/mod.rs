//! Claude CLI invocation: arguments, environment, spawning and output decoding.

mod args;
mod error;
mod events;
mod process;
mod runner;
mod stream;

pub use args::*;
pub use error::*;
pub use events::*;
pub use process::*;
pub use runner::*;
pub use stream::{KillReason, StreamEvent, StreamHandle, StreamOutput};
