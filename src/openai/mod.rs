//! OpenAI-compatible request and response schema.

mod adapter;
mod types;

pub use adapter::*;
pub use types::*;
