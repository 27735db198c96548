//! Conversation id to CLI session mapping.

mod registry;

pub use registry::*;
