//! Process-wide runtime control: admission gate and shutdown coordination.

mod gate;
mod shutdown;

pub use gate::*;
pub use shutdown::*;
