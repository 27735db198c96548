//! CLI runner tests against fake `claude` scripts.

mod runner_test;
mod stream_test;
