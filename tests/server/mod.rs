//! HTTP tests against a live listener backed by fake `claude` scripts.

mod http_test;
