//! `webprobe` crate (library surface).
//!
//! The primary entrypoint is the `webprobe` binary. This module re-exports the core types so
//! embedders do not need to depend on the internal crate layout.

pub use webprobe_core as core;
pub use webprobe_local as local;
