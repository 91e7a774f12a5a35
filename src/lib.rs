//! Cached data services for GDB/MI debugger front ends.
//!
//! The crate sits between a debugger user interface and a GDB-compatible backend. It turns
//! asynchronous command/response traffic into cached, context-addressed services: memory,
//! registers, expressions and modules. Caches are invalidated by run-control events so stale
//! data is never served after the target resumes.

pub mod log;
pub mod service;
