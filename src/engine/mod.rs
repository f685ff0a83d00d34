//! Engine module - Python execution runtime
//!
//! - Interpreter seams and the shared handle (`interpreter`)
//! - CPython backend (`python`)
//! - Singleton construction (`client`)
//! - Bootstrap script host (`page`)
//! - Page-wide lifecycle and run lock (`provider`)
//! - Per-block execution (`harness`)

pub mod client;
pub mod harness;
pub mod interpreter;
pub mod page;
pub mod provider;
pub mod python;

#[cfg(test)]
pub mod testing;
