//! Core module - shared building blocks
//!
//! - Application configuration (`config`)
//! - Error taxonomy for the execution runtime (`error`)
//! - Source normalization (`dedent`)
//! - Archive helpers used by runtime provisioning (`utils`)

pub mod config;
pub mod dedent;
pub mod error;
pub mod utils;
