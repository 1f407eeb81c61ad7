//! Erased box sandbox
//!
//! This crate wires the typeless core into a small command line tool that
//! writes a mixed stream of erased values and decodes it again.

pub mod config;
pub mod demo;
pub mod registry_init;

// Re-export main types
pub use config::Config;
