//! Core types for the typeless erased box
//!
//! This crate provides an owning container that can hold a value of any type
//! while still supporting default construction, destruction and binary
//! serialization when, and only when, the held type supports them:
//! - `ErasedBox`: Move-only holder of zero or one value of any type
//! - `CapabilityRegistry`: Per-type table of the operations a box may perform
//! - `Erasable` / `erasable!`: How a type describes its capabilities
//! - `WriteBuffer` / `ReadBuffer`: The byte sink and source used for serialization

pub mod typed;
pub mod buffer;
pub mod adapter;
pub mod registry;
pub mod erased;

// Re-export main types for convenience
pub use typed::{DecodeError, ReadFromBuffer, Streamable, WriteToBuffer};
pub use buffer::{ReadBuffer, WriteBuffer};
pub use adapter::{Capabilities, Erasable};
pub use registry::{Capability, CapabilityEntry, CapabilityRegistry, TypeKey, EMPTY_TAG};
pub use erased::{ErasedBox, ReadError};
