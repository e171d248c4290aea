//! Core type definitions shared across the VM and its tooling.
//!
//! - `Range`/`Position`: editor-style source coordinates
//! - `hash`: digest primitives consumed by hashing opcodes
//! - `encoding`: wire encoding for the transaction fields the VM commits to

pub mod encoding;
pub mod hash;
pub mod range;
