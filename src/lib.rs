//! Bitcoin Cash script virtual machine.
//!
//! Provides the instruction codec, a metered step-wise evaluator that records
//! full traces, and source mapping from traces back to the script text.

pub mod core;
pub mod crypto;
pub mod source_map;
pub mod types;
pub mod utils;
pub mod virtual_machine;
