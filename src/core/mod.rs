//! Transaction context read by evaluations.
//!
//! - `Transaction`: inputs, outputs, version and locktime visible to introspection
//! - `sighash`: BCH signing serialization used by signature-checking opcodes

pub mod sighash;
pub mod transaction;
