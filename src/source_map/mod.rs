//! Mapping evaluation traces back to source text.
//!
//! - [`ast`]: arena-indexed script tree with byte-accurate ranges
//! - [`compiler`]: the source front-end that builds it
//! - [`extract`]: pairs trace states with the nodes that produced them
//! - [`coverage`]: source ranges no executed sample covers

pub mod ast;
pub mod compiler;
pub mod coverage;
pub mod extract;
