//! Test utilities for building evaluation contexts and signatures.
