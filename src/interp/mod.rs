//! Front-of-house interpreters that bypass the code generator entirely.
//!
//! [`slow`] walks the raw source bytes directly (`-slow`, skips parsing
//! and the optimization pipeline); [`tree`] walks an already-optimized
//! IR tree (`-tree`). Both share the tape/data-pointer semantics the
//! back-ends compile down to, and exist partly as an oracle: for a
//! well-behaved program, every back-end and both interpreters must agree
//! on standard output for the same standard input (§8).

pub mod slow;
pub mod tree;
