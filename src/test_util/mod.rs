//! This module contains utilities that are useful for testing code based on HA nodes. They are
//!  used for testing the crate itself, but they are also exported for application testing: an
//!  application can run a complete cluster in a single process with them.

pub mod clock;
pub mod shell;

