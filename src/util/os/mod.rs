//! Queries about the host operating system.  These are the default implementations of the
//! resource probes in [`crate::vm::JitBinding`].

pub mod memory;
pub mod thread;
