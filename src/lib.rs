//! jit-broker schedules just-in-time compilation for managed-language runtimes.
//!
//! Application threads (producers) find that a program unit is hot and ask for it to be
//! compiled by one of the runtime's optimizing tiers.  Each tier owns a priority queue of
//! compilation requests and a small pool of compiler worker threads (consumers) that grows when
//! the queue backs up and shrinks back when the workers sit idle, or when the process runs low
//! on memory.  Producers may block until their request is compiled; the last party to see a
//! finished request retires it.
//!
//! The runtime plugs in through the [`vm::JitBinding`] trait (thread creation, memory and
//! code-store queries, safepoints), the [`vm::ProgramUnit`] trait (its method metadata) and one
//! [`vm::Compiler`] backend per tier.  A binding typically:
//!
//! 1. creates a [`JitBuilder`], adjusting options with [`compile_manager::process`],
//! 2. calls [`compile_manager::jit_init`] with the backends to get a [`Jit`] instance,
//! 3. calls [`compile_manager::submit_compile`] whenever a unit becomes hot, and
//! 4. runs [`compile_manager::start_compiler_worker`] on every thread it spawns for
//!    [`vm::JitBinding::spawn_compiler_thread`].

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

mod jit;
pub use jit::Jit;
pub use jit::JitBuilder;

pub mod compile_manager;
pub mod scheduler;
pub mod util;
pub mod vm;

pub use crate::scheduler::{EntryKind, Tier};
