//! The public API for runtimes.
//!
//! A runtime typically uses the API like this:
//!
//! 1. Create a [`JitBuilder`] and set options with [`process`] or [`process_bulk`].
//! 2. Call [`jit_init`] with one [`Compiler`] per tier to get a [`Jit`] instance.
//! 3. Call [`submit_compile`] when a unit gets hot.  Compiler threads are created on demand
//!    through [`JitBinding::spawn_compiler_thread`]; each of them must call
//!    [`start_compiler_worker`].
//! 4. Around global pauses, call [`set_should_block`] and [`clear_should_block`].  When the
//!    program structure changes, call [`notify_world_changed`].

use crate::jit::{Jit, JitBuilder};
use crate::scheduler::{CompilerWorker, EntryKind, JitSnapshot, Tier};
use crate::vm::{Compiler, JitBinding};

/// Initialize a JIT scheduler instance.
///
/// This also tries to install the built-in logger (if the `builtin_env_logger` feature is
/// enabled).  It is not an error if the runtime has installed a logger already.
///
/// Arguments:
/// * `builder`: The builder holding the options.
/// * `compilers`: The backend of each enabled tier.
pub fn jit_init<VM: JitBinding>(
    builder: &JitBuilder,
    compilers: Vec<(Tier, Box<dyn Compiler<VM>>)>,
) -> Box<Jit<VM>> {
    match crate::util::logger::try_init() {
        Ok(_) => debug!("jit-broker initialized the logger."),
        Err(_) => debug!(
            "jit-broker failed to initialize the logger. Possibly a logger has been initialized by user."
        ),
    }
    let jit = builder.build(compilers);
    info!(
        "Initialized compilation with {} tier(s)",
        jit.snapshot(0).tiers.len()
    );
    Box::new(jit)
}

/// Process a run-time option.  Returns true if the option is processed successfully.
///
/// Arguments:
/// * `builder`: A reference to a builder.
/// * `name`: The name of the option.
/// * `value`: The value of the option (as a string).
pub fn process(builder: &mut JitBuilder, name: &str, value: &str) -> bool {
    builder.set_option(name, value)
}

/// Process multiple run-time options.  Returns true if all the options are processed
/// successfully.
///
/// Arguments:
/// * `builder`: A reference to a builder.
/// * `options`: Key value pairs separated by white spaces, e.g. `"compile_osr=false thread_headroom=4"`.
pub fn process_bulk(builder: &mut JitBuilder, options: &str) -> bool {
    builder.set_options_bulk_by_str(options)
}

/// Request compilation of `unit` by `tier`.
///
/// Arguments:
/// * `jit`: A reference to a `Jit` instance.
/// * `tier`: The tier to compile with.
/// * `unit`: The unit to compile.
/// * `hot`: The unit whose counters overflowed.  It is `unit` itself unless `unit` is compiled
///   because it is called from a hot unit.
/// * `entry`: Where the compiled code will be entered.
pub fn submit_compile<VM: JitBinding>(
    jit: &Jit<VM>,
    tier: Tier,
    unit: &VM::Unit,
    hot: &VM::Unit,
    entry: EntryKind,
) {
    jit.submit(tier, unit, hot, entry)
}

/// The entry point of a compiler thread.  The runtime calls this on the thread it created in
/// [`JitBinding::spawn_compiler_thread`].  Returns when the worker exits.
pub fn start_compiler_worker<VM: JitBinding>(worker: Box<CompilerWorker<VM>>) {
    worker.run();
}

/// Request compiler workers to block at their next safepoint poll.
pub fn set_should_block<VM: JitBinding>(jit: &Jit<VM>) {
    jit.set_should_block();
}

/// End a pause requested with [`set_should_block`].
pub fn clear_should_block<VM: JitBinding>(jit: &Jit<VM>) {
    jit.clear_should_block();
}

/// Invalidate compilations that are running now.  Returns the new world version.
pub fn notify_world_changed<VM: JitBinding>(jit: &Jit<VM>) -> u64 {
    jit.notify_world_changed()
}

/// Return a snapshot of the compile queues, with at most `limit` requests in each list.
pub fn compile_queue_snapshot<VM: JitBinding>(jit: &Jit<VM>, limit: usize) -> JitSnapshot {
    jit.snapshot(limit)
}

/// Return true if `tier` no longer compiles anything.
pub fn is_compilation_disabled<VM: JitBinding>(jit: &Jit<VM>, tier: Tier) -> bool {
    jit.is_compilation_disabled(tier)
}

/// Stop all compiler workers once they finish their current compilation, and release waiting
/// producers.
pub fn shutdown<VM: JitBinding>(jit: &Jit<VM>) {
    jit.shutdown();
}
