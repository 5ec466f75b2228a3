use crate::scheduler::{CompilerWorker, Tier};
use crate::util::os;

use super::ProgramUnit;

/// Thread context for a spawned compiler thread.  It is passed to
/// [`JitBinding::spawn_compiler_thread`].
pub enum CompilerThreadContext<VM: JitBinding> {
    /// The thread to spawn is a compiler worker of a tier.
    Worker(Box<CompilerWorker<VM>>),
}

impl<VM: JitBinding> CompilerThreadContext<VM> {
    /// A human-readable thread name, e.g. `C2CompilerThread0`.
    pub fn thread_name(&self) -> String {
        match self {
            CompilerThreadContext::Worker(worker) => {
                format!("C{}CompilerThread{}", worker.tier().id(), worker.ordinal)
            }
        }
    }

    /// Run the thread body on the current thread.  Returns when the worker exits.
    pub fn run(self) {
        match self {
            CompilerThreadContext::Worker(worker) => {
                crate::compile_manager::start_compiler_worker(worker)
            }
        }
    }
}

/// The `JitBinding` trait associates a runtime with its program unit type, and provides the
/// process-wide services the scheduler calls into.  All methods are associated functions, so a
/// binding is usually a zero-sized type.
pub trait JitBinding
where
    Self: Sized + 'static + Send + Sync + Default,
{
    /// The runtime's handle to a compilable method.
    type Unit: ProgramUnit;

    /// Ask the runtime to create a thread for a compiler worker.  The new thread shall call
    /// [`CompilerThreadContext::run`] (or [`crate::compile_manager::start_compiler_worker`] with
    /// the boxed worker).
    ///
    /// The scheduler does not hold any tier lock while calling this, so the runtime may
    /// allocate or run arbitrary code here.  Returning an error is not fatal: the scheduler
    /// rolls back its worker counters and tries again on a later submission.
    ///
    /// The default implementation starts a named `std::thread`.
    fn spawn_compiler_thread(ctx: CompilerThreadContext<Self>) -> std::io::Result<()> {
        std::thread::Builder::new()
            .name(ctx.thread_name())
            .spawn(move || ctx.run())
            .map(|_| ())
    }

    /// Return true if the process can create another thread, keeping `margin` threads in
    /// reserve below the OS limit.
    fn has_thread_headroom(margin: usize) -> bool {
        os::thread::has_thread_headroom(margin)
    }

    /// Return true if less than `threshold` bytes of memory are available to the process.
    /// While this is true, each tier shrinks to a single compiler worker.
    fn is_low_on_memory(threshold: usize) -> bool {
        os::memory::is_low_on_memory(threshold)
    }

    /// Return true if the current thread holds a lock that creating a compiler thread or
    /// running a backend's setup step could deadlock against (for example, a lock the
    /// allocator may need).  Submissions from such a thread are skipped; the caller simply
    /// keeps running the unit in its fallback mode and may submit again later.
    fn current_thread_holds_hazard_lock() -> bool {
        false
    }

    /// The exclusion oracle.  Return true if `unit` must never be compiled by `tier`.
    fn is_excluded(_unit: &Self::Unit, _tier: Tier) -> bool {
        false
    }

    /// Return true if the code store is completely full.  Once this is observed by a worker,
    /// the whole tier stops compiling.
    fn is_code_store_full() -> bool;

    /// Called by compiler workers at convenient points when a global pause has been requested
    /// with [`crate::compile_manager::set_should_block`].  The tier lock is not held.  The
    /// runtime may block here until the pause is over.
    fn block_for_safepoint() {}

    /// Terminate the process.  Only used when the code store fills up while running with
    /// `compile_the_world` or `exit_on_full_code_store`.
    fn exit(code: i32) {
        std::process::exit(code)
    }
}
