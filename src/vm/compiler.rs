use std::fmt;

use crate::scheduler::{EntryKind, Tier};
use crate::util::world_version::WorldVersion;
use crate::util::SafepointFlag;

use super::JitBinding;

/// An optimizing backend.  Each tier of a [`crate::Jit`] owns one.
///
/// `compile` is called by compiler workers without holding the tier lock.  A backend may be
/// called by several workers of the same tier at the same time.
pub trait Compiler<VM: JitBinding>: Send + Sync {
    /// The name of the backend, e.g. `"C2"`.
    fn name(&self) -> &'static str;

    /// Whether the backend can compile on-stack-replacement entries.
    fn supports_osr(&self) -> bool {
        true
    }

    /// Whether [`Compiler::prepare`] must run before the first request for a unit is queued.
    fn requires_setup(&self) -> bool {
        false
    }

    /// A one-time setup step (such as resolving constants embedded in the unit).  It runs on
    /// the producer thread without holding the tier lock.  On failure, the unit is marked not
    /// compilable for this tier.
    fn prepare(&self, _unit: &VM::Unit) -> Result<(), SetupError> {
        Ok(())
    }

    /// Compile and install code for `env.unit()` at `env.entry()`.
    ///
    /// Before installing, the backend must check [`CompileEnv::is_stale`] and discard the
    /// result if the program structure changed during the compilation.
    fn compile(&self, env: &CompileEnv<'_, VM>) -> Result<(), CompileFailure>;
}

/// Everything a backend gets to know about one compilation.
pub struct CompileEnv<'a, VM: JitBinding> {
    pub(crate) compile_id: u32,
    pub(crate) tier: Tier,
    pub(crate) unit: &'a VM::Unit,
    pub(crate) entry: EntryKind,
    pub(crate) retrying: bool,
    pub(crate) world_version: u64,
    pub(crate) world: &'a WorldVersion,
    pub(crate) safepoint: &'a SafepointFlag,
}

impl<VM: JitBinding> CompileEnv<'_, VM> {
    pub fn compile_id(&self) -> u32 {
        self.compile_id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn unit(&self) -> &VM::Unit {
        self.unit
    }

    pub fn entry(&self) -> EntryKind {
        self.entry
    }

    /// True if this is the immediate retry after a failure with [`RetryPolicy::Immediately`].
    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    /// The world version observed right before the tier lock was released for this
    /// compilation.
    pub fn world_version(&self) -> u64 {
        self.world_version
    }

    /// Return true if the program structure changed since the compilation started.  The
    /// result of a stale compilation must not be installed.
    pub fn is_stale(&self) -> bool {
        self.world.current() != self.world_version
    }

    /// Poll for a global pause.  Long-running backends should call this at convenient points.
    pub fn maybe_block(&self) {
        if self.safepoint.is_requested() {
            VM::block_for_safepoint();
        }
    }
}

/// What a worker should do after a failed compilation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum_macros::IntoStaticStr)]
pub enum RetryPolicy {
    /// Retry once right away (for example, after the backend turned off a speculative
    /// optimization).  A second failure makes the unit not compilable.
    Immediately,
    /// Give up for now.  The unit stays compilable and may be submitted again.
    Later,
    /// The unit can never be compiled by this backend.
    Never,
}

/// A failed compilation, reported by [`Compiler::compile`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileFailure {
    pub reason: String,
    pub retry: RetryPolicy,
}

impl CompileFailure {
    pub fn new(reason: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            reason: reason.into(),
            retry,
        }
    }
}

impl fmt::Display for CompileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retry: &'static str = self.retry.into();
        write!(f, "{} (retry: {})", self.reason, retry)
    }
}

/// A failed [`Compiler::prepare`] step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupError(pub String);

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "setup failed: {}", self.0)
    }
}
