//! The interface a runtime implements to use jit-broker.
//!
//! jit-broker never looks inside program units, never generates code and never creates threads
//! on its own.  Those are provided by the runtime:
//!
//! -   [`JitBinding`] is implemented once per runtime.  It is a type-level bundle of the
//!     process-wide services the scheduler needs: spawning compiler threads, probing memory
//!     and thread limits, the code store, the exclusion oracle and safepoints.
//! -   [`ProgramUnit`] is implemented by the runtime's handle to a method.
//! -   [`Compiler`] is implemented by each optimizing backend.  A [`crate::Jit`] instance owns
//!     one backend per tier.

mod compiler;
mod unit;
mod vmbinding;

pub use self::compiler::{CompileEnv, CompileFailure, Compiler, RetryPolicy, SetupError};
pub use self::unit::ProgramUnit;
pub use self::vmbinding::{CompilerThreadContext, JitBinding};
