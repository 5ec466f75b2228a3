use crate::scheduler::{EntryKind, Tier};
use std::fmt::Debug;

/// A handle to a compilable program unit (a method) owned by the runtime.
///
/// Handles are cheap to clone and compare equal if and only if they refer to the same unit.
/// The scheduler keeps a clone in each request, so the runtime must keep the unit's metadata
/// alive while a handle exists.
pub trait ProgramUnit: Clone + Eq + Debug + Send + Sync + 'static {
    /// A human-readable name, e.g. `java.lang.String.hashCode`.  Only used for logging and
    /// snapshots.
    fn name(&self) -> String;

    /// The size of the unit's bytecode.  Smaller units are compiled sooner.
    fn code_size(&self) -> usize;

    /// How many times the unit has been invoked.
    fn invocation_count(&self) -> u64;

    /// How many loop back-edges the unit has taken.
    fn backedge_count(&self) -> u64;

    /// The number of active breakpoints in the unit.
    fn breakpoint_count(&self) -> usize;

    fn is_abstract(&self) -> bool;

    fn is_native(&self) -> bool;

    /// Return true if code compiled by `tier` is installed for `entry`.
    ///
    /// This is called without holding any lock and races with code installation.  It may
    /// return a stale `false`, but must never return `true` before the code is installed.
    fn has_installed_code(&self, tier: Tier, entry: EntryKind) -> bool;

    /// Return false if the unit has been marked not compilable for `tier`.
    fn is_compilable(&self, tier: Tier) -> bool;

    /// Permanently mark the unit as not compilable for `tier`.  Must be idempotent.
    fn set_not_compilable(&self, tier: Tier);
}
