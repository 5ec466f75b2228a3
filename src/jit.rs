use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use enum_map::EnumMap;

use crate::scheduler::{EntryKind, JitSnapshot, Tier, TierScheduler};
use crate::util::options::Options;
use crate::util::world_version::WorldVersion;
use crate::util::SafepointFlag;
use crate::vm::{Compiler, JitBinding, ProgramUnit};

/// Builds a [`Jit`] instance.  Options are read from environment variables when the builder is
/// created, and can be overridden with [`JitBuilder::set_option`] before building.
pub struct JitBuilder {
    pub options: Options,
}

impl JitBuilder {
    /// Create a builder with the default options, overridden by `JIT_*` environment variables.
    pub fn new() -> Self {
        JitBuilder {
            options: Options::default(),
        }
    }

    /// Create a builder with the default options, ignoring environment variables.
    pub fn new_no_env_vars() -> Self {
        JitBuilder {
            options: Options::new_default(),
        }
    }

    /// Set an option.  Returns false if the name is unknown or the value is invalid.
    pub fn set_option(&mut self, name: &str, val: &str) -> bool {
        self.options.set_from_str(name, val)
    }

    /// Set options from white-space separated `key=value` pairs.
    pub fn set_options_bulk_by_str(&mut self, options: &str) -> bool {
        self.options.set_bulk_from_str(options)
    }

    /// Build a `Jit` with the given backends.  A tier without a backend is disabled: requests
    /// for it are ignored.
    pub fn build<VM: JitBinding>(
        &self,
        compilers: Vec<(Tier, Box<dyn Compiler<VM>>)>,
    ) -> Jit<VM> {
        let options = Arc::new(self.options.clone());
        let compile_ids = Arc::new(AtomicU32::new(0));
        let world = Arc::new(WorldVersion::new());
        let safepoint = Arc::new(SafepointFlag::new());

        let mut tiers: EnumMap<Tier, Option<Arc<TierScheduler<VM>>>> = EnumMap::default();
        for (tier, compiler) in compilers {
            debug_assert!(tiers[tier].is_none(), "{:?} tier has two backends", tier);
            tiers[tier] = Some(Arc::new(TierScheduler::new(
                tier,
                compiler,
                options.clone(),
                compile_ids.clone(),
                world.clone(),
                safepoint.clone(),
            )));
        }

        Jit {
            options,
            tiers,
            world,
            safepoint,
        }
    }
}

impl Default for JitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A JIT compilation scheduler.  It owns one [`TierScheduler`] per enabled tier, and the
/// state shared by all tiers: compile ids, the world version and the pause flag.
pub struct Jit<VM: JitBinding> {
    options: Arc<Options>,
    tiers: EnumMap<Tier, Option<Arc<TierScheduler<VM>>>>,
    world: Arc<WorldVersion>,
    safepoint: Arc<SafepointFlag>,
}

impl<VM: JitBinding> Jit<VM> {
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The scheduler of `tier`, or `None` if the tier has no backend.
    pub fn tier(&self, tier: Tier) -> Option<&Arc<TierScheduler<VM>>> {
        self.tiers[tier].as_ref()
    }

    fn enabled_tiers(&self) -> impl Iterator<Item = &Arc<TierScheduler<VM>>> {
        self.tiers.values().flatten()
    }

    /// Request compilation of `unit` at `entry` by `tier`.  See [`TierScheduler::submit`].
    pub fn submit(&self, tier: Tier, unit: &VM::Unit, hot: &VM::Unit, entry: EntryKind) {
        match self.tier(tier) {
            Some(scheduler) => scheduler.submit(unit, hot, entry),
            None => trace!("{:?} tier is not enabled. Ignoring {}", tier, unit.name()),
        }
    }

    /// Return true if `tier` does not accept requests, because it has no backend or the code
    /// store has been found full.
    pub fn is_compilation_disabled(&self, tier: Tier) -> bool {
        self.tier(tier)
            .map_or(true, |scheduler| scheduler.is_compilation_disabled())
    }

    /// Ask compiler workers to call [`JitBinding::block_for_safepoint`] at their next poll.
    pub fn set_should_block(&self) {
        self.safepoint.request();
    }

    pub fn clear_should_block(&self) {
        self.safepoint.clear();
    }

    pub fn should_block(&self) -> bool {
        self.safepoint.is_requested()
    }

    /// Record that the program structure changed (e.g. a class was loaded), so compilations
    /// that started before now are stale.  Returns the new world version.
    pub fn notify_world_changed(&self) -> u64 {
        self.world.bump()
    }

    pub fn world_version(&self) -> u64 {
        self.world.current()
    }

    /// A copy of the state of all enabled tiers.  Each request list holds at most `limit`
    /// entries.
    pub fn snapshot(&self, limit: usize) -> JitSnapshot {
        JitSnapshot {
            tiers: self
                .enabled_tiers()
                .map(|scheduler| scheduler.snapshot(limit))
                .collect(),
        }
    }

    /// Shut down all tiers.  See [`TierScheduler::shutdown`].
    pub fn shutdown(&self) {
        for scheduler in self.enabled_tiers() {
            scheduler.shutdown();
        }
        info!("Compilation has been shut down");
    }
}
