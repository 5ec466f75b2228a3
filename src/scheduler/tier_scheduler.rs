use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use enum_map::Enum;

use super::request::{CompileRequest, EntryKind};
use super::request_queue::RequestQueue;
use super::stat::{TierSnapshot, TierStat};
use super::worker::CompilerWorker;
use super::worker_pool::{ResourceProbe, WorkerPoolController};
use crate::util::options::Options;
use crate::util::world_version::WorldVersion;
use crate::util::SafepointFlag;
use crate::vm::{
    CompileEnv, Compiler, CompilerThreadContext, JitBinding, ProgramUnit, RetryPolicy,
};

/// An optimization tier.  Each tier has its own backend, queue and workers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum)]
pub enum Tier {
    /// The fast, lightly optimizing tier.
    Baseline,
    /// The slow, heavily optimizing tier.
    Optimizing,
}

impl Tier {
    /// The number used in thread names and log lines.
    pub fn id(&self) -> usize {
        match self {
            Tier::Baseline => 1,
            Tier::Optimizing => 2,
        }
    }
}

/// The part of a tier protected by the tier lock.
struct TierSync<U: ProgramUnit> {
    queue: RequestQueue<U>,
    pool: WorkerPoolController,
    stat: TierStat,
}

/// Resource queries of the binding, with the thresholds from the options.
struct BindingProbe<'a, VM: JitBinding> {
    options: &'a Options,
    phantom: PhantomData<VM>,
}

impl<VM: JitBinding> ResourceProbe for BindingProbe<'_, VM> {
    fn is_low_on_memory(&self) -> bool {
        VM::is_low_on_memory(self.options.low_memory_threshold)
    }

    fn has_thread_headroom(&self) -> bool {
        VM::has_thread_headroom(self.options.thread_headroom)
    }
}

/// How a compilation ended, as seen by the worker.
enum CompileOutcome {
    /// The code store was full, so the backend was not called.
    Skipped,
    Compiled(Duration),
    Failed(Duration),
}

/// What a queued request means for a new submission.
enum Duplicate<U: ProgramUnit> {
    /// Nothing queued serves the submission.
    None,
    /// The queued request serves the submission.
    Reuse(Arc<CompileRequest<U>>),
    /// A normal compilation is queued and the unit is not loopy enough for OSR.
    DenyOsr,
}

/// The scheduler of one tier.
///
/// Producers call [`TierScheduler::submit`] and compiler workers run
/// [`TierScheduler::run_worker_loop`].  Both sides synchronize on one mutex and one condition
/// variable.  The condition variable is notified when a request is queued, when a request is
/// done, and on shutdown.
pub struct TierScheduler<VM: JitBinding> {
    tier: Tier,
    compiler: Box<dyn Compiler<VM>>,
    sync: Mutex<TierSync<VM::Unit>>,
    queue_changed: Condvar,
    options: Arc<Options>,
    /// The last compile id handed out.  Shared by all tiers of a `Jit`.
    compile_ids: Arc<AtomicU32>,
    world: Arc<WorldVersion>,
    safepoint: Arc<SafepointFlag>,
    /// Set once the code store has been found full.  Never cleared.
    compilation_disabled: AtomicBool,
    shutdown: AtomicBool,
}

impl<VM: JitBinding> TierScheduler<VM> {
    pub(crate) fn new(
        tier: Tier,
        compiler: Box<dyn Compiler<VM>>,
        options: Arc<Options>,
        compile_ids: Arc<AtomicU32>,
        world: Arc<WorldVersion>,
        safepoint: Arc<SafepointFlag>,
    ) -> Self {
        let pool = WorkerPoolController::new(options.max_workers(tier), options.compile_the_world);
        Self {
            tier,
            compiler,
            sync: Mutex::new(TierSync {
                queue: RequestQueue::new(),
                pool,
                stat: TierStat::default(),
            }),
            queue_changed: Condvar::new(),
            options,
            compile_ids,
            world,
            safepoint,
            compilation_disabled: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn compiler_name(&self) -> &'static str {
        self.compiler.name()
    }

    /// Return true once the code store has been found full.  The tier does not compile anything
    /// after that.
    pub fn is_compilation_disabled(&self) -> bool {
        self.compilation_disabled.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn probe(&self) -> BindingProbe<'_, VM> {
        BindingProbe {
            options: &self.options,
            phantom: PhantomData,
        }
    }

    /// The priority of a request for `unit`, triggered by `hot`.  Smaller is more urgent.
    fn score(unit: &VM::Unit, hot: &VM::Unit) -> u32 {
        let mut size = unit.code_size();
        if hot != unit {
            size = size.saturating_add(hot.code_size());
        }
        u32::try_from(size).unwrap_or(u32::MAX).max(1)
    }

    /// Nothing to do: either the code is there already, or the tier is not compiling.
    fn is_compiled_or_disabled(&self, unit: &VM::Unit, entry: EntryKind) -> bool {
        unit.has_installed_code(self.tier, entry) || self.is_compilation_disabled()
    }

    /// Return false if `unit` may not be compiled at `entry` by this tier.  Units that can never
    /// be compiled are marked so.
    fn is_eligible(&self, unit: &VM::Unit, entry: EntryKind) -> bool {
        if VM::is_excluded(unit, self.tier)
            || unit.is_abstract()
            || unit.is_native()
            || unit.breakpoint_count() > 0
        {
            debug!("{:?} tier: {} is not compilable", self.tier, unit.name());
            unit.set_not_compilable(self.tier);
            return false;
        }
        if !unit.is_compilable(self.tier) {
            return false;
        }
        if entry.is_osr() && !(self.options.compile_osr && self.compiler.supports_osr()) {
            trace!("{:?} tier: OSR of {} is not enabled", self.tier, unit.name());
            return false;
        }
        true
    }

    /// Request compilation of `unit` at `entry`.  `hot` is the unit whose counters triggered the
    /// request, which may be `unit` itself.
    ///
    /// Returns when the request is queued or found redundant.  If the tier is not a background
    /// tier, waits until the request is done (or the tier stops compiling).  Never fails: a
    /// request that cannot be served is dropped, and the caller keeps running `unit` as is.
    pub fn submit(self: &Arc<Self>, unit: &VM::Unit, hot: &VM::Unit, entry: EntryKind) {
        if self.is_compiled_or_disabled(unit, entry) || !self.is_eligible(unit, entry) {
            return;
        }
        if VM::current_thread_holds_hazard_lock() {
            debug!(
                "{:?} tier: not compiling {} while holding a hazard lock",
                self.tier,
                unit.name()
            );
            return;
        }

        if self.compiler.requires_setup() {
            let queued = {
                let sync = self.sync.lock().unwrap();
                sync.queue.find_duplicate(unit, entry).is_some()
            };
            if !queued {
                if let Err(e) = self.compiler.prepare(unit) {
                    debug!("{:?} tier: {}: {}", self.tier, unit.name(), e);
                    unit.set_not_compilable(self.tier);
                    return;
                }
            }
        }

        let score = Self::score(unit, hot);
        let mut sync = self.sync.lock().unwrap();
        let (depth, threads) = (sync.queue.total_count(), sync.pool.active_workers());
        sync.stat.probe(depth, threads);

        // The code may have been installed while we were not holding the lock.
        if self.is_compiled_or_disabled(unit, entry) {
            return;
        }

        let request = match self.find_usable_duplicate(&sync, unit, entry) {
            Duplicate::DenyOsr => return,
            Duplicate::Reuse(request) => {
                request.lower_score(score);
                trace!("{:?} tier: already queued: {}", self.tier, request);
                if self.options.is_background(self.tier) {
                    return;
                }
                request
            }
            Duplicate::None => {
                let Some(request) = self.enqueue(&mut sync, unit, entry, score) else {
                    return;
                };
                let (guard, retired) = self.maybe_spawn_worker(sync, &request);
                sync = guard;
                if retired || self.options.is_background(self.tier) {
                    return;
                }
                request
            }
        };

        if sync.pool.active_workers() == 0 {
            // Nobody would ever wake us up.
            return;
        }
        self.wait_for(sync, &request);
    }

    /// Look for a request that makes a new one redundant.
    fn find_usable_duplicate(
        &self,
        sync: &TierSync<VM::Unit>,
        unit: &VM::Unit,
        entry: EntryKind,
    ) -> Duplicate<VM::Unit> {
        let Some(request) = sync.queue.find_duplicate(unit, entry) else {
            return Duplicate::None;
        };
        if request.entry() == entry {
            return Duplicate::Reuse(request.clone());
        }
        // A normal compilation of the unit is queued.  Unless the unit spends most of its time
        // in loops, the normal compilation will serve it soon enough.
        debug_assert!(entry.is_osr());
        let invocations = unit.invocation_count();
        let backedges = unit.backedge_count();
        if invocations.saturating_mul(self.options.osr_backedge_ratio) > backedges {
            trace!(
                "{:?} tier: OSR of {} denied, invocations: {}, back-edges: {}",
                self.tier,
                unit.name(),
                invocations,
                backedges
            );
            Duplicate::DenyOsr
        } else {
            Duplicate::None
        }
    }

    /// Create a request and put it in the queue.  Returns `None` if the compile id is out of the
    /// configured range.
    fn enqueue(
        &self,
        sync: &mut TierSync<VM::Unit>,
        unit: &VM::Unit,
        entry: EntryKind,
        score: u32,
    ) -> Option<Arc<CompileRequest<VM::Unit>>> {
        let id = self.compile_ids.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        if !self.options.effective_id_range().contains(id) {
            debug!(
                "{:?} tier: compile id {} of {} is out of range",
                self.tier,
                id,
                unit.name()
            );
            unit.set_not_compilable(self.tier);
            return None;
        }
        let request = Arc::new(CompileRequest::new(id, unit.clone(), entry, score));
        sync.queue.insert(request.clone());
        sync.stat.requests_total += 1;
        trace!("{:?} tier: queued {}", self.tier, request);
        if self.options.print_compile_queue {
            info!("{:?} compile queue:", self.tier);
            for queued in sync.queue.iter() {
                info!("{}", queued);
            }
        }
        Some(request)
    }

    /// Create a worker if the pool needs one, otherwise wake up the idle workers.
    ///
    /// The lock is released while the thread is being created.  Meanwhile, `request` is kept
    /// alive by counting the caller as a waiter.  Returns the re-acquired guard and whether
    /// `request` has been retired.
    fn maybe_spawn_worker<'a>(
        self: &'a Arc<Self>,
        mut sync: MutexGuard<'a, TierSync<VM::Unit>>,
        request: &Arc<CompileRequest<VM::Unit>>,
    ) -> (MutexGuard<'a, TierSync<VM::Unit>>, bool) {
        // Memory may have run low while every worker was busy compiling.
        self.check_degrade(&mut sync);
        let pending = sync.queue.pending_count();
        if !sync.pool.should_spawn(pending, &self.probe()) {
            self.queue_changed.notify_all();
            return (sync, false);
        }

        let ordinal = sync.pool.reserve_worker();
        request.add_waiter();
        drop(sync);

        let worker = Box::new(CompilerWorker::new(ordinal, self.clone()));
        let result = VM::spawn_compiler_thread(CompilerThreadContext::Worker(worker));

        let mut sync = self.sync.lock().unwrap();
        request.remove_waiter();
        match result {
            Ok(()) => {
                sync.stat.workers_created += 1;
                if self.options.print_compile_queue {
                    info!(
                        "{:?} tier: added worker {} ({} active)",
                        self.tier,
                        ordinal,
                        sync.pool.active_workers()
                    );
                } else {
                    debug!("{:?} tier: added worker {}", self.tier, ordinal);
                }
            }
            Err(e) => {
                warn!(
                    "{:?} tier: failed to create compiler worker {}: {}",
                    self.tier, ordinal, e
                );
                sync.pool.rollback_worker(ordinal);
                sync.stat.worker_creation_failures += 1;
                self.queue_changed.notify_all();
            }
        }

        let retired = request.is_unused();
        if retired {
            self.retire(&mut sync, request);
        }
        (sync, retired)
    }

    /// Block until `request` is done, the tier stops compiling, or shutdown.
    fn wait_for(
        &self,
        mut sync: MutexGuard<'_, TierSync<VM::Unit>>,
        request: &Arc<CompileRequest<VM::Unit>>,
    ) {
        let timeout = Duration::from_millis(self.options.waiter_timeout_ms);
        request.add_waiter();
        while !request.is_done() && !self.is_compilation_disabled() && !self.is_shut_down() {
            let (guard, _) = self.queue_changed.wait_timeout(sync, timeout).unwrap();
            sync = guard;
            if !request.is_done() {
                sync.stat.producer_spurious_wakeups += 1;
            }
        }
        request.remove_waiter();
        if request.is_unused() {
            self.retire(&mut sync, request);
        }
    }

    /// Release a request that is done and has nobody waiting for it.
    fn retire(&self, sync: &mut TierSync<VM::Unit>, request: &CompileRequest<VM::Unit>) {
        let first = request.retire();
        debug_assert!(first, "{} retired twice", request);
        sync.stat.requests_retired += 1;
        trace!("{:?} tier: retired {}", self.tier, request);
    }

    /// Query memory and update the degraded mode.  Returns true if the pool is degraded.
    fn check_degrade(&self, sync: &mut TierSync<VM::Unit>) -> bool {
        let was_degraded = sync.pool.is_degraded();
        let degraded = sync.pool.should_degrade(&self.probe());
        if degraded != was_degraded {
            let action = if degraded { "entering" } else { "leaving" };
            if self.options.print_compile_queue {
                info!("{:?} tier: {} single worker mode", self.tier, action);
            } else {
                debug!("{:?} tier: {} single worker mode", self.tier, action);
            }
        }
        degraded
    }

    fn select_next(&self, sync: &TierSync<VM::Unit>) -> Option<Arc<CompileRequest<VM::Unit>>> {
        if self.is_compilation_disabled() {
            return None;
        }
        sync.queue
            .select_next(self.options.compile_the_world)
            .cloned()
    }

    /// Whether the worker `ordinal` must leave its loop now.
    fn should_exit(&self, sync: &mut TierSync<VM::Unit>, ordinal: usize) -> bool {
        if self.is_shut_down() {
            return true;
        }
        self.check_degrade(sync) && sync.pool.should_exit_for_memory(ordinal)
    }

    /// The body of compiler worker `ordinal`.  Returns when the worker exits.
    pub fn run_worker_loop(&self, ordinal: usize) {
        let idle_timeout = Duration::from_millis(self.options.worker_idle_timeout_ms);
        let mut sync = self.sync.lock().unwrap();
        let mut last_active = Instant::now();
        trace!("{:?} tier: worker {} started", self.tier, ordinal);

        loop {
            if self.safepoint.is_requested() {
                sync.stat.safepoint_polls += 1;
                trace!("{:?} tier: worker {} saw a pause request", self.tier, ordinal);
            }
            if self.should_exit(&mut sync, ordinal) {
                break;
            }

            let Some(request) = self.select_next(&sync) else {
                let remaining = idle_timeout.saturating_sub(last_active.elapsed());
                let (guard, _) = self.queue_changed.wait_timeout(sync, remaining).unwrap();
                sync = guard;
                if self.should_exit(&mut sync, ordinal) {
                    break;
                }
                if self.select_next(&sync).is_some() {
                    continue;
                }
                sync.stat.consumer_spurious_wakeups += 1;
                if last_active.elapsed() >= idle_timeout {
                    if sync.pool.should_self_terminate(ordinal, true) {
                        break;
                    }
                    last_active = Instant::now();
                }
                continue;
            };

            request.set_in_progress();
            sync.pool.worker_busy();
            let world_version = self.world.current();
            drop(sync);

            let outcome = self.compile_request(&request, world_version);

            sync = self.sync.lock().unwrap();
            request.set_done();
            let removed = sync.queue.remove(&request);
            debug_assert!(removed);
            if request.waiters() == 0 {
                self.retire(&mut sync, &request);
            }
            if request.waiters() > 0 || self.is_compilation_disabled() {
                self.queue_changed.notify_all();
            }
            sync.pool.worker_idle();
            match outcome {
                CompileOutcome::Skipped => {}
                CompileOutcome::Compiled(time) => {
                    sync.stat.compilations += 1;
                    sync.stat.compile_time += time;
                }
                CompileOutcome::Failed(time) => {
                    sync.stat.failed_compilations += 1;
                    sync.stat.compile_time += time;
                }
            }
            last_active = Instant::now();
        }

        sync.pool.worker_exited(ordinal);
        if self.options.print_compile_queue {
            info!(
                "{:?} tier: removed worker {} ({} active)",
                self.tier,
                ordinal,
                sync.pool.active_workers()
            );
        } else {
            debug!("{:?} tier: worker {} exited", self.tier, ordinal);
        }
    }

    /// Compile one request.  Called without holding the lock.
    fn compile_request(
        &self,
        request: &CompileRequest<VM::Unit>,
        world_version: u64,
    ) -> CompileOutcome {
        if self.safepoint.is_requested() {
            VM::block_for_safepoint();
        }
        if VM::is_code_store_full() {
            self.disable_compilation();
            return CompileOutcome::Skipped;
        }

        let unit = request.unit();
        if self.options.print_compilation {
            let osr_marker = if request.entry().is_osr() { '%' } else { ' ' };
            let bci = match request.entry() {
                EntryKind::OnStackReplacement(bci) => format!(" @ {}", bci),
                EntryKind::Normal => String::new(),
            };
            info!(
                "{:4} {} {} {}{} ({} bytes)",
                request.id(),
                osr_marker,
                self.tier.id(),
                unit.name(),
                bci,
                unit.code_size()
            );
        }

        let mut env = CompileEnv {
            compile_id: request.id(),
            tier: self.tier,
            unit,
            entry: request.entry(),
            retrying: false,
            world_version,
            world: &self.world,
            safepoint: &self.safepoint,
        };
        let start = Instant::now();
        let mut result = self.compiler.compile(&env);
        if let Err(failure) = &result {
            if failure.retry == RetryPolicy::Immediately {
                debug!("{:?} tier: retrying {}: {}", self.tier, request, failure);
                env.retrying = true;
                result = self.compiler.compile(&env);
            }
        }
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(()) => CompileOutcome::Compiled(elapsed),
            Err(failure) => {
                if self.options.print_compilation {
                    info!("{:4}   COMPILE SKIPPED: {}", request.id(), failure.reason);
                }
                debug!("{:?} tier: failed {}: {}", self.tier, request, failure);
                // A unit gets one immediate retry, whatever the second failure asks for.
                if env.retrying || failure.retry != RetryPolicy::Later {
                    unit.set_not_compilable(self.tier);
                }
                CompileOutcome::Failed(elapsed)
            }
        };

        if VM::is_code_store_full() {
            self.disable_compilation();
        }
        outcome
    }

    /// Stop compiling in this tier because the code store is full.
    fn disable_compilation(&self) {
        if self.compilation_disabled.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(
            "{:?} tier: code store is full. Compiler has been disabled.",
            self.tier
        );
        if self.options.compile_the_world {
            VM::exit(0);
        } else if self.options.exit_on_full_code_store {
            VM::exit(1);
        }
    }

    /// Make idle workers exit and waiting producers return.  Workers finish the compilation
    /// they are running first.  Queued requests are abandoned.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _sync = self.sync.lock().unwrap();
        self.queue_changed.notify_all();
    }

    /// A copy of the state of this tier.  At most `limit` requests are listed in each of the
    /// in-progress and waiting lists.
    pub fn snapshot(&self, limit: usize) -> TierSnapshot {
        let sync = self.sync.lock().unwrap();
        let (in_progress, waiting) =
            TierSnapshot::collect_requests(sync.queue.iter().map(|r| r.as_ref()), limit);
        TierSnapshot {
            tier: self.tier,
            compiler: self.compiler.name(),
            active_workers: sync.pool.active_workers(),
            idle_workers: sync.pool.idle_workers(),
            max_workers: sync.pool.max_workers(),
            degraded: sync.pool.is_degraded(),
            compilation_disabled: self.is_compilation_disabled(),
            in_progress,
            waiting,
            stat: sync.stat.clone(),
        }
    }
}
