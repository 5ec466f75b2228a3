//! A mock runtime for testing the scheduler without a real one.
//!
//! The binding is backed by a global [`MockEnv`], so tests that use [`MockVM`] must run through
//! [`with_mock_env`], which runs them one at a time and resets the environment.

use crate::scheduler::{EntryKind, Tier};
use crate::vm::{
    CompileEnv, CompileFailure, Compiler, CompilerThreadContext, JitBinding, ProgramUnit,
    SetupError,
};

use enum_map::EnumMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

lazy_static! {
    // The mutex may get poisoned any time. Accessing this mutex needs to deal with the poisoned case.
    // One can use read/write_mock_env to access the mock environment.
    static ref MOCK_ENV: Mutex<MockEnv> = Mutex::new(MockEnv::default());
}

/// The state of the mock runtime seen by [`MockVM`].
#[derive(Clone, Debug)]
pub struct MockEnv {
    pub low_on_memory: bool,
    pub thread_headroom: bool,
    pub hazard_lock: bool,
    pub code_store_full: bool,
    pub spawn_fails: bool,
    /// Compiler threads created.
    pub spawned: usize,
    /// Calls to `block_for_safepoint`.
    pub safepoint_blocks: usize,
    /// Exit codes passed to `exit`.  The mock does not terminate the process.
    pub exits: Vec<i32>,
}

impl Default for MockEnv {
    fn default() -> Self {
        Self {
            low_on_memory: false,
            thread_headroom: true,
            hazard_lock: false,
            code_store_full: false,
            spawn_fails: false,
            spawned: 0,
            safepoint_blocks: 0,
            exits: vec![],
        }
    }
}

pub fn read_mock_env<F, R>(func: F) -> R
where
    F: FnOnce(&MockEnv) -> R,
{
    let lock = MOCK_ENV
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    func(&lock)
}

pub fn write_mock_env<F, R>(func: F) -> R
where
    F: FnOnce(&mut MockEnv) -> R,
{
    let mut lock = MOCK_ENV
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    func(&mut lock)
}

pub fn with_mock_env<S, T, C>(setup: S, test: T, cleanup: C)
where
    S: FnOnce() -> MockEnv,
    T: FnOnce() + std::panic::UnwindSafe,
    C: FnOnce(),
{
    super::serial_test(|| {
        // Setup
        {
            write_mock_env(|env| *env = setup());
        }
        super::with_cleanup(test, cleanup);
    })
}

pub fn default_setup() -> MockEnv {
    MockEnv::default()
}

pub fn no_cleanup() {}

#[derive(Default)]
pub struct MockVM;

impl JitBinding for MockVM {
    type Unit = MockUnit;

    fn spawn_compiler_thread(ctx: CompilerThreadContext<Self>) -> std::io::Result<()> {
        if read_mock_env(|env| env.spawn_fails) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock thread creation failure",
            ));
        }
        write_mock_env(|env| env.spawned += 1);
        std::thread::Builder::new()
            .name(ctx.thread_name())
            .spawn(move || ctx.run())
            .map(|_| ())
    }

    fn has_thread_headroom(_margin: usize) -> bool {
        read_mock_env(|env| env.thread_headroom)
    }

    fn is_low_on_memory(_threshold: usize) -> bool {
        read_mock_env(|env| env.low_on_memory)
    }

    fn current_thread_holds_hazard_lock() -> bool {
        read_mock_env(|env| env.hazard_lock)
    }

    fn is_excluded(unit: &MockUnit, _tier: Tier) -> bool {
        unit.inner.excluded.load(Ordering::SeqCst)
    }

    fn is_code_store_full() -> bool {
        read_mock_env(|env| env.code_store_full)
    }

    fn block_for_safepoint() {
        write_mock_env(|env| env.safepoint_blocks += 1);
    }

    fn exit(code: i32) {
        write_mock_env(|env| env.exits.push(code));
    }
}

/// A method of the mock runtime.  Clones refer to the same method.
#[derive(Clone)]
pub struct MockUnit {
    inner: Arc<MockUnitInner>,
}

struct MockUnitInner {
    name: String,
    size: usize,
    invocations: AtomicU64,
    backedges: AtomicU64,
    breakpoints: AtomicUsize,
    is_abstract: AtomicBool,
    is_native: AtomicBool,
    excluded: AtomicBool,
    installed: Mutex<Vec<(Tier, EntryKind)>>,
    not_compilable: EnumMap<Tier, AtomicBool>,
}

impl MockUnit {
    pub fn new(name: &str, size: usize) -> Self {
        Self {
            inner: Arc::new(MockUnitInner {
                name: name.to_string(),
                size,
                invocations: AtomicU64::new(0),
                backedges: AtomicU64::new(0),
                breakpoints: AtomicUsize::new(0),
                is_abstract: AtomicBool::new(false),
                is_native: AtomicBool::new(false),
                excluded: AtomicBool::new(false),
                installed: Mutex::new(vec![]),
                not_compilable: EnumMap::default(),
            }),
        }
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn set_counts(&self, invocations: u64, backedges: u64) {
        self.inner.invocations.store(invocations, Ordering::SeqCst);
        self.inner.backedges.store(backedges, Ordering::SeqCst);
    }

    pub fn set_breakpoints(&self, count: usize) {
        self.inner.breakpoints.store(count, Ordering::SeqCst);
    }

    pub fn set_abstract(&self) {
        self.inner.is_abstract.store(true, Ordering::SeqCst);
    }

    pub fn set_native(&self) {
        self.inner.is_native.store(true, Ordering::SeqCst);
    }

    pub fn set_excluded(&self) {
        self.inner.excluded.store(true, Ordering::SeqCst);
    }

    pub fn install(&self, tier: Tier, entry: EntryKind) {
        let mut installed = self.inner.installed.lock().unwrap();
        if !installed.contains(&(tier, entry)) {
            installed.push((tier, entry));
        }
    }
}

impl PartialEq for MockUnit {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for MockUnit {}

impl fmt::Debug for MockUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MockUnit").field(&self.inner.name).finish()
    }
}

impl ProgramUnit for MockUnit {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn code_size(&self) -> usize {
        self.inner.size
    }

    fn invocation_count(&self) -> u64 {
        self.inner.invocations.load(Ordering::SeqCst)
    }

    fn backedge_count(&self) -> u64 {
        self.inner.backedges.load(Ordering::SeqCst)
    }

    fn breakpoint_count(&self) -> usize {
        self.inner.breakpoints.load(Ordering::SeqCst)
    }

    fn is_abstract(&self) -> bool {
        self.inner.is_abstract.load(Ordering::SeqCst)
    }

    fn is_native(&self) -> bool {
        self.inner.is_native.load(Ordering::SeqCst)
    }

    fn has_installed_code(&self, tier: Tier, entry: EntryKind) -> bool {
        self.inner.installed.lock().unwrap().contains(&(tier, entry))
    }

    fn is_compilable(&self, tier: Tier) -> bool {
        !self.inner.not_compilable[tier].load(Ordering::SeqCst)
    }

    fn set_not_compilable(&self, tier: Tier) {
        self.inner.not_compilable[tier].store(true, Ordering::SeqCst);
    }
}

/// One call of [`MockCompiler::compile`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileAttempt {
    pub compile_id: u32,
    pub unit: String,
    pub entry: EntryKind,
    pub retrying: bool,
    pub stale: bool,
}

/// What a [`MockCompiler`] was asked to do.  Shared with the test after the compiler has been
/// moved into the scheduler.
#[derive(Default)]
pub struct CompileLog {
    attempts: Mutex<Vec<CompileAttempt>>,
    setups: AtomicUsize,
}

impl CompileLog {
    pub fn attempts(&self) -> Vec<CompileAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn compile_ids(&self) -> Vec<u32> {
        self.attempts().iter().map(|a| a.compile_id).collect()
    }

    pub fn count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }
}

pub type MockCompileFn =
    Box<dyn Fn(&CompileEnv<'_, MockVM>) -> Result<(), CompileFailure> + Send + Sync>;
pub type MockSetupFn = Box<dyn Fn(&MockUnit) -> Result<(), SetupError> + Send + Sync>;

/// A backend that records its calls, runs a test-provided closure, and installs code for the
/// requests the closure accepts (unless the compilation went stale).
pub struct MockCompiler {
    name: &'static str,
    supports_osr: bool,
    setup: Option<MockSetupFn>,
    compile: MockCompileFn,
    log: Arc<CompileLog>,
}

impl MockCompiler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            supports_osr: true,
            setup: None,
            compile: Box::new(|_| Ok(())),
            log: Arc::new(CompileLog::default()),
        }
    }

    pub fn with_compile<F>(mut self, f: F) -> Self
    where
        F: Fn(&CompileEnv<'_, MockVM>) -> Result<(), CompileFailure> + Send + Sync + 'static,
    {
        self.compile = Box::new(f);
        self
    }

    pub fn with_setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&MockUnit) -> Result<(), SetupError> + Send + Sync + 'static,
    {
        self.setup = Some(Box::new(f));
        self
    }

    pub fn without_osr(mut self) -> Self {
        self.supports_osr = false;
        self
    }

    pub fn log(&self) -> Arc<CompileLog> {
        self.log.clone()
    }
}

impl Compiler<MockVM> for MockCompiler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supports_osr(&self) -> bool {
        self.supports_osr
    }

    fn requires_setup(&self) -> bool {
        self.setup.is_some()
    }

    fn prepare(&self, unit: &MockUnit) -> Result<(), SetupError> {
        self.log.setups.fetch_add(1, Ordering::SeqCst);
        match &self.setup {
            Some(setup) => setup(unit),
            None => Ok(()),
        }
    }

    fn compile(&self, env: &CompileEnv<'_, MockVM>) -> Result<(), CompileFailure> {
        let result = (self.compile)(env);
        let stale = env.is_stale();
        self.log.attempts.lock().unwrap().push(CompileAttempt {
            compile_id: env.compile_id(),
            unit: env.unit().name(),
            entry: env.entry(),
            retrying: env.is_retrying(),
            stale,
        });
        if result.is_ok() && !stale {
            env.unit().install(env.tier(), env.entry());
        }
        result
    }
}
