//! Drives the scheduler through the public API with a small binding of its own, using real
//! compiler threads.

use jit_broker::compile_manager;
use jit_broker::vm::{CompileEnv, CompileFailure, Compiler, JitBinding, ProgramUnit};
use jit_broker::{EntryKind, Jit, JitBuilder, Tier};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct TestVM;

impl JitBinding for TestVM {
    type Unit = Method;

    fn is_low_on_memory(_threshold: usize) -> bool {
        false
    }

    fn has_thread_headroom(_margin: usize) -> bool {
        true
    }

    fn is_code_store_full() -> bool {
        false
    }
}

#[derive(Clone)]
struct Method(Arc<MethodInfo>);

struct MethodInfo {
    name: String,
    size: usize,
    installed: Mutex<HashSet<(Tier, EntryKind)>>,
    not_compilable: Mutex<HashSet<Tier>>,
}

impl Method {
    fn new(name: String, size: usize) -> Self {
        Method(Arc::new(MethodInfo {
            name,
            size,
            installed: Mutex::new(HashSet::new()),
            not_compilable: Mutex::new(HashSet::new()),
        }))
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Method {}

impl std::fmt::Debug for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Method({})", self.0.name)
    }
}

impl ProgramUnit for Method {
    fn name(&self) -> String {
        self.0.name.clone()
    }
    fn code_size(&self) -> usize {
        self.0.size
    }
    fn invocation_count(&self) -> u64 {
        1
    }
    fn backedge_count(&self) -> u64 {
        1000
    }
    fn breakpoint_count(&self) -> usize {
        0
    }
    fn is_abstract(&self) -> bool {
        false
    }
    fn is_native(&self) -> bool {
        false
    }
    fn has_installed_code(&self, tier: Tier, entry: EntryKind) -> bool {
        self.0.installed.lock().unwrap().contains(&(tier, entry))
    }
    fn is_compilable(&self, tier: Tier) -> bool {
        !self.0.not_compilable.lock().unwrap().contains(&tier)
    }
    fn set_not_compilable(&self, tier: Tier) {
        self.0.not_compilable.lock().unwrap().insert(tier);
    }
}

/// Records compile ids and installs code after a short delay.
#[derive(Clone, Default)]
struct SlowCompiler {
    ids: Arc<Mutex<Vec<u32>>>,
}

impl Compiler<TestVM> for SlowCompiler {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn compile(&self, env: &CompileEnv<'_, TestVM>) -> Result<(), CompileFailure> {
        std::thread::sleep(Duration::from_micros(200));
        self.ids.lock().unwrap().push(env.compile_id());
        if !env.is_stale() {
            env.unit()
                .0
                .installed
                .lock()
                .unwrap()
                .insert((env.tier(), env.entry()));
        }
        Ok(())
    }
}

fn wait_until<F: Fn() -> bool>(millis: u64, cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_millis(millis);
    while !cond() {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

fn init(options: &str) -> (Box<Jit<TestVM>>, SlowCompiler, SlowCompiler) {
    let mut builder = JitBuilder::new_no_env_vars();
    assert!(compile_manager::process_bulk(&mut builder, options));
    let baseline = SlowCompiler::default();
    let optimizing = SlowCompiler::default();
    let jit = compile_manager::jit_init::<TestVM>(
        &builder,
        vec![
            (Tier::Baseline, Box::new(baseline.clone()) as Box<dyn Compiler<TestVM>>),
            (Tier::Optimizing, Box::new(optimizing.clone()) as Box<dyn Compiler<TestVM>>),
        ],
    );
    (jit, baseline, optimizing)
}

#[test]
fn many_producers_two_tiers() {
    let (jit, baseline, optimizing) = init("baseline_max_workers=2 optimizing_max_workers=3");
    let methods: Vec<Method> = (0..64)
        .map(|i| Method::new(format!("M.m{}", i), 10 + i % 7))
        .collect();

    std::thread::scope(|scope| {
        for chunk in methods.chunks(16) {
            let jit: &Jit<TestVM> = &jit;
            scope.spawn(move || {
                for method in chunk {
                    // Submit twice to exercise deduplication.
                    for _ in 0..2 {
                        compile_manager::submit_compile(
                            jit,
                            Tier::Baseline,
                            method,
                            method,
                            EntryKind::Normal,
                        );
                        compile_manager::submit_compile(
                            jit,
                            Tier::Optimizing,
                            method,
                            method,
                            EntryKind::OnStackReplacement(4),
                        );
                    }
                }
            });
        }
    });

    assert!(wait_until(10_000, || methods.iter().all(|m| {
        m.has_installed_code(Tier::Baseline, EntryKind::Normal)
            && m.has_installed_code(Tier::Optimizing, EntryKind::OnStackReplacement(4))
    })));

    // Compile ids are shared by the tiers and never reused.
    let mut ids: Vec<u32> = baseline.ids.lock().unwrap().clone();
    ids.extend(optimizing.ids.lock().unwrap().iter());
    let unique: HashSet<u32> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len());

    let snapshot = compile_manager::compile_queue_snapshot(&*jit, 10);
    let baseline_snapshot = snapshot.tier(Tier::Baseline).unwrap();
    assert!(baseline_snapshot.active_workers <= 2);
    assert!(snapshot.tier(Tier::Optimizing).unwrap().active_workers <= 3);

    compile_manager::shutdown(&*jit);
    assert!(wait_until(10_000, || {
        compile_manager::compile_queue_snapshot(&*jit, 0)
            .tiers
            .iter()
            .all(|t| t.active_workers == 0)
    }));
}

#[test]
fn disabled_tier_ignores_requests() {
    let mut builder = JitBuilder::new_no_env_vars();
    assert!(compile_manager::process(&mut builder, "optimizing_background", "false"));
    assert!(!compile_manager::process(&mut builder, "optimizing_max_workers", "0"));
    let jit = compile_manager::jit_init::<TestVM>(
        &builder,
        vec![(
            Tier::Optimizing,
            Box::new(SlowCompiler::default()) as Box<dyn Compiler<TestVM>>,
        )],
    );
    assert!(compile_manager::is_compilation_disabled(&*jit, Tier::Baseline));
    assert!(!compile_manager::is_compilation_disabled(&*jit, Tier::Optimizing));

    let method = Method::new("M.m".to_string(), 10);
    compile_manager::submit_compile(&*jit, Tier::Baseline, &method, &method, EntryKind::Normal);
    assert!(!method.has_installed_code(Tier::Baseline, EntryKind::Normal));

    // A foreground tier returns only after the code is installed.
    compile_manager::submit_compile(&*jit, Tier::Optimizing, &method, &method, EntryKind::Normal);
    assert!(method.has_installed_code(Tier::Optimizing, EntryKind::Normal));
    compile_manager::shutdown(&*jit);
}

#[test]
fn pause_and_world_version() {
    let (jit, _, _) = init("");
    compile_manager::set_should_block(&*jit);
    assert!(jit.should_block());
    compile_manager::clear_should_block(&*jit);
    assert!(!jit.should_block());

    let before = jit.world_version();
    assert_eq!(compile_manager::notify_world_changed(&*jit), before + 1);
    compile_manager::shutdown(&*jit);
}
