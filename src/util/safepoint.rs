use std::sync::atomic::{AtomicBool, Ordering};

/// Set by the runtime when it wants every thread to come to a global pause.  Compiler workers
/// poll it and call [`crate::vm::JitBinding::block_for_safepoint`] while not holding any tier
/// lock.  The flag itself never blocks.
#[derive(Debug, Default)]
pub struct SafepointFlag {
    requested: AtomicBool,
}

impl SafepointFlag {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
