use std::sync::Arc;

use super::{Tier, TierScheduler};
use crate::vm::JitBinding;

/// A compiler worker.  It is created by a producer of its tier, moved to a new thread, and
/// runs until the tier no longer needs it.
pub struct CompilerWorker<VM: JitBinding> {
    /// Identifies the worker within its tier.  Ordinals of exited workers are reused.
    pub ordinal: usize,
    scheduler: Arc<TierScheduler<VM>>,
}

impl<VM: JitBinding> CompilerWorker<VM> {
    pub(crate) fn new(ordinal: usize, scheduler: Arc<TierScheduler<VM>>) -> Self {
        Self { ordinal, scheduler }
    }

    pub fn tier(&self) -> Tier {
        self.scheduler.tier()
    }

    /// Run the worker loop on the current thread.
    pub fn run(self: Box<Self>) {
        debug!(
            "{:?} tier: worker {} running {}",
            self.tier(),
            self.ordinal,
            self.scheduler.compiler_name()
        );
        self.scheduler.run_worker_loop(self.ordinal);
    }
}
