//! Scheduling of compilation requests.  Each tier has a [`TierScheduler`] with its own
//! request queue and compiler workers.

mod request;
pub use request::{CompileRequest, EntryKind, RequestState};

mod request_queue;
pub use request_queue::RequestQueue;

mod stat;
pub use stat::{JitSnapshot, RequestInfo, TierSnapshot, TierStat};

mod tier_scheduler;
pub use tier_scheduler::{Tier, TierScheduler};

mod worker;
pub use worker::CompilerWorker;

mod worker_pool;
pub use worker_pool::{ResourceProbe, WorkerPoolController};
