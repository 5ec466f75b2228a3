//! Memory queries used to decide when compiler worker pools must shrink.

use std::sync::Mutex;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

lazy_static! {
    // sysinfo recommends sharing one instance of `System` instead of making multiple
    // instances.  We only load the memory component.  Loading all components (e.g. by using
    // `System::new_all()`) takes a long time, and workers query memory on every iteration.
    static ref SYSTEM: Mutex<System> = Mutex::new(System::new_with_specifics(
        RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
    ));
}

/// Get the total memory of the system in bytes.
pub fn get_system_total_memory() -> u64 {
    let sys = SYSTEM.lock().unwrap();
    sys.total_memory()
}

/// Get the memory that is currently available for new allocations, in bytes.
pub fn get_available_memory() -> u64 {
    let mut sys = SYSTEM.lock().unwrap();
    sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
    sys.available_memory()
}

/// Return true if less than `threshold` bytes are available.
pub fn is_low_on_memory(threshold: usize) -> bool {
    let available = get_available_memory();
    trace!("Available memory: {} bytes, threshold: {} bytes", available, threshold);
    available < threshold as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn available_memory_is_bounded_by_total() {
        let total = get_system_total_memory();
        let available = get_available_memory();
        assert!(total > 0);
        assert!(available <= total);
    }

    #[test]
    fn zero_threshold_is_never_low() {
        assert!(!is_low_on_memory(0));
    }
}
