//! The world version counts structural changes of the running program (for example, class
//! loading that invalidates assumptions of a compilation in flight).

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.  Compiler workers snapshot it right before releasing
/// the tier lock for a compilation, and backends compare the snapshot with
/// [`WorldVersion::current`] before installing code.
#[derive(Debug, Default)]
pub struct WorldVersion {
    version: AtomicU64,
}

impl WorldVersion {
    pub const fn new() -> Self {
        Self {
            version: AtomicU64::new(0),
        }
    }

    pub fn current(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Record a structural change.  Returns the new version.
    pub fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_is_monotonic() {
        let world = WorldVersion::new();
        let before = world.current();
        assert_eq!(world.bump(), before + 1);
        assert_eq!(world.bump(), before + 2);
        assert_eq!(world.current(), before + 2);
    }

    #[test]
    fn concurrent_bumps_are_not_lost() {
        let world = WorldVersion::new();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..1000 {
                        world.bump();
                    }
                });
            }
        });
        assert_eq!(world.current(), 4000);
    }
}
