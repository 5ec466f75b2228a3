//! Utilities shared by the scheduler: options, logging, OS probes and small synchronization
//! primitives.

pub mod logger;
pub mod options;
pub mod os;
mod safepoint;
pub mod world_version;

#[cfg(any(test, feature = "mock_test"))]
pub mod test_util;

pub use self::safepoint::SafepointFlag;
