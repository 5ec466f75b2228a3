//! Run-time options.
//!
//! Every option has a type, a validator and a default value.  Options are set, in order, from
//! the defaults, from environment variables with the prefix `JIT_` (e.g. `JIT_COMPILE_OSR=false`)
//! and from [`crate::compile_manager::process`] / [`crate::compile_manager::process_bulk`].
//! A value that cannot be parsed or fails validation is rejected with a warning, and the
//! previous value is kept.

use crate::scheduler::Tier;
use std::fmt;
use std::str::FromStr;

/// The prefix of environment variables that set options.
pub const ENV_VAR_PREFIX: &str = "JIT_";

/// The default threshold of available memory below which tiers shrink to a single worker.
pub const DEFAULT_LOW_MEMORY_THRESHOLD: usize = 100 << 20;

/// An inclusive range of compile ids, written as `start-stop`, e.g. `1-4294967295`.
///
/// Requests whose compile id falls outside the range are not compiled and their units are
/// marked not compilable.  Narrowing the range is a way to bisect a miscompilation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CompileIdRange {
    pub start: u32,
    pub stop: u32,
}

impl CompileIdRange {
    pub const FULL: CompileIdRange = CompileIdRange {
        start: 1,
        stop: u32::MAX,
    };

    pub fn contains(&self, id: u32) -> bool {
        self.start <= id && id <= self.stop
    }

    /// The overlap of two ranges.  An empty overlap is represented as a range with
    /// `start > stop`, which contains nothing.
    pub fn intersect(&self, other: &CompileIdRange) -> CompileIdRange {
        CompileIdRange {
            start: self.start.max(other.start),
            stop: self.stop.min(other.stop),
        }
    }

    fn is_valid(&self) -> bool {
        self.start >= 1 && self.start <= self.stop
    }
}

impl FromStr for CompileIdRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, stop) = s
            .split_once('-')
            .ok_or_else(|| String::from("Please supply start-stop"))?;
        let start = start
            .trim()
            .parse()
            .map_err(|_| String::from("Failed to parse start"))?;
        let stop = stop
            .trim()
            .parse()
            .map_err(|_| String::from("Failed to parse stop"))?;
        Ok(CompileIdRange { start, stop })
    }
}

impl fmt::Display for CompileIdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.stop)
    }
}

fn always_valid<T>(_: &T) -> bool {
    true
}

macro_rules! options {
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($(#[$outer])* $name: $type[$validator] = $default),*);
    ];
    ($($(#[$outer:meta])* $name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// Run-time options of a [`crate::Jit`] instance.
        #[derive(Clone, Debug)]
        pub struct Options {
            $($(#[$outer])* pub $name: $type),*
        }

        impl Options {
            /// Options with their default values, ignoring environment variables.
            pub fn new_default() -> Self {
                Options {
                    $($name: $default),*
                }
            }

            /// Set an option by its snake_case name.  Returns true if the name is known and the
            /// value is valid.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling process()) to the right type
                    $(stringify!($name) => if let Ok(val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(&val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val;
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. The previous value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cannot parse value. The previous value will be used.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option: {}", s);
                        false
                    }
                }
            }

            /// Set options from environment variables that start with [`ENV_VAR_PREFIX`] and
            /// match an option name, e.g. `JIT_WAITER_TIMEOUT_MS`.  Other variables are ignored.
            pub fn read_env_var_settings(&mut self) {
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(ENV_VAR_PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { self.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
            }
        }

        impl Default for Options {
            /// Default values, overridden by environment variables.
            fn default() -> Self {
                let mut options = Self::new_default();
                options.read_env_var_settings();
                options
            }
        }
    ]
}

options! {
    /// Maximum number of compiler workers of the baseline tier.
    baseline_max_workers:         usize          [|v: &usize| *v > 0] = num_cpus::get(),
    /// Maximum number of compiler workers of the optimizing tier.
    optimizing_max_workers:       usize          [|v: &usize| *v > 0] = num_cpus::get(),
    /// If true, producers of the baseline tier never wait for their requests.
    baseline_background:          bool           [always_valid] = true,
    /// If true, producers of the optimizing tier never wait for their requests.
    optimizing_background:        bool           [always_valid] = true,
    /// Allow on-stack-replacement compilations.
    compile_osr:                  bool           [always_valid] = true,
    /// Only compile requests whose compile id is in this inclusive range.
    compile_id_range:             CompileIdRange [CompileIdRange::is_valid] = CompileIdRange::FULL,
    /// Diagnostic mode that compiles everything in submission order and never shrinks the pools
    /// for low memory.
    compile_the_world:            bool           [always_valid] = false,
    /// Further restricts compile ids while `compile_the_world` is on.
    compile_the_world_id_range:   CompileIdRange [CompileIdRange::is_valid] = CompileIdRange::FULL,
    /// Terminate the process with status 1 when the code store becomes full.
    exit_on_full_code_store:      bool           [always_valid] = false,
    /// Tiers shrink to a single worker while less than this many bytes are available.
    low_memory_threshold:         usize          [always_valid] = DEFAULT_LOW_MEMORY_THRESHOLD,
    /// Threads kept in reserve below the OS thread limit when creating workers.
    thread_headroom:              usize          [always_valid] = 10,
    /// How long a worker waits for work after its last compilation before it may exit.
    worker_idle_timeout_ms:       u64            [|v: &u64| *v > 0] = 2000,
    /// How long a waiting producer sleeps before re-checking its request.
    waiter_timeout_ms:            u64            [|v: &u64| *v > 0] = 2000,
    /// An OSR request is denied in favour of a pending normal request for the same unit while
    /// `invocation_count * osr_backedge_ratio > backedge_count`.
    osr_backedge_ratio:           u64            [always_valid] = 50,
    /// Log one line for each compilation.
    print_compilation:            bool           [always_valid] = false,
    /// Log the compile queue when requests are added, and worker pool changes.
    print_compile_queue:          bool           [always_valid] = false,
}

impl Options {
    /// Set options from a string of white-space separated `key=value` pairs, e.g.
    /// `"compile_osr=false waiter_timeout_ms=20"`.  Returns true if all of them were set.
    pub fn set_bulk_from_str(&mut self, options: &str) -> bool {
        let mut all_set = true;
        for opt in options.split_ascii_whitespace() {
            match opt.split_once('=') {
                Some((key, val)) => all_set &= self.set_from_str(key, val),
                None => {
                    warn!("Option {:?} is not a key=value pair", opt);
                    all_set = false;
                }
            }
        }
        all_set
    }

    pub fn max_workers(&self, tier: Tier) -> usize {
        match tier {
            Tier::Baseline => self.baseline_max_workers,
            Tier::Optimizing => self.optimizing_max_workers,
        }
    }

    /// Whether producers of `tier` return right after submitting instead of waiting.
    pub fn is_background(&self, tier: Tier) -> bool {
        match tier {
            Tier::Baseline => self.baseline_background,
            Tier::Optimizing => self.optimizing_background,
        }
    }

    /// The compile ids that may be compiled, taking `compile_the_world` into account.
    pub fn effective_id_range(&self) -> CompileIdRange {
        if self.compile_the_world {
            self.compile_id_range
                .intersect(&self.compile_the_world_id_range)
        } else {
            self.compile_id_range
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{serial_test, with_cleanup};

    #[test]
    fn no_env_var() {
        serial_test(|| {
            let options = Options::default();
            assert_eq!(options.osr_backedge_ratio, 50);
            assert_eq!(options.compile_id_range, CompileIdRange::FULL);
            assert!(options.compile_osr);
        })
    }

    #[test]
    fn with_valid_env_var() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("JIT_WAITER_TIMEOUT_MS", "20");

                    let options = Options::default();
                    assert_eq!(options.waiter_timeout_ms, 20);
                },
                || {
                    std::env::remove_var("JIT_WAITER_TIMEOUT_MS");
                },
            )
        })
    }

    #[test]
    fn with_multiple_valid_env_vars() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("JIT_COMPILE_OSR", "false");
                    std::env::set_var("JIT_COMPILE_ID_RANGE", "10-20");

                    let options = Options::default();
                    assert!(!options.compile_osr);
                    assert_eq!(
                        options.compile_id_range,
                        CompileIdRange { start: 10, stop: 20 }
                    );
                },
                || {
                    std::env::remove_var("JIT_COMPILE_OSR");
                    std::env::remove_var("JIT_COMPILE_ID_RANGE");
                },
            )
        })
    }

    #[test]
    fn with_invalid_env_var_value() {
        serial_test(|| {
            with_cleanup(
                || {
                    // Zero fails validation, so the default is kept.
                    std::env::set_var("JIT_BASELINE_MAX_WORKERS", "0");
                    std::env::set_var("JIT_OSR_BACKEDGE_RATIO", "abc");

                    let options = Options::default();
                    assert_eq!(options.baseline_max_workers, num_cpus::get());
                    assert_eq!(options.osr_backedge_ratio, 50);
                },
                || {
                    std::env::remove_var("JIT_BASELINE_MAX_WORKERS");
                    std::env::remove_var("JIT_OSR_BACKEDGE_RATIO");
                },
            )
        })
    }

    #[test]
    fn new_default_ignores_env_vars() {
        serial_test(|| {
            with_cleanup(
                || {
                    std::env::set_var("JIT_COMPILE_OSR", "false");
                    let options = Options::new_default();
                    assert!(options.compile_osr);
                },
                || {
                    std::env::remove_var("JIT_COMPILE_OSR");
                },
            )
        })
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut options = Options::new_default();
        assert!(!options.set_from_str("no_such_option", "1"));
    }

    #[test]
    fn bulk_options() {
        let mut options = Options::new_default();
        assert!(options.set_bulk_from_str("optimizing_max_workers=3 optimizing_background=false"));
        assert_eq!(options.max_workers(Tier::Optimizing), 3);
        assert!(!options.is_background(Tier::Optimizing));
        assert!(options.is_background(Tier::Baseline));

        // One bad pair fails the whole call, but the good ones are still applied.
        assert!(!options.set_bulk_from_str("thread_headroom=4 compile_osr"));
        assert_eq!(options.thread_headroom, 4);
    }

    #[test]
    fn compile_id_range_parsing() {
        assert_eq!(
            "3-7".parse::<CompileIdRange>(),
            Ok(CompileIdRange { start: 3, stop: 7 })
        );
        assert!("7".parse::<CompileIdRange>().is_err());
        assert!("a-7".parse::<CompileIdRange>().is_err());

        let mut options = Options::new_default();
        // stop before start is rejected
        assert!(!options.set_from_str("compile_id_range", "7-3"));
        assert!(!options.set_from_str("compile_id_range", "0-3"));
        assert_eq!(options.compile_id_range, CompileIdRange::FULL);
    }

    #[test]
    fn effective_id_range_in_compile_the_world() {
        let mut options = Options::new_default();
        options.compile_id_range = CompileIdRange { start: 1, stop: 100 };
        options.compile_the_world_id_range = CompileIdRange { start: 50, stop: 200 };
        assert_eq!(options.effective_id_range(), options.compile_id_range);

        options.compile_the_world = true;
        let range = options.effective_id_range();
        assert!(!range.contains(49));
        assert!(range.contains(50));
        assert!(range.contains(100));
        assert!(!range.contains(101));
    }
}
