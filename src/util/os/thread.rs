//! Thread-count queries used before creating more compiler workers.

/// The number of threads in the current process, if the OS tells us.
pub fn process_thread_count() -> Option<usize> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            let status = std::fs::read_to_string("/proc/self/status").ok()?;
            status
                .lines()
                .find_map(|line| line.strip_prefix("Threads:"))
                .and_then(|count| count.trim().parse::<usize>().ok())
        } else {
            None
        }
    }
}

/// The soft `RLIMIT_NPROC` limit, or `None` if unlimited or unknown.
///
/// Linux counts every thread of the user against this limit, not only the threads of this
/// process, so comparing it with [`process_thread_count`] is a rough estimate of headroom: it
/// is an upper bound that a busy user may hit earlier.
pub fn thread_limit() -> Option<usize> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            let mut rlim = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            // SAFETY: `rlim` is a valid, writable `rlimit`.
            let result = unsafe { libc::getrlimit(libc::RLIMIT_NPROC, &mut rlim) };
            if result != 0 || rlim.rlim_cur == libc::RLIM_INFINITY {
                None
            } else {
                Some(rlim.rlim_cur as usize)
            }
        } else {
            None
        }
    }
}

/// Return true if another thread can be created while keeping `margin` threads in reserve.
/// If either the thread count or the limit is unknown, assume there is headroom.
pub fn has_thread_headroom(margin: usize) -> bool {
    match (process_thread_count(), thread_limit()) {
        (Some(count), Some(limit)) => count.saturating_add(margin) < limit,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn counts_at_least_the_current_thread() {
        let count = process_thread_count().unwrap();
        assert!(count >= 1);
    }

    #[test]
    fn huge_margin_has_no_headroom_under_a_limit() {
        if thread_limit().is_some() && process_thread_count().is_some() {
            assert!(!has_thread_headroom(usize::MAX));
        } else {
            assert!(has_thread_headroom(usize::MAX));
        }
    }
}
