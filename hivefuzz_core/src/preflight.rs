/// Minimum number of open file descriptors the fuzzer wants available.
/// Each worker holds the feedback fd plus per-iteration target pipes.
const WANTED_NOFILE: libc::rlim_t = 1024;

/// Raises the soft `RLIMIT_NOFILE` limit to [`WANTED_NOFILE`], bounded by
/// the hard limit.
///
/// Never fatal: if the hard limit is too low, or the syscalls themselves
/// fail, the fuzzer logs a warning and runs degraded.
pub fn raise_nofile_limit() {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: rlim is a valid out-pointer for getrlimit.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) } == -1 {
        log::warn!(
            "getrlimit(RLIMIT_NOFILE) failed: {}",
            std::io::Error::last_os_error()
        );
        return;
    }
    if rlim.rlim_cur >= WANTED_NOFILE {
        return;
    }
    if rlim.rlim_max < WANTED_NOFILE {
        log::warn!(
            "RLIMIT_NOFILE hard limit < {} ({}). Expect troubles!",
            WANTED_NOFILE,
            rlim.rlim_max
        );
        return;
    }

    rlim.rlim_cur = WANTED_NOFILE.min(rlim.rlim_max);
    // SAFETY: rlim holds cur <= max, both validated above.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) } == -1 {
        log::warn!(
            "setrlimit(RLIMIT_NOFILE, cur={}/max={}) failed: {}",
            rlim.rlim_cur,
            rlim.rlim_max,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_nofile() -> (libc::rlim_t, libc::rlim_t) {
        let mut rlim = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: valid out-pointer.
        assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) }, 0);
        (rlim.rlim_cur, rlim.rlim_max)
    }

    #[test]
    fn preflight_never_lowers_and_reaches_target_when_allowed() {
        let (before_cur, before_max) = current_nofile();
        raise_nofile_limit();
        let (after_cur, _) = current_nofile();

        assert!(after_cur >= before_cur, "soft limit must never go down");
        if before_max >= WANTED_NOFILE {
            assert!(after_cur >= WANTED_NOFILE.min(before_max));
        } else {
            // Degraded path: nothing changed, only a warning was logged.
            assert_eq!(after_cur, before_cur);
        }
    }

    #[test]
    fn preflight_is_idempotent() {
        raise_nofile_limit();
        let (first_cur, _) = current_nofile();
        raise_nofile_limit();
        let (second_cur, _) = current_nofile();
        assert_eq!(first_cur, second_cur);
    }
}
