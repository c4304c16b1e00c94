use crate::display;
use crate::preflight;
use crate::report;
use crate::session::Session;
use crate::worker::{WorkerBody, WorkerPool};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::SystemTime;
use thiserror::Error;

/// Signal number recorded by the handler; 0 means none pending.
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);
/// Set by the ALRM handler; the loop renders one display snapshot per tick.
static TICK_DUE: AtomicBool = AtomicBool::new(true);
/// Mirror of "shutdown has begun" readable from the async handler, which
/// cannot reach the `Arc<Session>`. Written only by the supervisor thread.
static TERMINATION_REQUESTED: AtomicBool = AtomicBool::new(false);
/// Mirror of "every worker joined", same rationale as above.
static POOL_DRAINED: AtomicBool = AtomicBool::new(false);

/// Why the supervisor loop stopped. All three are orderly exits (code 0);
/// hard aborts never return here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Signalled(i32),
    AllWorkersFinished,
    DeadlineReached,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("sigaction({0}) failed: {1}")]
    Sigaction(i32, String),

    #[error("pthread_sigmask failed: {0}")]
    SigMask(String),

    #[error("setitimer(ITIMER_REAL) failed: {0}")]
    Timer(String),

    #[error("Failed to spawn worker threads: {0}")]
    Spawn(#[from] std::io::Error),
}

/// What the ALRM handler should do. Factored out of the handler so the
/// decision is testable without installing process-wide signal state.
#[derive(Debug, PartialEq, Eq)]
enum AlarmAction {
    HardAbort,
    MarkTickDue,
}

fn alarm_action(termination_requested: bool, pool_drained: bool) -> AlarmAction {
    // Once shutdown has begun, a further alarm while workers still run means
    // they are not winding down; give up instead of hanging.
    if termination_requested && !pool_drained {
        AlarmAction::HardAbort
    } else {
        AlarmAction::MarkTickDue
    }
}

/// What a TERM/INT/QUIT delivery should do.
#[derive(Debug, PartialEq, Eq)]
enum InterruptAction {
    HardAbort,
    Record,
}

fn interrupt_action(already_pending: bool) -> InterruptAction {
    if already_pending {
        InterruptAction::HardAbort
    } else {
        InterruptAction::Record
    }
}

/// Async-signal-safe exit: one write(2) plus _exit(2), nothing else.
fn hard_abort(msg: &[u8]) -> ! {
    // SAFETY: write and _exit are async-signal-safe; the buffer outlives the
    // call and _exit never returns.
    unsafe {
        libc::write(libc::STDERR_FILENO, msg.as_ptr().cast(), msg.len());
        libc::_exit(1);
    }
}

extern "C" fn supervisor_signal_handler(sig: libc::c_int) {
    if sig == libc::SIGALRM {
        match alarm_action(
            TERMINATION_REQUESTED.load(Ordering::Relaxed),
            POOL_DRAINED.load(Ordering::Relaxed),
        ) {
            AlarmAction::HardAbort => hard_abort(b"Terminating forcefully\n"),
            AlarmAction::MarkTickDue => TICK_DUE.store(true, Ordering::Relaxed),
        }
        return;
    }

    match interrupt_action(PENDING_SIGNAL.load(Ordering::Relaxed) != 0) {
        InterruptAction::HardAbort => hard_abort(b"Repeated termination signal caught\n"),
        InterruptAction::Record => PENDING_SIGNAL.store(sig, Ordering::Relaxed),
    }
}

const SUPERVISOR_SIGNALS: [libc::c_int; 4] =
    [libc::SIGTERM, libc::SIGINT, libc::SIGQUIT, libc::SIGALRM];

/// Phase 1: block every signal the supervisor cares about, plus the ones
/// nobody should receive asynchronously, on the calling thread. Workers
/// spawned afterwards inherit the mask, so they are born fully blocked.
fn block_signals_pre_spawn() -> Result<(), SupervisorError> {
    let blocked = [
        libc::SIGTERM,
        libc::SIGINT,
        libc::SIGQUIT,
        libc::SIGALRM,
        libc::SIGPIPE,
        libc::SIGIO,
        libc::SIGCHLD,
    ];
    // SAFETY: set is initialized by sigemptyset before use; pthread_sigmask
    // with a valid set pointer has no other preconditions.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for sig in blocked {
            libc::sigaddset(&mut set, sig);
        }
        if libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) != 0 {
            return Err(SupervisorError::SigMask(
                std::io::Error::last_os_error().to_string(),
            ));
        }
    }
    Ok(())
}

/// Phase 2, after the workers exist: install the handler for the four
/// supervisor signals and unblock exactly those on this thread. PIPE, IO
/// and CHLD stay blocked everywhere; workers reap children via wait calls.
fn install_supervisor_handlers() -> Result<(), SupervisorError> {
    // SAFETY: sa is zeroed then fully initialized; the handler is an
    // extern "C" fn with the expected signature; sigaction/sigemptyset are
    // called with valid pointers throughout.
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction =
            supervisor_signal_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
        sa.sa_flags = 0;
        libc::sigemptyset(&mut sa.sa_mask);
        for sig in SUPERVISOR_SIGNALS {
            if libc::sigaction(sig, &sa, std::ptr::null_mut()) == -1 {
                return Err(SupervisorError::Sigaction(
                    sig,
                    std::io::Error::last_os_error().to_string(),
                ));
            }
        }

        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for sig in SUPERVISOR_SIGNALS {
            libc::sigaddset(&mut set, sig);
        }
        if libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut()) != 0 {
            return Err(SupervisorError::SigMask(
                std::io::Error::last_os_error().to_string(),
            ));
        }
    }
    Ok(())
}

/// Arms the recurring tick: first fire after 1 s, then every 200 ms.
/// Must run after `install_supervisor_handlers`, never before.
fn arm_tick_timer() -> Result<(), SupervisorError> {
    set_itimer(
        libc::timeval {
            tv_sec: 1,
            tv_usec: 0,
        },
        libc::timeval {
            tv_sec: 0,
            tv_usec: 1000 * 200,
        },
    )
}

fn disarm_tick_timer() {
    let zero = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let _ = set_itimer(zero, zero);
}

fn set_itimer(value: libc::timeval, interval: libc::timeval) -> Result<(), SupervisorError> {
    let timer = libc::itimerval {
        it_value: value,
        it_interval: interval,
    };
    // SAFETY: timer is a fully initialized itimerval on the stack.
    if unsafe { libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut()) } == -1 {
        return Err(SupervisorError::Timer(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

/// The exit decision for one wake-up, as a pure function.
///
/// Checked in this order: pending signal, drained pool, deadline. The
/// signal comes first so an interrupt always wins the tick it arrived in.
fn poll_exit_conditions(
    pending_signal: i32,
    threads_finished: usize,
    threads_max: usize,
    run_end_time: Option<SystemTime>,
    now: SystemTime,
) -> Option<ExitReason> {
    if pending_signal != 0 {
        return Some(ExitReason::Signalled(pending_signal));
    }
    if threads_finished >= threads_max {
        return Some(ExitReason::AllWorkersFinished);
    }
    if let Some(end) = run_end_time {
        if now > end {
            return Some(ExitReason::DeadlineReached);
        }
    }
    None
}

/// Human-readable signal name for the termination log line.
pub fn signal_name(sig: i32) -> &'static str {
    match sig {
        libc::SIGTERM => "Terminated",
        libc::SIGINT => "Interrupt",
        libc::SIGQUIT => "Quit",
        libc::SIGALRM => "Alarm clock",
        _ => "Unknown signal",
    }
}

/// Runs the whole supervised fuzzing session: preflight, two-phase signal
/// setup around the worker spawn, the tick-driven loop, then shutdown.
///
/// Returns the orderly exit reason; the only non-zero exits are the hard
/// aborts taken directly inside the signal handler.
pub fn run(session: Arc<Session>, body: Arc<dyn WorkerBody>) -> Result<ExitReason, SupervisorError> {
    PENDING_SIGNAL.store(0, Ordering::Relaxed);
    TICK_DUE.store(true, Ordering::Relaxed);
    TERMINATION_REQUESTED.store(false, Ordering::Relaxed);
    POOL_DRAINED.store(false, Ordering::Relaxed);

    preflight::raise_nofile_limit();

    block_signals_pre_spawn()?;
    let mut pool = WorkerPool::spawn(&session, body)?;
    install_supervisor_handlers()?;
    arm_tick_timer()?;

    log::info!(
        "Supervising {} worker(s), corpus of {} input(s)",
        session.threads.threads_max,
        session.corpus.len()
    );

    let reason = loop {
        if session.use_screen && TICK_DUE.swap(false, Ordering::Relaxed) {
            display::render(&session);
        }

        let pending = PENDING_SIGNAL.load(Ordering::Relaxed);
        if let Some(reason) = poll_exit_conditions(
            pending,
            session.threads_finished(),
            session.threads.threads_max,
            session.timing.run_end_time,
            SystemTime::now(),
        ) {
            match reason {
                ExitReason::Signalled(sig) => {
                    log::info!("Signal {} ({}) received, terminating", sig, signal_name(sig));
                }
                ExitReason::DeadlineReached => {
                    log::info!("Maximum run time reached, terminating");
                }
                ExitReason::AllWorkersFinished => {}
            }
            break reason;
        }

        // Sole wake source is signal delivery; no busy polling.
        // SAFETY: pause has no preconditions; it returns when a handler ran.
        unsafe {
            libc::pause();
        }
    };

    session.set_terminating();
    TERMINATION_REQUESTED.store(true, Ordering::Relaxed);
    pool.join();
    POOL_DRAINED.store(true, Ordering::Relaxed);
    disarm_tick_timer();

    if let Some(socket) = &session.socket {
        socket.cleanup();
    }
    report::write_run_report(&session, reason);

    // The feedback region, blacklist and symbol filters are owned by the
    // session and released when the final Arc drops in the caller.
    Ok(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    // The exit logic and handler decisions are tested as pure functions:
    // the test harness is multi-threaded, so installing handlers or arming
    // ITIMER_REAL here would race every other test in the binary.

    #[test]
    fn signal_beats_drain_beats_deadline() {
        let now = SystemTime::now();
        let past = now - Duration::from_secs(1);

        let reason = poll_exit_conditions(libc::SIGINT, 4, 4, Some(past), now);
        assert_eq!(reason, Some(ExitReason::Signalled(libc::SIGINT)));

        let reason = poll_exit_conditions(0, 4, 4, Some(past), now);
        assert_eq!(reason, Some(ExitReason::AllWorkersFinished));

        let reason = poll_exit_conditions(0, 3, 4, Some(past), now);
        assert_eq!(reason, Some(ExitReason::DeadlineReached));
    }

    #[test]
    fn no_exit_while_running_within_budget() {
        let now = SystemTime::now();
        let future = now + Duration::from_secs(60);
        assert_eq!(poll_exit_conditions(0, 0, 4, Some(future), now), None);
        assert_eq!(poll_exit_conditions(0, 3, 4, None, now), None);
    }

    #[test]
    fn deadline_equal_to_now_does_not_fire_but_after_does() {
        let now = SystemTime::now();
        assert_eq!(poll_exit_conditions(0, 0, 1, Some(now), now), None);
        let just_after = now + Duration::from_millis(1);
        assert_eq!(
            poll_exit_conditions(0, 0, 1, Some(now), just_after),
            Some(ExitReason::DeadlineReached)
        );
    }

    #[test]
    fn unlimited_run_never_reaches_deadline() {
        let far_future = SystemTime::now() + Duration::from_secs(86400);
        assert_eq!(poll_exit_conditions(0, 0, 1, None, far_future), None);
    }

    #[test]
    fn alarm_aborts_only_during_unfinished_shutdown() {
        assert_eq!(alarm_action(false, false), AlarmAction::MarkTickDue);
        assert_eq!(alarm_action(false, true), AlarmAction::MarkTickDue);
        assert_eq!(alarm_action(true, true), AlarmAction::MarkTickDue);
        assert_eq!(alarm_action(true, false), AlarmAction::HardAbort);
    }

    #[test]
    fn second_interrupt_is_a_hard_abort() {
        assert_eq!(interrupt_action(false), InterruptAction::Record);
        assert_eq!(interrupt_action(true), InterruptAction::HardAbort);
    }

    #[test]
    fn signal_names_match_termination_log() {
        assert_eq!(signal_name(libc::SIGINT), "Interrupt");
        assert_eq!(signal_name(libc::SIGTERM), "Terminated");
        assert_eq!(signal_name(libc::SIGQUIT), "Quit");
        assert_eq!(signal_name(libc::SIGALRM), "Alarm clock");
        assert_eq!(signal_name(999), "Unknown signal");
    }
}
