use crate::session::Session;
use std::io::Write;
use std::time::Duration;

/// Builds the one-line status snapshot the supervisor prints each tick.
///
/// Rendering reads only atomics and startup-time fields, so a snapshot taken
/// mid-run is merely slightly stale, never torn.
pub fn status_line(session: &Session) -> String {
    let elapsed = session.timing.started_at.elapsed();
    let execs = session.stats.execs();
    let rate = execs_per_sec(execs, elapsed);
    let alive = session
        .threads
        .threads_max
        .saturating_sub(session.threads_finished());

    format!(
        "[{}] execs: {} ({:.0}/sec) | crashes: {} | corpus: {} (+{} new) | workers: {}/{}",
        format_elapsed(elapsed),
        execs,
        rate,
        session.stats.crashes(),
        session.corpus.len(),
        session.stats.unique_inputs(),
        alive,
        session.threads.threads_max,
    )
}

/// Prints the status snapshot in place, overwriting the previous one.
pub fn render(session: &Session) {
    let line = status_line(session);
    let mut out = std::io::stderr().lock();
    let _ = write!(out, "\r\x1b[K{line}");
    let _ = out.flush();
}

fn execs_per_sec(execs: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs < 0.001 {
        return 0.0;
    }
    execs as f64 / secs
}

fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FuzzerSettings, HivefuzzConfig, IoSettings};
    use tempfile::tempdir;

    fn test_session(dir: &std::path::Path) -> Session {
        let config = HivefuzzConfig {
            fuzzer: Some(FuzzerSettings {
                threads: 3,
                run_time_secs: 0,
                max_iterations: 0,
            }),
            io: IoSettings {
                corpus_dir: dir.to_path_buf(),
                work_dir: dir.to_path_buf(),
                crash_dir: None,
            },
            mutate: None,
            feedback: None,
            display: None,
            socket: None,
            symbols: None,
        };
        Session::from_config(&config).unwrap()
    }

    #[test]
    fn status_line_reflects_counters() {
        let dir = tempdir().unwrap();
        let session = test_session(dir.path());
        session.stats.note_exec();
        session.stats.note_exec();
        session.stats.note_crash();

        let line = status_line(&session);
        assert!(line.contains("execs: 2"), "{line}");
        assert!(line.contains("crashes: 1"), "{line}");
        assert!(line.contains("workers: 3/3"), "{line}");
    }

    #[test]
    fn status_line_tracks_finished_workers() {
        let dir = tempdir().unwrap();
        let session = test_session(dir.path());
        session.worker_finished();

        let line = status_line(&session);
        assert!(line.contains("workers: 2/3"), "{line}");
    }

    #[test]
    fn elapsed_formats_as_hms() {
        assert_eq!(format_elapsed(Duration::from_secs(0)), "00:00:00");
        assert_eq!(format_elapsed(Duration::from_secs(61)), "00:01:01");
        assert_eq!(format_elapsed(Duration::from_secs(3723)), "01:02:03");
    }

    #[test]
    fn rate_is_zero_for_instant_runs() {
        assert_eq!(execs_per_sec(1000, Duration::ZERO), 0.0);
        assert!(execs_per_sec(1000, Duration::from_secs(2)) > 499.0);
    }
}
