use crate::config::HivefuzzConfig;
use crate::feedback::{FeedbackRegion, StackHashBlacklist};
use crate::input::{Dictionary, SeedCorpus, load_symbol_filter};
use crate::socket::SocketProvider;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};

/// Paths fixed at startup.
#[derive(Debug, Clone)]
pub struct IoPaths {
    pub corpus_dir: PathBuf,
    pub work_dir: PathBuf,
    pub crash_dir: Option<PathBuf>,
}

/// Mutation state shared read-only with workers.
#[derive(Debug)]
pub struct MutateState {
    pub max_input_size: usize,
    pub dictionary: Option<Dictionary>,
}

/// Dynamic-feedback state. The region and blacklist are created at startup
/// and released when the session drops during shutdown.
#[derive(Debug)]
pub struct FeedbackState {
    pub dynamic: bool,
    pub region: Option<FeedbackRegion>,
    pub blacklist: Option<StackHashBlacklist>,
}

/// Worker bookkeeping. `threads_max` is write-once; `threads_finished` is
/// the only field workers mutate, with release ordering, exactly once each.
#[derive(Debug)]
pub struct ThreadState {
    pub threads_max: usize,
    threads_finished: AtomicUsize,
}

#[derive(Debug)]
pub struct TimingState {
    /// Absolute wall-clock end of the run. `None` means unlimited.
    pub run_end_time: Option<SystemTime>,
    pub started_at: Instant,
}

/// Run counters bumped by workers and read by the display and the report.
#[derive(Debug, Default)]
pub struct RunStats {
    execs: AtomicU64,
    crashes: AtomicU64,
    unique_inputs: AtomicU64,
}

impl RunStats {
    pub fn note_exec(&self) {
        self.execs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_crash(&self) {
        self.crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_unique_input(&self) {
        self.unique_inputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn execs(&self) -> u64 {
        self.execs.load(Ordering::Relaxed)
    }

    pub fn crashes(&self) -> u64 {
        self.crashes.load(Ordering::Relaxed)
    }

    pub fn unique_inputs(&self) -> u64 {
        self.unique_inputs.load(Ordering::Relaxed)
    }
}

/// The process-wide record shared by the supervisor and every worker.
///
/// Created once at startup from a validated config, passed to each thread
/// as `Arc<Session>`. After startup only the enumerated atomics change;
/// everything else is read-only, so no locks guard the plain fields.
#[derive(Debug)]
pub struct Session {
    pub io: IoPaths,
    pub mutate: MutateState,
    pub feedback: FeedbackState,
    pub corpus: SeedCorpus,
    pub threads: ThreadState,
    pub timing: TimingState,
    pub use_screen: bool,
    pub max_iterations: u64,
    pub socket: Option<SocketProvider>,
    pub syms_allow: Vec<String>,
    pub syms_deny: Vec<String>,
    pub stats: RunStats,
    terminating: AtomicBool,
}

impl Session {
    /// Builds a fully populated session or fails before any worker exists.
    ///
    /// Loader failures (corpus, dictionary, blacklist, symbol filters) and
    /// feedback-map failures are fatal here by propagation; the caller exits
    /// non-zero with the diagnostic.
    pub fn from_config(config: &HivefuzzConfig) -> Result<Self, anyhow::Error> {
        let fuzzer = config.fuzzer.clone().unwrap_or_default();
        let mutate_cfg = config.mutate.clone().unwrap_or_default();
        let feedback_cfg = config.feedback.clone().unwrap_or_default();
        let display_cfg = config.display.clone().unwrap_or_default();
        let socket_cfg = config.socket.clone().unwrap_or_default();
        let symbols_cfg = config.symbols.clone().unwrap_or_default();

        let socket = if socket_cfg.enabled {
            log::info!(
                "No input corpus loaded, the external socket provider supplies the fuzz data"
            );
            Some(SocketProvider::setup(&socket_cfg.listen_addr)?)
        } else {
            None
        };

        // With the socket provider active the on-disk corpus is optional.
        let corpus = if socket.is_some() {
            SeedCorpus::default()
        } else {
            SeedCorpus::load(&config.io.corpus_dir)?
        };

        let dictionary = match &mutate_cfg.dictionary_file {
            Some(path) => Some(Dictionary::load(path)?),
            None => None,
        };

        let blacklist = match &feedback_cfg.blacklist_file {
            Some(path) => Some(StackHashBlacklist::load(path)?),
            None => None,
        };

        let syms_allow = match &symbols_cfg.allow_file {
            Some(path) => load_symbol_filter(path)?,
            None => Vec::new(),
        };
        let syms_deny = match &symbols_cfg.deny_file {
            Some(path) => load_symbol_filter(path)?,
            None => Vec::new(),
        };

        let region = if feedback_cfg.dynamic {
            Some(FeedbackRegion::create(&config.io.work_dir)?)
        } else {
            None
        };

        let run_end_time = if fuzzer.run_time_secs == 0 {
            None
        } else {
            Some(SystemTime::now() + Duration::from_secs(fuzzer.run_time_secs))
        };

        Ok(Self {
            io: IoPaths {
                corpus_dir: config.io.corpus_dir.clone(),
                work_dir: config.io.work_dir.clone(),
                crash_dir: config.io.crash_dir.clone(),
            },
            mutate: MutateState {
                max_input_size: mutate_cfg.max_input_size,
                dictionary,
            },
            feedback: FeedbackState {
                dynamic: feedback_cfg.dynamic,
                region,
                blacklist,
            },
            corpus,
            threads: ThreadState {
                threads_max: fuzzer.threads.max(1),
                threads_finished: AtomicUsize::new(0),
            },
            timing: TimingState {
                run_end_time,
                started_at: Instant::now(),
            },
            use_screen: display_cfg.use_screen,
            max_iterations: fuzzer.max_iterations,
            socket,
            syms_allow,
            syms_deny,
            terminating: AtomicBool::new(false),
            stats: RunStats::default(),
        })
    }

    /// Called by each worker exactly once on exit (normal or not).
    /// Release pairs with the supervisor's acquire in `threads_finished`.
    pub fn worker_finished(&self) -> usize {
        self.threads.threads_finished.fetch_add(1, Ordering::Release) + 1
    }

    pub fn threads_finished(&self) -> usize {
        self.threads.threads_finished.load(Ordering::Acquire)
    }

    pub fn pool_drained(&self) -> bool {
        self.threads_finished() >= self.threads.threads_max
    }

    /// One-way flag; calling this twice is the same as calling it once.
    pub fn set_terminating(&self) {
        self.terminating.store(true, Ordering::Release);
    }

    /// Workers re-read this at every safe point; the value is never cached.
    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub fn deadline_exceeded(&self, now: SystemTime) -> bool {
        match self.timing.run_end_time {
            Some(end) => now > end,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeedbackSettings, FuzzerSettings, IoSettings};
    use tempfile::tempdir;

    fn test_config(corpus_dir: PathBuf, work_dir: PathBuf) -> HivefuzzConfig {
        HivefuzzConfig {
            fuzzer: Some(FuzzerSettings {
                threads: 2,
                run_time_secs: 0,
                max_iterations: 0,
            }),
            io: IoSettings {
                corpus_dir,
                work_dir,
                crash_dir: None,
            },
            mutate: None,
            feedback: None,
            display: None,
            socket: None,
            symbols: None,
        }
    }

    #[test]
    fn session_builds_from_minimal_config() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf(), dir.path().to_path_buf());
        let session = Session::from_config(&config).unwrap();

        assert_eq!(session.threads.threads_max, 2);
        assert!(session.timing.run_end_time.is_none());
        assert!(session.feedback.region.is_none());
        assert_eq!(session.threads_finished(), 0);
        assert!(!session.is_terminating());
    }

    #[test]
    fn session_missing_corpus_dir_is_fatal() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().join("absent"), dir.path().to_path_buf());
        assert!(Session::from_config(&config).is_err());
    }

    #[test]
    fn dynamic_feedback_maps_region_under_work_dir() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path().to_path_buf(), dir.path().to_path_buf());
        config.feedback = Some(FeedbackSettings {
            dynamic: true,
            blacklist_file: None,
        });
        let session = Session::from_config(&config).unwrap();
        assert!(session.feedback.region.is_some());
        assert!(dir.path().join(crate::feedback::FEEDBACK_FILE_NAME).exists());
    }

    #[test]
    fn set_terminating_is_idempotent() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf(), dir.path().to_path_buf());
        let session = Session::from_config(&config).unwrap();

        session.set_terminating();
        assert!(session.is_terminating());
        session.set_terminating();
        assert!(session.is_terminating(), "second call changes nothing");
    }

    #[test]
    fn worker_finished_is_monotonic() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path().to_path_buf(), dir.path().to_path_buf());
        let session = Session::from_config(&config).unwrap();

        assert!(!session.pool_drained());
        assert_eq!(session.worker_finished(), 1);
        assert_eq!(session.worker_finished(), 2);
        assert_eq!(session.threads_finished(), 2);
        assert!(session.pool_drained());
    }

    #[test]
    fn deadline_comparison_uses_wall_clock() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path().to_path_buf(), dir.path().to_path_buf());
        config.fuzzer.as_mut().unwrap().run_time_secs = 3600;
        let session = Session::from_config(&config).unwrap();

        assert!(!session.deadline_exceeded(SystemTime::now()));
        let past_deadline = SystemTime::now() + Duration::from_secs(7200);
        assert!(session.deadline_exceeded(past_deadline));
    }
}
