use crate::mutator::{ByteNudgeMutator, DictionaryInsertMutator, Mutator};
use crate::session::Session;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The per-thread fuzzing loop, opaque to the pool.
///
/// Contract (the pool enforces the rest):
/// - observe [`Session::is_terminating`] at safe points and return promptly
///   once it is set, never caching the value;
/// - never install signal handlers or change the signal mask (workers are
///   spawned with the termination signals blocked and must stay that way);
/// - report internal failures via the returned error, not by panicking
///   (a panic is tolerated and logged, but treated as a worker crash).
pub trait WorkerBody: Send + Sync + 'static {
    fn run(&self, session: &Session, worker_id: usize) -> Result<(), anyhow::Error>;
}

/// Bumps the session's finished counter exactly once, even when the body
/// panics: the increment runs during unwind.
struct FinishGuard {
    session: Arc<Session>,
    worker_id: usize,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        let finished = self.session.worker_finished();
        log::debug!("worker {} finished ({} total)", self.worker_id, finished);
    }
}

/// Spawns and joins the fixed set of worker threads.
///
/// The pool knows workers only by count: it has no per-worker status beyond
/// the shared finished counter.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Launches exactly `session.threads.threads_max` workers sharing the
    /// session. Call with the termination signals already blocked on the
    /// calling thread so the workers inherit the mask.
    pub fn spawn(
        session: &Arc<Session>,
        body: Arc<dyn WorkerBody>,
    ) -> Result<Self, std::io::Error> {
        let mut handles = Vec::with_capacity(session.threads.threads_max);
        for worker_id in 0..session.threads.threads_max {
            let session = Arc::clone(session);
            let body = Arc::clone(&body);
            let handle = std::thread::Builder::new()
                .name(format!("hivefuzz-worker-{worker_id}"))
                .spawn(move || {
                    let _guard = FinishGuard {
                        session: Arc::clone(&session),
                        worker_id,
                    };
                    let outcome = catch_unwind(AssertUnwindSafe(|| body.run(&session, worker_id)));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            log::error!("worker {worker_id} failed: {e:#}");
                        }
                        Err(_panic) => {
                            log::error!("worker {worker_id} panicked");
                        }
                    }
                })?;
            handles.push(handle);
        }
        Ok(Self { handles })
    }

    pub fn active(&self) -> usize {
        self.handles.len()
    }

    /// Waits for every spawned worker. Joining an already-joined pool is a
    /// no-op. A worker that panicked has already been counted by its guard,
    /// so the join result is ignored beyond logging.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("worker thread terminated abnormally");
            }
        }
    }
}

/// The built-in worker body: schedule a seed, mutate it, run the in-process
/// harness, record crashes and stats.
pub struct FuzzLoop {
    harness: Arc<dyn Fn(&[u8]) + Send + Sync>,
}

impl FuzzLoop {
    pub fn new(harness: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        Self {
            harness: Arc::new(harness),
        }
    }

    fn persist_crash(&self, session: &Session, input: &[u8], digest: &md5::Digest) {
        let Some(crash_dir) = &session.io.crash_dir else {
            return;
        };
        if let Err(e) = std::fs::create_dir_all(crash_dir) {
            log::error!("cannot create crash dir {crash_dir:?}: {e}");
            return;
        }
        let path = crash_dir.join(format!("crash_{digest:x}.bin"));
        if let Err(e) = std::fs::write(&path, input) {
            log::error!("cannot write crash input {path:?}: {e}");
        }
    }
}

impl WorkerBody for FuzzLoop {
    fn run(&self, session: &Session, worker_id: usize) -> Result<(), anyhow::Error> {
        let mut seed = [0u8; 32];
        rand::rng().fill(&mut seed);
        seed[0] ^= worker_id as u8;
        let mut rng = ChaCha8Rng::from_seed(seed);

        let mut nudge = ByteNudgeMutator;
        let mut dict_insert = DictionaryInsertMutator;
        let dictionary = session.mutate.dictionary.as_ref();
        let max_size = session.mutate.max_input_size;

        let mut seen_hashes: HashSet<[u8; 16]> = HashSet::new();
        let mut iterations: u64 = 0;

        loop {
            // Safe point: re-read, never cache.
            if session.is_terminating() {
                return Ok(());
            }
            if session.max_iterations > 0 && iterations >= session.max_iterations {
                return Ok(());
            }
            iterations += 1;

            let base = if session.corpus.is_empty() {
                None
            } else {
                let id = rng.random_range(0..session.corpus.len());
                session.corpus.get(id)
            };

            let use_dictionary = dictionary.is_some() && rng.random_range(0..4) == 0;
            let candidate = if use_dictionary {
                dict_insert.mutate(base, &mut rng, dictionary, max_size)?
            } else {
                nudge.mutate(base, &mut rng, dictionary, max_size)?
            };

            let harness = Arc::clone(&self.harness);
            let outcome = catch_unwind(AssertUnwindSafe(|| harness(&candidate)));
            session.stats.note_exec();

            let digest = md5::compute(&candidate);
            if seen_hashes.insert(digest.0) {
                session.stats.note_unique_input();
            }

            if let Err(panic_payload) = outcome {
                let description = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };

                // First 8 digest bytes of the crash description stand in for
                // the stack hash the blacklist filters on.
                let crash_digest = md5::compute(description.as_bytes());
                let stack_hash = u64::from_le_bytes(crash_digest.0[..8].try_into()?);
                if session
                    .feedback
                    .blacklist
                    .as_ref()
                    .is_some_and(|bl| bl.contains(stack_hash))
                {
                    log::debug!("worker {worker_id}: blacklisted crash {stack_hash:#x}, skipping");
                    continue;
                }

                session.stats.note_crash();
                log::info!("worker {worker_id}: crash: {description}");
                self.persist_crash(session, &candidate, &digest);
            }
        }
    }
}
