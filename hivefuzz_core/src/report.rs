use crate::session::Session;
use crate::supervisor::{ExitReason, signal_name};
use serde::Serialize;
use std::path::Path;

pub const REPORT_FILE_NAME: &str = "hivefuzz-report.json";

/// End-of-run summary written next to the other run artifacts.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub exit_reason: String,
    pub execs: u64,
    pub crashes: u64,
    pub unique_inputs: u64,
    pub corpus_size: usize,
    pub threads: usize,
    pub wall_secs: u64,
}

impl RunReport {
    pub fn build(session: &Session, reason: ExitReason) -> Self {
        let exit_reason = match reason {
            ExitReason::Signalled(sig) => format!("signal {} ({})", sig, signal_name(sig)),
            ExitReason::AllWorkersFinished => "all workers finished".to_string(),
            ExitReason::DeadlineReached => "maximum run time reached".to_string(),
        };
        Self {
            exit_reason,
            execs: session.stats.execs(),
            crashes: session.stats.crashes(),
            unique_inputs: session.stats.unique_inputs(),
            corpus_size: session.corpus.len(),
            threads: session.threads.threads_max,
            wall_secs: session.timing.started_at.elapsed().as_secs(),
        }
    }

    pub fn write_to(&self, dir: &Path) -> Result<(), anyhow::Error> {
        let path = dir.join(REPORT_FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }
}

/// Serializes the summary into the work dir. A failed report never turns a
/// clean run into a failed one; it only warns.
pub fn write_run_report(session: &Session, reason: ExitReason) {
    let report = RunReport::build(session, reason);
    if let Err(e) = report.write_to(&session.io.work_dir) {
        log::warn!("could not write run report: {e:#}");
    } else {
        log::info!(
            "Run report written to {:?}",
            session.io.work_dir.join(REPORT_FILE_NAME)
        );
    }
}
