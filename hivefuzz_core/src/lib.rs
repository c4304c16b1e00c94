pub mod config;
pub mod display;
pub mod feedback;
pub mod input;
pub mod mutator;
pub mod preflight;
pub mod report;
pub mod session;
pub mod socket;
pub mod supervisor;
pub mod worker;

pub use config::HivefuzzConfig;
pub use feedback::{FEEDBACK_MAP_SIZE, FeedbackError, FeedbackRegion, StackHashBlacklist};
pub use input::{Dictionary, LoaderError, SeedCorpus};
pub use mutator::{ByteNudgeMutator, DictionaryInsertMutator, Mutator};
pub use report::RunReport;
pub use session::{RunStats, Session};
pub use socket::{SocketError, SocketProvider};
pub use supervisor::{ExitReason, SupervisorError};
pub use worker::{FuzzLoop, WorkerBody, WorkerPool};
