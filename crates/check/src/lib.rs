pub mod checker;
pub mod error;
pub mod heartbeat;
pub mod mock;
pub mod runner;

pub use checker::{Checker, CheckerRegistry};
pub use error::CheckError;
pub use heartbeat::HeartbeatChecker;
pub use runner::{CheckSummary, run_checkers};
