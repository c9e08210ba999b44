pub mod cli;
pub mod error;
pub mod host;
pub mod log;
pub mod session;
pub mod teardown;

pub use error::{Result, SessionError};
pub use session::{ContainerRef, Orchestrator, printerr, run_session, run_with};
pub use teardown::{Decision, Teardown, TeardownPolicy, TeardownReport, Trigger};
