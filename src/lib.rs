pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod parse;
pub mod sync;
pub mod util;

pub use error::{JobError, ProbeError, RunError, SetupError};
pub use sync::{SyncReport, handle_sync};
