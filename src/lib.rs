pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod scheduler;
pub mod storage;

pub use crate::core::{Reconciler, SyncConfig, SyncReport};
pub use config::{Cli, MirrorConfig};
pub use error::ConfigError;
pub use logging::{LogSink, MemorySink, Severity, TracingSink};
pub use scheduler::Scheduler;
