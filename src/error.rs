//! 配置错误类型

use std::path::PathBuf;
use thiserror::Error;

/// 命令行参数 / 配置文件校验错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Synchronization interval must be a positive number of seconds")]
    InvalidInterval,

    #[error("Provided {role} path ({}) doesn't exist or is not a directory", .path.display())]
    NotADirectory { role: &'static str, path: PathBuf },

    #[error("Source and replica resolve to the same directory: {}", .0.display())]
    SameDirectory(PathBuf),

    #[error("{} is nested inside {}; a tree cannot be mirrored into itself", .inner.display(), .outer.display())]
    NestedTrees { outer: PathBuf, inner: PathBuf },

    #[error("Log directory {} lies inside the {role} tree {}; the log file would be mirrored with it", .log_dir.display(), .root.display())]
    LogDirInsideTree {
        role: &'static str,
        log_dir: PathBuf,
        root: PathBuf,
    },

    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid log level '{0}', expected one of error, warn, info, debug, trace")]
    InvalidLogLevel(String),

    #[error("Failed to read settings file {}: {source}", .path.display())]
    SettingsIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {}: {source}", .path.display())]
    SettingsParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
