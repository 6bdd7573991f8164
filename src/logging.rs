//! 日志模块 - 提供文件日志、大小管理以及同步记录接口

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::Subscriber;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

/// 同步日志文件名
pub const LOG_FILE_NAME: &str = "synclogs.log";

/// 日志时间格式
pub const LOG_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// 同步记录使用的 tracing target
pub const SYNC_TARGET: &str = "mirrorsync::sync";

/// 合法的日志级别
pub const VALID_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否同时输出到控制台
    #[serde(default = "default_console")]
    pub console: bool,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_console() -> bool {
    true
}

fn default_max_size_mb() -> u32 {
    5 // 默认 5MB
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console: default_console(),
            max_size_mb: default_max_size_mb(),
            level: default_level(),
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 带大小限制的日志写入器
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: Arc<Mutex<Option<BufWriter<File>>>>,
}

impl SizeRotatingWriter {
    pub fn new(log_dir: &Path, max_size_mb: u32) -> io::Result<Self> {
        let file_path = log_dir.join(LOG_FILE_NAME);
        let max_size = (max_size_mb as u64) * 1024 * 1024;
        Self::with_limit(file_path, max_size)
    }

    fn with_limit(file_path: PathBuf, max_size: u64) -> io::Result<Self> {
        let writer = Self::open_file(&file_path, max_size)?;

        Ok(Self {
            file_path,
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        // 检查现有文件大小，如果超过限制则轮转
        if let Ok(metadata) = fs::metadata(file_path) {
            if metadata.len() > max_size {
                Self::rotate_log(file_path)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(BufWriter::new(file))
    }

    /// 轮转日志文件：synclogs.log -> synclogs.log.<n>，已轮转的文件不会被删除
    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = Self::next_backup_path(file_path);
        fs::rename(file_path, backup_path)
    }

    /// 第一个未被占用的序号
    fn next_backup_path(file_path: &Path) -> PathBuf {
        let mut n: u32 = 1;
        loop {
            let candidate = PathBuf::from(format!("{}.{}", file_path.display(), n));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn lock(
        inner: &Mutex<Option<BufWriter<File>>>,
    ) -> io::Result<MutexGuard<'_, Option<BufWriter<File>>>> {
        inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))
    }

    /// 超过大小限制时关闭当前文件、轮转并重新打开
    fn rotate_if_needed(
        inner: &Mutex<Option<BufWriter<File>>>,
        file_path: &Path,
        max_size: u64,
    ) -> io::Result<()> {
        let oversized = fs::metadata(file_path)
            .map(|m| m.len() > max_size)
            .unwrap_or(false);
        if !oversized {
            return Ok(());
        }

        let mut guard = Self::lock(inner)?;
        if let Some(mut w) = guard.take() {
            let _ = w.flush();
        }

        Self::rotate_log(file_path)?;
        *guard = Some(Self::open_file(file_path, max_size)?);
        Ok(())
    }
}

impl Clone for SizeRotatingWriter {
    fn clone(&self) -> Self {
        Self {
            file_path: self.file_path.clone(),
            max_size: self.max_size,
            writer: self.writer.clone(),
        }
    }
}

/// 日志写入器包装
pub struct LogWriter {
    inner: Arc<Mutex<Option<BufWriter<File>>>>,
    file_path: PathBuf,
    max_size: u64,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = {
            let mut guard = SizeRotatingWriter::lock(&self.inner)?;
            let writer = guard
                .as_mut()
                .ok_or_else(|| io::Error::other("Writer not available"))?;
            let written = writer.write(buf)?;
            writer.flush()?;
            written
        };

        SizeRotatingWriter::rotate_if_needed(&self.inner, &self.file_path, self.max_size)?;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = SizeRotatingWriter::lock(&self.inner)?;
        match guard.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        // 在创建写入器前检查轮转
        let _ = Self::rotate_if_needed(&self.writer, &self.file_path, self.max_size);

        LogWriter {
            inner: self.writer.clone(),
            file_path: self.file_path.clone(),
            max_size: self.max_size,
        }
    }
}

/// 文件日志层 - 始终输出到文件
fn file_layer<S>(writer: SizeRotatingWriter) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
        .with_ansi(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
}

/// 初始化日志系统
///
/// 日志文件无法打开属于致命错误，直接返回给调用方。
pub fn init_logging(log_dir: &Path, config: &LogConfig) -> anyhow::Result<()> {
    let file_writer = SizeRotatingWriter::new(log_dir, config.max_size_mb)
        .with_context(|| format!("failed to open {:?}", log_dir.join(LOG_FILE_NAME)))?;

    let env_filter = EnvFilter::from_default_env().add_directive(config.tracing_level().into());

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_timer(ChronoLocal::new(LOG_TIME_FORMAT.to_string()))
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer(file_writer))
        .with(console_layer);

    tracing::subscriber::set_global_default(subscriber)
        .context("a global tracing subscriber is already installed")?;

    Ok(())
}

/// 同步记录级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Debug,
    Error,
}

/// 一条已完成操作的记录
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub severity: Severity,
    pub message: String,
}

/// 同步记录接口，由调用方注入到同步引擎
///
/// 记录顺序必须与操作执行顺序一致。
pub trait LogSink: Send + Sync {
    fn record(&self, severity: Severity, message: &str);
}

/// 转发到 tracing（最终写入 synclogs.log）
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(target: SYNC_TARGET, "{}", message),
            Severity::Debug => tracing::debug!(target: SYNC_TARGET, "{}", message),
            Severity::Error => tracing::error!(target: SYNC_TARGET, "{}", message),
        }
    }
}

/// 内存记录，按追加顺序保存
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.guard().clone()
    }

    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.guard()
            .iter()
            .filter(|r| r.severity == severity)
            .map(|r| r.message.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }
}

impl LogSink for MemorySink {
    fn record(&self, severity: Severity, message: &str) {
        self.guard().push(LogRecord {
            timestamp: Local::now(),
            severity,
            message: message.to_string(),
        });
    }
}
