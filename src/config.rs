//! 应用配置模块：命令行参数、可选的 JSON 配置文件以及参数校验

use crate::core::{CompareMode, ExcludeRules, ScanConfig, SyncConfig};
use crate::error::ConfigError;
use crate::logging::{LogConfig, VALID_LEVELS};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// mirrorsync - 按固定间隔把源目录单向镜像到副本目录
#[derive(Debug, Clone, Parser)]
#[command(name = "mirrorsync", version)]
#[command(about = "One-way directory mirroring on a fixed interval with a durable sync log")]
pub struct Cli {
    /// Directory whose contents are mirrored
    pub source: PathBuf,

    /// Directory kept as an exact replica of the source
    pub replica: PathBuf,

    /// Synchronization interval in seconds
    pub interval: u64,

    /// Existing directory that receives synclogs.log
    pub log_dir: PathBuf,

    /// JSON settings file (compare, exclude and log sections)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// File comparison strategy (shallow, checksum)
    #[arg(long)]
    pub compare: Option<CompareMode>,

    /// Entry name pattern ignored on both sides (repeatable)
    #[arg(long = "exclude", value_name = "PATTERN")]
    pub exclude: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Size limit of synclogs.log before it is rotated
    #[arg(long)]
    pub max_log_size_mb: Option<u32>,

    /// Do not echo log records to the console
    #[arg(long)]
    pub quiet: bool,

    /// Run a single synchronization and exit
    #[arg(long)]
    pub once: bool,

    /// Log the planned operations without modifying the replica
    #[arg(long)]
    pub dry_run: bool,
}

/// JSON 配置文件内容
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub compare: CompareMode,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub log: LogConfig,
}

impl Settings {
    /// 从配置文件加载
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ConfigError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// 校验后的运行配置
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub source_root: PathBuf,
    pub replica_root: PathBuf,
    pub interval: Duration,
    pub log_dir: PathBuf,
    pub sync: SyncConfig,
    pub log: LogConfig,
    pub once: bool,
}

impl MirrorConfig {
    /// 校验命令行参数；命令行的值优先于配置文件
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if cli.interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }

        let source_root = existing_dir("source", &cli.source)?;
        let replica_root = existing_dir("replica", &cli.replica)?;
        let log_dir = existing_dir("log", &cli.log_dir)?;
        check_disjoint(&source_root, &replica_root)?;
        check_log_dir(&log_dir, "source", &source_root)?;
        check_log_dir(&log_dir, "replica", &replica_root)?;

        let settings = match &cli.config {
            Some(path) => Settings::load(path)?,
            None => Settings::default(),
        };

        let mut log = settings.log;
        if let Some(level) = &cli.log_level {
            log.level = level.to_lowercase();
        }
        if !VALID_LEVELS.contains(&log.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(log.level));
        }
        if let Some(size) = cli.max_log_size_mb {
            log.max_size_mb = size;
        }
        // 限制范围 1-100 MB
        log.max_size_mb = log.max_size_mb.clamp(1, 100);
        if cli.quiet {
            log.console = false;
        }

        let mut patterns = settings.exclude;
        patterns.extend(cli.exclude.iter().cloned());
        let exclude = ExcludeRules::new(&patterns)?;

        Ok(Self {
            source_root: cli.source.clone(),
            replica_root: cli.replica.clone(),
            interval: Duration::from_secs(cli.interval),
            log_dir,
            sync: SyncConfig {
                compare_mode: cli.compare.unwrap_or(settings.compare),
                scan_config: ScanConfig { exclude },
                dry_run: cli.dry_run,
            },
            log,
            once: cli.once,
        })
    }
}

/// 返回规范化后的路径，路径不存在或不是目录时报错
fn existing_dir(role: &'static str, path: &Path) -> Result<PathBuf, ConfigError> {
    let not_a_dir = || ConfigError::NotADirectory {
        role,
        path: path.to_path_buf(),
    };

    if !path.is_dir() {
        return Err(not_a_dir());
    }
    fs::canonicalize(path).map_err(|_| not_a_dir())
}

/// 源和副本不能相同，也不能互相嵌套
fn check_disjoint(source: &Path, replica: &Path) -> Result<(), ConfigError> {
    if source == replica {
        return Err(ConfigError::SameDirectory(source.to_path_buf()));
    }
    if replica.starts_with(source) {
        return Err(ConfigError::NestedTrees {
            outer: source.to_path_buf(),
            inner: replica.to_path_buf(),
        });
    }
    if source.starts_with(replica) {
        return Err(ConfigError::NestedTrees {
            outer: replica.to_path_buf(),
            inner: source.to_path_buf(),
        });
    }
    Ok(())
}

/// 日志目录不能位于源或副本树内
fn check_log_dir(log_dir: &Path, role: &'static str, root: &Path) -> Result<(), ConfigError> {
    if log_dir.starts_with(root) {
        return Err(ConfigError::LogDirInsideTree {
            role,
            log_dir: log_dir.to_path_buf(),
            root: root.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    struct Dirs {
        root: TempDir,
        source: PathBuf,
        replica: PathBuf,
        logs: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = tempdir().unwrap();
        let source = root.path().join("testsourcedir");
        let replica = root.path().join("testreplicadir");
        let logs = root.path().join("testlogdir");
        for d in [&source, &replica, &logs] {
            fs::create_dir(d).unwrap();
        }
        Dirs {
            root,
            source,
            replica,
            logs,
        }
    }

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("mirrorsync").chain(args.iter().copied()))
    }

    fn cli_for(d: &Dirs, interval: &str) -> Cli {
        parse(&[
            d.source.to_str().unwrap(),
            d.replica.to_str().unwrap(),
            interval,
            d.logs.to_str().unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn test_incomplete_arguments() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["a", "b", "5"]).is_err());
    }

    #[test]
    fn test_non_numeric_interval() {
        let d = dirs();
        let result = parse(&[
            d.source.to_str().unwrap(),
            d.replica.to_str().unwrap(),
            "five seconds",
            d.logs.to_str().unwrap(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval() {
        let d = dirs();
        let result = MirrorConfig::from_cli(&cli_for(&d, "0"));
        assert!(matches!(result, Err(ConfigError::InvalidInterval)));
    }

    #[test]
    fn test_valid_arguments() {
        let d = dirs();
        let config = MirrorConfig::from_cli(&cli_for(&d, "5")).unwrap();

        assert_eq!(config.source_root, d.source);
        assert_eq!(config.replica_root, d.replica);
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.sync.compare_mode, CompareMode::Shallow);
        assert!(!config.sync.dry_run);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_missing_source() {
        let d = dirs();
        let mut cli = cli_for(&d, "5");
        cli.source = d.source.join("missing");
        let result = MirrorConfig::from_cli(&cli);
        assert!(matches!(
            result,
            Err(ConfigError::NotADirectory { role: "source", .. })
        ));
    }

    #[test]
    fn test_log_dir_must_be_directory() {
        let d = dirs();
        let file = d.logs.join("file.txt");
        fs::write(&file, b"x").unwrap();
        let mut cli = cli_for(&d, "5");
        cli.log_dir = file;
        assert!(matches!(
            MirrorConfig::from_cli(&cli),
            Err(ConfigError::NotADirectory { role: "log", .. })
        ));
    }

    #[test]
    fn test_same_and_nested_trees_rejected() {
        let d = dirs();
        let mut cli = cli_for(&d, "5");
        cli.replica = d.source.clone();
        assert!(matches!(
            MirrorConfig::from_cli(&cli),
            Err(ConfigError::SameDirectory(_))
        ));

        let nested = d.source.join("inner");
        fs::create_dir(&nested).unwrap();
        cli.replica = nested;
        assert!(matches!(
            MirrorConfig::from_cli(&cli),
            Err(ConfigError::NestedTrees { .. })
        ));
    }

    #[test]
    fn test_log_dir_inside_trees_rejected() {
        let d = dirs();
        let mut cli = cli_for(&d, "5");

        cli.log_dir = d.replica.clone();
        assert!(matches!(
            MirrorConfig::from_cli(&cli),
            Err(ConfigError::LogDirInsideTree { role: "replica", .. })
        ));

        let nested = d.source.join("logs");
        fs::create_dir(&nested).unwrap();
        cli.log_dir = nested;
        assert!(matches!(
            MirrorConfig::from_cli(&cli),
            Err(ConfigError::LogDirInsideTree { role: "source", .. })
        ));

        // 日志目录是根目录的父目录时允许
        cli.log_dir = d.root.path().to_path_buf();
        assert!(MirrorConfig::from_cli(&cli).is_ok());
    }

    #[test]
    fn test_settings_file_and_overrides() {
        let d = dirs();
        let settings = d.logs.join("settings.json");
        fs::write(
            &settings,
            r#"{"compare":"checksum","exclude":["*.tmp"],"log":{"level":"debug","maxSizeMb":500}}"#,
        )
        .unwrap();

        let mut cli = cli_for(&d, "5");
        cli.config = Some(settings);
        cli.exclude = vec!["~*".to_string()];
        cli.log_level = Some("WARN".to_string());

        let config = MirrorConfig::from_cli(&cli).unwrap();
        assert_eq!(config.sync.compare_mode, CompareMode::Checksum);
        assert!(config.sync.scan_config.exclude.matched("a.tmp").is_some());
        assert!(config.sync.scan_config.exclude.matched("~lock").is_some());
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.log.max_size_mb, 100);
    }

    #[test]
    fn test_invalid_settings() {
        let d = dirs();
        let settings = d.logs.join("settings.json");
        fs::write(&settings, "{not json").unwrap();
        let mut cli = cli_for(&d, "5");
        cli.config = Some(settings);
        assert!(matches!(
            MirrorConfig::from_cli(&cli),
            Err(ConfigError::SettingsParse { .. })
        ));

        let mut cli = cli_for(&d, "5");
        cli.log_level = Some("verbose".to_string());
        assert!(matches!(
            MirrorConfig::from_cli(&cli),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_cli_options_parse() {
        let d = dirs();
        let cli = parse(&[
            d.source.to_str().unwrap(),
            d.replica.to_str().unwrap(),
            "10",
            d.logs.to_str().unwrap(),
            "--compare",
            "checksum",
            "--exclude",
            "*.bak",
            "--once",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(cli.compare, Some(CompareMode::Checksum));
        assert_eq!(cli.exclude, vec!["*.bak"]);
        assert!(cli.once);
        assert!(cli.dry_run);
    }
}
