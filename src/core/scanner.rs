use crate::error::ConfigError;
use crate::storage::{FileMeta, Storage};
use anyhow::Result;
use regex::Regex;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;
use tracing::debug;

/// 排除规则（名称通配符：`*` 匹配任意字符串，`?` 匹配单个字符）
#[derive(Debug, Clone, Default)]
pub struct ExcludeRules {
    rules: Vec<(String, Regex)>,
}

impl ExcludeRules {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(patterns.len());

        for pattern in patterns {
            let pattern = pattern.as_ref();
            if pattern.is_empty() {
                return Err(ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "pattern is empty".to_string(),
                });
            }
            if pattern.contains('/') || pattern.contains('\\') {
                return Err(ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "patterns match entry names and cannot contain path separators"
                        .to_string(),
                });
            }

            let re = Regex::new(&Self::glob_to_regex(pattern)).map_err(|e| {
                ConfigError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                }
            })?;
            rules.push((pattern.to_string(), re));
        }

        Ok(Self { rules })
    }

    /// 简单的 glob 模式转换
    fn glob_to_regex(pattern: &str) -> String {
        let mut out = String::with_capacity(pattern.len() + 8);
        out.push('^');
        for c in pattern.chars() {
            match c {
                '*' => out.push_str(".*"),
                '?' => out.push('.'),
                _ => out.push_str(&regex::escape(c.encode_utf8(&mut [0u8; 4]))),
            }
        }
        out.push('$');
        out
    }

    /// 检查名称是否应该被排除，返回命中的规则
    pub fn matched(&self, name: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(name))
            .map(|(pattern, _)| pattern.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// 文件扫描器配置
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// 两侧都忽略的条目（既不复制也不删除）
    pub exclude: ExcludeRules,
}

/// 单层目录扫描结果：名称 -> 元数据（无法获取元数据时为 None）
pub type DirListing = BTreeMap<OsString, Option<FileMeta>>;

/// 文件扫描器
#[derive(Debug, Clone, Default)]
pub struct FileScanner {
    config: ScanConfig,
}

impl FileScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScanConfig) -> Self {
        Self { config }
    }

    /// 扫描一个目录层级，按名称排序返回
    pub async fn scan_dir(&self, storage: &dyn Storage, dir: &Path) -> Result<DirListing> {
        let entries = storage.list_dir(dir).await?;
        let total = entries.len();

        let mut listing = BTreeMap::new();
        for entry in entries {
            if !self.config.exclude.is_empty() {
                if let Some(pattern) = self.config.exclude.matched(&entry.name.to_string_lossy()) {
                    debug!("排除条目: {:?} (规则 {})", dir.join(&entry.name), pattern);
                    continue;
                }
            }
            listing.insert(entry.name, entry.meta);
        }

        debug!(
            "扫描 {:?}: {} 个条目, {} 个被排除",
            dir,
            listing.len(),
            total - listing.len()
        );

        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use tempfile::tempdir;

    #[test]
    fn test_matches_pattern() {
        let rules = ExcludeRules::new(&["*.tmp", "~*", ".git", "file?.log"]).unwrap();

        assert_eq!(rules.matched("build.tmp"), Some("*.tmp"));
        assert_eq!(rules.matched("~lock"), Some("~*"));
        assert_eq!(rules.matched(".git"), Some(".git"));
        assert_eq!(rules.matched("file1.log"), Some("file?.log"));
        assert_eq!(rules.matched("file12.log"), None);
        assert_eq!(rules.matched("xgit"), None);
        assert_eq!(rules.matched("notes.txt"), None);
    }

    #[test]
    fn test_pattern_special_chars_are_literal() {
        let rules = ExcludeRules::new(&["a+b(1).txt"]).unwrap();
        assert!(rules.matched("a+b(1).txt").is_some());
        assert!(rules.matched("aab(1)xtxt").is_none());
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        assert!(matches!(
            ExcludeRules::new(&[""]),
            Err(ConfigError::InvalidPattern { .. })
        ));
        assert!(matches!(
            ExcludeRules::new(&["a/b"]),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[tokio::test]
    async fn test_scan_dir_sorted_and_excluded() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join("junk.tmp"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();

        let scanner = FileScanner::with_config(ScanConfig {
            exclude: ExcludeRules::new(&["*.tmp"]).unwrap(),
        });
        let listing = scanner
            .scan_dir(&LocalStorage::new(), dir.path())
            .await
            .unwrap();

        let names: Vec<_> = listing.keys().cloned().collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c"]);
        assert!(listing[std::ffi::OsStr::new("c")].as_ref().unwrap().is_dir());
    }
}
