use crate::core::scanner::DirListing;
use crate::storage::{EntryKind, FileMeta, Storage};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// 文件比较策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// 大小 + 修改时间签名；签名不一致但大小相同时再逐字节比较
    #[default]
    Shallow,
    /// 大小相同时比较 BLAKE3 hash
    Checksum,
}

impl FromStr for CompareMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shallow" => Ok(CompareMode::Shallow),
            "checksum" => Ok(CompareMode::Checksum),
            other => Err(format!(
                "invalid compare mode '{}', expected 'shallow' or 'checksum'",
                other
            )),
        }
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareMode::Shallow => write!(f, "shallow"),
            CompareMode::Checksum => write!(f, "checksum"),
        }
    }
}

/// 仅凭元数据得出的比较结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRelation {
    /// 签名一致，视为相同
    Equal,
    /// 大小不同，肯定不同
    Different,
    /// 需要读取内容才能判断
    NeedsContentCheck,
}

/// 一个目录对的比较结果
///
/// 两侧出现的每个名称恰好属于 `common_files`、`common_subdirs`、`source_only`、
/// `replica_only`、`type_mismatch`、`unclassifiable` 之一；`changed_files` 是
/// `common_files` 的子集。
#[derive(Debug, Clone, Default)]
pub struct ComparisonResult {
    pub common_files: BTreeSet<OsString>,
    pub changed_files: BTreeSet<OsString>,
    pub source_only: BTreeMap<OsString, Option<FileMeta>>,
    pub replica_only: BTreeMap<OsString, Option<FileMeta>>,
    pub common_subdirs: BTreeSet<OsString>,
    /// 一侧是文件、另一侧是目录
    pub type_mismatch: BTreeMap<OsString, (EntryKind, EntryKind)>,
    /// 至少一侧既不是文件也不是目录，或无法获取元数据
    pub unclassifiable: BTreeSet<OsString>,
    /// 内容比较失败的公共文件（本轮不更新）
    pub compare_failures: BTreeMap<OsString, String>,
}

impl ComparisonResult {
    /// 按名称和类型划分两侧条目，不读取文件内容
    pub fn partition(source: &DirListing, replica: &DirListing) -> Self {
        let mut result = Self::default();

        for (name, src_meta) in source {
            let Some(dst_meta) = replica.get(name) else {
                result.source_only.insert(name.clone(), src_meta.clone());
                continue;
            };

            let src_kind = src_meta.as_ref().map(|m| m.kind);
            let dst_kind = dst_meta.as_ref().map(|m| m.kind);

            match (src_kind, dst_kind) {
                (Some(EntryKind::File), Some(EntryKind::File)) => {
                    result.common_files.insert(name.clone());
                }
                (Some(EntryKind::Dir), Some(EntryKind::Dir)) => {
                    result.common_subdirs.insert(name.clone());
                }
                (
                    Some(s @ (EntryKind::File | EntryKind::Dir)),
                    Some(d @ (EntryKind::File | EntryKind::Dir)),
                ) => {
                    result.type_mismatch.insert(name.clone(), (s, d));
                }
                _ => {
                    result.unclassifiable.insert(name.clone());
                }
            }
        }

        for (name, dst_meta) in replica {
            if !source.contains_key(name) {
                result.replica_only.insert(name.clone(), dst_meta.clone());
            }
        }

        result
    }

    /// 没有任何需要执行的变更
    pub fn is_in_sync(&self) -> bool {
        self.changed_files.is_empty()
            && self.source_only.is_empty()
            && self.replica_only.is_empty()
            && self.type_mismatch.is_empty()
    }
}

/// 文件比较器
#[derive(Debug, Clone, Default)]
pub struct FileComparator {
    mode: CompareMode,
}

impl FileComparator {
    pub fn new(mode: CompareMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CompareMode {
        self.mode
    }

    /// 比较两个文件的元数据
    pub fn compare_meta(&self, source: &FileMeta, dest: &FileMeta) -> FileRelation {
        if source.size != dest.size {
            return FileRelation::Different;
        }

        match self.mode {
            CompareMode::Shallow => match (source.modified, dest.modified) {
                (Some(src), Some(dst)) if src == dst => FileRelation::Equal,
                _ => FileRelation::NeedsContentCheck,
            },
            CompareMode::Checksum => FileRelation::NeedsContentCheck,
        }
    }

    /// 判断两个同名文件是否不同
    pub async fn files_differ(
        &self,
        storage: &dyn Storage,
        source_path: &Path,
        dest_path: &Path,
        source: &FileMeta,
        dest: &FileMeta,
    ) -> Result<bool> {
        match self.compare_meta(source, dest) {
            FileRelation::Equal => Ok(false),
            FileRelation::Different => {
                debug!(
                    "文件大小不同: {:?} (src={}, dst={})",
                    source_path, source.size, dest.size
                );
                Ok(true)
            }
            FileRelation::NeedsContentCheck => {
                let differ = match self.mode {
                    CompareMode::Shallow => !storage.content_eq(source_path, dest_path).await?,
                    CompareMode::Checksum => {
                        storage.checksum(source_path).await? != storage.checksum(dest_path).await?
                    }
                };
                if differ {
                    debug!("文件内容不同: {:?}", source_path);
                }
                Ok(differ)
            }
        }
    }

    /// 比较一个目录对：划分条目并检测公共文件的变化
    pub async fn compare_dirs(
        &self,
        storage: &dyn Storage,
        source_dir: &Path,
        replica_dir: &Path,
        source: &DirListing,
        replica: &DirListing,
    ) -> ComparisonResult {
        let mut result = ComparisonResult::partition(source, replica);

        for name in &result.common_files {
            // partition 保证两侧元数据都存在
            let (Some(Some(src_meta)), Some(Some(dst_meta))) = (source.get(name), replica.get(name))
            else {
                continue;
            };

            match self
                .files_differ(
                    storage,
                    &source_dir.join(name),
                    &replica_dir.join(name),
                    src_meta,
                    dst_meta,
                )
                .await
            {
                Ok(true) => {
                    result.changed_files.insert(name.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    result.compare_failures.insert(name.clone(), format!("{:#}", e));
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn file(size: u64, secs: u64) -> Option<FileMeta> {
        Some(FileMeta {
            kind: EntryKind::File,
            size,
            modified: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)),
        })
    }

    fn dir() -> Option<FileMeta> {
        Some(FileMeta {
            kind: EntryKind::Dir,
            size: 0,
            modified: None,
        })
    }

    fn other() -> Option<FileMeta> {
        Some(FileMeta {
            kind: EntryKind::Other,
            size: 0,
            modified: None,
        })
    }

    fn listing(entries: &[(&str, Option<FileMeta>)]) -> DirListing {
        entries
            .iter()
            .map(|(name, meta)| (OsString::from(name), meta.clone()))
            .collect()
    }

    #[test]
    fn test_compare_meta_shallow() {
        let comparator = FileComparator::default();
        let a = file(10, 100).unwrap();

        assert_eq!(comparator.compare_meta(&a, &a), FileRelation::Equal);
        assert_eq!(
            comparator.compare_meta(&a, &file(11, 100).unwrap()),
            FileRelation::Different
        );
        assert_eq!(
            comparator.compare_meta(&a, &file(10, 200).unwrap()),
            FileRelation::NeedsContentCheck
        );
    }

    #[test]
    fn test_compare_meta_checksum_always_reads_same_size() {
        let comparator = FileComparator::new(CompareMode::Checksum);
        let a = file(10, 100).unwrap();

        assert_eq!(comparator.compare_meta(&a, &a), FileRelation::NeedsContentCheck);
        assert_eq!(
            comparator.compare_meta(&a, &file(3, 100).unwrap()),
            FileRelation::Different
        );
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let source = listing(&[
            ("same.txt", file(1, 1)),
            ("new.txt", file(1, 1)),
            ("newdir", dir()),
            ("sub", dir()),
            ("flip", file(1, 1)),
            ("fifo", other()),
            ("vanished", None),
        ]);
        let replica = listing(&[
            ("same.txt", file(1, 1)),
            ("stale.txt", file(1, 1)),
            ("olddir", dir()),
            ("sub", dir()),
            ("flip", dir()),
            ("fifo", file(1, 1)),
        ]);

        let result = ComparisonResult::partition(&source, &replica);

        let names = |set: &BTreeSet<OsString>| set.iter().cloned().collect::<Vec<_>>();
        assert_eq!(names(&result.common_files), vec!["same.txt"]);
        assert_eq!(names(&result.common_subdirs), vec!["sub"]);
        assert_eq!(
            result.source_only.keys().cloned().collect::<Vec<_>>(),
            vec!["new.txt", "newdir", "vanished"]
        );
        assert_eq!(
            result.replica_only.keys().cloned().collect::<Vec<_>>(),
            vec!["olddir", "stale.txt"]
        );
        assert_eq!(
            result.type_mismatch.get(std::ffi::OsStr::new("flip")),
            Some(&(EntryKind::File, EntryKind::Dir))
        );
        assert_eq!(names(&result.unclassifiable), vec!["fifo"]);

        // 每个名称恰好出现在一个集合中
        let all: BTreeSet<OsString> = source.keys().chain(replica.keys()).cloned().collect();
        let mut seen = 0;
        for name in &all {
            let hits = [
                result.common_files.contains(name),
                result.common_subdirs.contains(name),
                result.source_only.contains_key(name),
                result.replica_only.contains_key(name),
                result.type_mismatch.contains_key(name),
                result.unclassifiable.contains(name),
            ]
            .iter()
            .filter(|hit| **hit)
            .count();
            assert_eq!(hits, 1, "{:?} must be in exactly one set", name);
            seen += 1;
        }
        assert_eq!(seen, all.len());
        assert!(!result.is_in_sync());
    }

    #[test]
    fn test_identical_listings_are_in_sync() {
        let side = listing(&[("a", file(1, 1)), ("d", dir())]);
        let result = ComparisonResult::partition(&side, &side);
        assert!(result.is_in_sync());
    }

    #[test]
    fn test_compare_mode_from_str() {
        assert_eq!("shallow".parse::<CompareMode>(), Ok(CompareMode::Shallow));
        assert_eq!("Checksum".parse::<CompareMode>(), Ok(CompareMode::Checksum));
        assert!("md5".parse::<CompareMode>().is_err());
    }
}
