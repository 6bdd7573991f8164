use crate::core::comparator::{CompareMode, ComparisonResult, FileComparator};
use crate::core::scanner::{DirListing, FileScanner, ScanConfig};
use crate::logging::{LogSink, Severity};
use crate::storage::Storage;
use anyhow::{Context, Result};
use serde::Serialize;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 同步配置
#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
    /// 公共文件的比较策略
    pub compare_mode: CompareMode,
    /// 扫描配置
    pub scan_config: ScanConfig,
    /// 只记录计划执行的操作，不修改副本
    pub dry_run: bool,
}

/// 正在比较的一对目录（每一层递归构造一次）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPair {
    pub source: PathBuf,
    pub replica: PathBuf,
}

impl DirectoryPair {
    pub fn new(source: impl Into<PathBuf>, replica: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            replica: replica.into(),
        }
    }

    pub fn child(&self, name: &OsStr) -> Self {
        Self {
            source: self.source.join(name),
            replica: self.replica.join(name),
        }
    }
}

/// 同步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// 用源文件覆盖副本中已变化的文件
    UpdateFile,
    /// 复制仅存在于源中的文件
    CopyFile,
    /// 复制仅存在于源中的整个目录树
    CopyTree,
    /// 删除仅存在于副本中的文件
    DeleteFile,
    /// 删除仅存在于副本中的整个目录树
    DeleteTree,
    /// 比较公共条目
    Compare,
    /// 列出子目录
    Scan,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncAction::UpdateFile => "update",
            SyncAction::CopyFile => "copy",
            SyncAction::CopyTree => "copy directory",
            SyncAction::DeleteFile => "delete",
            SyncAction::DeleteTree => "delete directory",
            SyncAction::Compare => "compare",
            SyncAction::Scan => "scan",
        };
        f.write_str(s)
    }
}

/// 单个条目的处理结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EntryOutcome {
    Applied {
        action: SyncAction,
        path: PathBuf,
    },
    Skipped {
        action: SyncAction,
        path: PathBuf,
        reason: String,
    },
}

impl EntryOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, EntryOutcome::Skipped { .. })
    }

    pub fn path(&self) -> &Path {
        match self {
            EntryOutcome::Applied { path, .. } | EntryOutcome::Skipped { path, .. } => path,
        }
    }
}

/// 同步状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    /// 有条目被跳过，下一轮会重试
    Partial,
    DryRun,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status: SyncStatus,
    pub dirs_visited: u32,
    pub files_updated: u32,
    pub files_copied: u32,
    pub trees_copied: u32,
    pub files_deleted: u32,
    pub trees_deleted: u32,
    pub entries_skipped: u32,
    pub bytes_copied: u64,
    pub duration_ms: u64,
    pub outcomes: Vec<EntryOutcome>,
}

impl SyncReport {
    fn new(dry_run: bool) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            start_time: chrono::Utc::now().timestamp(),
            end_time: 0,
            status: if dry_run {
                SyncStatus::DryRun
            } else {
                SyncStatus::Completed
            },
            dirs_visited: 0,
            files_updated: 0,
            files_copied: 0,
            trees_copied: 0,
            files_deleted: 0,
            trees_deleted: 0,
            entries_skipped: 0,
            bytes_copied: 0,
            duration_ms: 0,
            outcomes: Vec::new(),
        }
    }

    /// 修改副本的操作数（dry-run 时为计划数）
    pub fn mutations(&self) -> u32 {
        self.files_updated
            + self.files_copied
            + self.trees_copied
            + self.files_deleted
            + self.trees_deleted
    }

    pub fn skipped(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.outcomes.iter().filter(|o| o.is_skipped())
    }

    fn summary_line(&self) -> String {
        let prefix = if self.status == SyncStatus::DryRun {
            "[dry-run] "
        } else {
            ""
        };

        if self.mutations() == 0 && self.entries_skipped == 0 {
            return format!(
                "{}Synchronization run {} finished in {} ms: replica is up to date ({} directories checked)",
                prefix, self.run_id, self.duration_ms, self.dirs_visited
            );
        }

        format!(
            "{}Synchronization run {} finished in {} ms: {} updated, {} copied, {} directories copied, {} deleted, {} directories deleted, {} skipped ({} directories checked)",
            prefix,
            self.run_id,
            self.duration_ms,
            self.files_updated,
            self.files_copied,
            self.trees_copied,
            self.files_deleted,
            self.trees_deleted,
            self.entries_skipped,
            self.dirs_visited
        )
    }
}

/// 一次同步运行的记录状态
struct RunContext<'a> {
    sink: &'a dyn LogSink,
    report: SyncReport,
}

impl<'a> RunContext<'a> {
    fn applied(&mut self, action: SyncAction, path: PathBuf, message: String, bytes: u64) {
        let message = if self.report.status == SyncStatus::DryRun {
            format!("[dry-run] {}", message)
        } else {
            message
        };
        self.sink.record(Severity::Info, &message);

        match action {
            SyncAction::UpdateFile => self.report.files_updated += 1,
            SyncAction::CopyFile => self.report.files_copied += 1,
            SyncAction::CopyTree => self.report.trees_copied += 1,
            SyncAction::DeleteFile => self.report.files_deleted += 1,
            SyncAction::DeleteTree => self.report.trees_deleted += 1,
            SyncAction::Compare | SyncAction::Scan => {}
        }
        self.report.bytes_copied += bytes;
        self.report.outcomes.push(EntryOutcome::Applied { action, path });
    }

    fn skipped(&mut self, action: SyncAction, path: PathBuf, reason: String) {
        warn!("{} 失败，跳过: {:?} - {}", action, path, reason);
        self.sink.record(
            Severity::Debug,
            &format!("Failed to {} {}: {}", action, path.display(), reason),
        );

        self.report.entries_skipped += 1;
        if self.report.status == SyncStatus::Completed {
            self.report.status = SyncStatus::Partial;
        }
        self.report.outcomes.push(EntryOutcome::Skipped {
            action,
            path,
            reason,
        });
    }
}

/// 同步引擎：单向镜像源目录树到副本目录树
pub struct Reconciler {
    storage: Arc<dyn Storage>,
    scanner: FileScanner,
    comparator: FileComparator,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::with_config(storage, SyncConfig::default())
    }

    pub fn with_config(storage: Arc<dyn Storage>, config: SyncConfig) -> Self {
        Self {
            storage,
            scanner: FileScanner::with_config(config.scan_config),
            comparator: FileComparator::new(config.compare_mode),
            dry_run: config.dry_run,
        }
    }

    /// 运行一次完整同步
    ///
    /// 单个条目的失败只记录并跳过；只有根目录无法读取时返回错误。
    /// 符号链接会被跟随，链接成环的目录树可能导致不终止。
    /// 只存在于副本中的失效链接按已消失处理，不会被删除，每次运行都以 Partial 结束。
    pub async fn reconcile(
        &self,
        source_root: &Path,
        replica_root: &Path,
        sink: &dyn LogSink,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        let mut run = RunContext {
            sink,
            report: SyncReport::new(self.dry_run),
        };

        info!(
            "开始同步: {:?} -> {:?} (run {}, 比较策略 {}, 存储 {})",
            source_root,
            replica_root,
            run.report.run_id,
            self.comparator.mode(),
            self.storage.name()
        );

        let root = DirectoryPair::new(source_root, replica_root);
        let (source, replica) = self
            .scan_pair(&root)
            .await
            .context("failed to scan the synchronization roots")?;

        // 显式工作栈代替递归；逆序压栈保证按名称顺序处理
        let mut worklist = self
            .reconcile_pair(&root, &source, &replica, &mut run)
            .await;
        worklist.reverse();

        while let Some(pair) = worklist.pop() {
            let (source, replica) = match self.scan_pair(&pair).await {
                Ok(listings) => listings,
                Err(e) => {
                    run.skipped(SyncAction::Scan, pair.source.clone(), format!("{:#}", e));
                    continue;
                }
            };

            let mut subdirs = self
                .reconcile_pair(&pair, &source, &replica, &mut run)
                .await;
            subdirs.reverse();
            worklist.extend(subdirs);
        }

        let mut report = run.report;
        report.end_time = chrono::Utc::now().timestamp();
        report.duration_ms = started.elapsed().as_millis() as u64;
        sink.record(Severity::Info, &report.summary_line());

        debug!(
            "同步完成: run {} - 更新 {}, 复制 {}, 删除 {}, 跳过 {}",
            report.run_id,
            report.files_updated,
            report.files_copied + report.trees_copied,
            report.files_deleted + report.trees_deleted,
            report.entries_skipped
        );

        Ok(report)
    }

    async fn scan_pair(&self, pair: &DirectoryPair) -> Result<(DirListing, DirListing)> {
        let source = self
            .scanner
            .scan_dir(self.storage.as_ref(), &pair.source)
            .await?;
        let replica = self
            .scanner
            .scan_dir(self.storage.as_ref(), &pair.replica)
            .await?;
        Ok((source, replica))
    }

    /// 处理一层目录，返回需要继续下探的公共子目录
    async fn reconcile_pair(
        &self,
        pair: &DirectoryPair,
        source: &DirListing,
        replica: &DirListing,
        run: &mut RunContext<'_>,
    ) -> Vec<DirectoryPair> {
        run.report.dirs_visited += 1;

        let result: ComparisonResult = self
            .comparator
            .compare_dirs(
                self.storage.as_ref(),
                &pair.source,
                &pair.replica,
                source,
                replica,
            )
            .await;

        if result.is_in_sync() {
            debug!("目录已同步: {:?}", pair.replica);
        }

        for (name, reason) in &result.compare_failures {
            run.skipped(SyncAction::Compare, pair.source.join(name), reason.clone());
        }
        for name in &result.unclassifiable {
            run.skipped(
                SyncAction::Compare,
                pair.source.join(name),
                "entry is neither a regular file nor a directory on both sides".to_string(),
            );
        }

        // 更新
        for name in &result.changed_files {
            self.update_file(pair, name, run).await;
        }

        // 同名但类型不同：先删除副本条目，再复制源条目
        for name in result.type_mismatch.keys() {
            if self.prune_entry(pair, name, run).await {
                self.propagate_entry(pair, name, run).await;
            }
        }

        // 正向：复制仅存在于源中的条目
        for name in result.source_only.keys() {
            self.propagate_entry(pair, name, run).await;
        }

        // 反向：删除仅存在于副本中的条目
        for name in result.replica_only.keys() {
            self.prune_entry(pair, name, run).await;
        }

        result
            .common_subdirs
            .iter()
            .map(|name| pair.child(name))
            .collect()
    }

    async fn update_file(&self, pair: &DirectoryPair, name: &OsStr, run: &mut RunContext<'_>) {
        let from = pair.source.join(name);
        let to = pair.replica.join(name);

        let bytes = if self.dry_run {
            Ok(0)
        } else {
            self.storage.copy_file(&from, &to).await
        };

        match bytes {
            Ok(bytes) => run.applied(
                SyncAction::UpdateFile,
                to,
                format!(
                    "{} in {} has been updated in {}",
                    name.to_string_lossy(),
                    pair.source.display(),
                    pair.replica.display()
                ),
                bytes,
            ),
            Err(e) => run.skipped(SyncAction::UpdateFile, from, format!("{:#}", e)),
        }
    }

    /// 复制源条目到副本；复制前重新检查类型
    async fn propagate_entry(&self, pair: &DirectoryPair, name: &OsStr, run: &mut RunContext<'_>) {
        let from = pair.source.join(name);
        let to = pair.replica.join(name);

        let meta = match self.storage.stat(&from).await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                run.skipped(
                    SyncAction::CopyFile,
                    from,
                    "entry vanished before it could be copied".to_string(),
                );
                return;
            }
            Err(e) => {
                run.skipped(SyncAction::CopyFile, from, format!("{:#}", e));
                return;
            }
        };

        if meta.is_dir() {
            let copied = if self.dry_run {
                Ok(0)
            } else {
                self.storage.copy_tree(&from, &to).await.map(|s| s.bytes)
            };
            match copied {
                Ok(bytes) => run.applied(
                    SyncAction::CopyTree,
                    to.clone(),
                    format!("Copying {} to {}", from.display(), to.display()),
                    bytes,
                ),
                Err(e) => run.skipped(SyncAction::CopyTree, from, format!("{:#}", e)),
            }
        } else if meta.is_file() {
            let copied = if self.dry_run {
                Ok(0)
            } else {
                self.storage.copy_file(&from, &to).await
            };
            match copied {
                Ok(bytes) => run.applied(
                    SyncAction::CopyFile,
                    to,
                    format!(
                        "Copying {} to {}",
                        name.to_string_lossy(),
                        pair.replica.display()
                    ),
                    bytes,
                ),
                Err(e) => run.skipped(SyncAction::CopyFile, from, format!("{:#}", e)),
            }
        } else {
            run.skipped(
                SyncAction::CopyFile,
                from,
                "entry is neither a regular file nor a directory".to_string(),
            );
        }
    }

    /// 删除副本条目；删除前重新检查类型，返回是否已删除
    async fn prune_entry(
        &self,
        pair: &DirectoryPair,
        name: &OsStr,
        run: &mut RunContext<'_>,
    ) -> bool {
        let target = pair.replica.join(name);

        let meta = match self.storage.stat(&target).await {
            Ok(Some(meta)) => meta,
            Ok(None) => {
                run.skipped(
                    SyncAction::DeleteFile,
                    target,
                    "entry vanished before it could be deleted".to_string(),
                );
                return false;
            }
            Err(e) => {
                run.skipped(SyncAction::DeleteFile, target, format!("{:#}", e));
                return false;
            }
        };

        let action = if meta.is_dir() {
            SyncAction::DeleteTree
        } else if meta.is_file() {
            SyncAction::DeleteFile
        } else {
            run.skipped(
                SyncAction::DeleteFile,
                target,
                "entry is neither a regular file nor a directory".to_string(),
            );
            return false;
        };

        let removed = if self.dry_run {
            Ok(())
        } else if action == SyncAction::DeleteTree {
            self.storage.remove_tree(&target).await
        } else {
            self.storage.remove_file(&target).await
        };

        match removed {
            Ok(()) => {
                run.applied(
                    action,
                    target,
                    format!(
                        "{} has been deleted from {}",
                        name.to_string_lossy(),
                        pair.replica.display()
                    ),
                    0,
                );
                true
            }
            Err(e) => {
                run.skipped(action, target, format!("{:#}", e));
                false
            }
        }
    }
}
