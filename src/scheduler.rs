//! 定时调度：按固定间隔运行同步，同一时间只允许一次运行

use crate::core::{Reconciler, SyncReport};
use crate::logging::{LogSink, Severity};
use anyhow::Result;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

pub struct Scheduler {
    reconciler: Reconciler,
    source_root: PathBuf,
    replica_root: PathBuf,
    interval: Duration,
    sink: Arc<dyn LogSink>,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        reconciler: Reconciler,
        source_root: PathBuf,
        replica_root: PathBuf,
        interval: Duration,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            reconciler,
            source_root,
            replica_root,
            interval,
            sink,
            running: AtomicBool::new(false),
        }
    }

    /// 执行一次同步
    ///
    /// 上一次运行尚未结束时跳过本次触发并返回 None。失败的运行不会立即重试，
    /// 留给下一个周期。
    pub async fn tick(&self) -> Option<Result<SyncReport>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("上一次同步仍在进行，跳过本次触发");
            return None;
        }
        scopeguard::defer! {
            self.running.store(false, Ordering::SeqCst);
        }

        let result = self
            .reconciler
            .reconcile(&self.source_root, &self.replica_root, self.sink.as_ref())
            .await;

        if let Err(e) = &result {
            error!("同步失败，等待下一个周期: {:#}", e);
            self.sink.record(
                Severity::Error,
                &format!("Synchronization run failed: {:#}", e),
            );
        }

        Some(result)
    }

    /// 按间隔循环运行，直到 `shutdown` 完成
    ///
    /// 第一次运行立即开始；运行耗时超过间隔时错过的触发直接丢弃。
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "同步调度已启动: {:?} -> {:?}, 间隔 {} 秒",
            self.source_root,
            self.replica_root,
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("收到退出信号，停止同步调度");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use crate::storage::LocalStorage;
    use tempfile::tempdir;

    fn scheduler(source: PathBuf, replica: PathBuf, sink: Arc<MemorySink>) -> Scheduler {
        Scheduler::new(
            Reconciler::new(Arc::new(LocalStorage::new())),
            source,
            replica,
            Duration::from_secs(1),
            sink,
        )
    }

    #[tokio::test]
    async fn test_tick_skipped_while_running() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(dir.path().join("a"), dir.path().join("b"), sink.clone());

        scheduler.running.store(true, Ordering::SeqCst);
        assert!(scheduler.tick().await.is_none());
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_failed_run_is_logged_and_flag_released() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(dir.path().join("a"), dir.path().join("b"), sink.clone());

        let result = scheduler.tick().await.unwrap();
        assert!(result.is_err());
        assert_eq!(sink.messages(Severity::Error).len(), 1);
        assert!(!scheduler.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_until_runs_first_tick_immediately() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source");
        let replica = dir.path().join("replica");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&replica).unwrap();
        std::fs::write(source.join("a.txt"), b"v1").unwrap();

        let sink = Arc::new(MemorySink::new());
        let scheduler = scheduler(source, replica.clone(), sink.clone());
        scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(300)))
            .await;

        assert_eq!(std::fs::read(replica.join("a.txt")).unwrap(), b"v1");
        let summaries: Vec<_> = sink
            .messages(Severity::Info)
            .into_iter()
            .filter(|m| m.starts_with("Synchronization run"))
            .collect();
        assert_eq!(summaries.len(), 1);
    }
}
