pub mod local;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::ffi::OsString;
use std::path::Path;
use std::time::SystemTime;

pub use local::LocalStorage;

/// 目录条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
    /// 既不是普通文件也不是目录（设备、FIFO、socket 等）
    Other,
}

/// 文件元数据（用于快速检查）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileMeta {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// 单层目录中的一个条目
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub name: OsString,
    /// 无法获取元数据时为 None（列出后消失、悬空链接、权限不足）
    pub meta: Option<FileMeta>,
}

/// 目录树复制统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeCopyStats {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

/// 文件系统抽象接口
///
/// 同步引擎只通过这个接口访问文件系统，所有路径都是完整路径。
#[async_trait]
pub trait Storage: Send + Sync {
    /// 列出目录的直接子条目（不递归）
    async fn list_dir(&self, dir: &Path) -> Result<Vec<EntryInfo>>;

    /// 获取元数据，不存在时返回 None
    async fn stat(&self, path: &Path) -> Result<Option<FileMeta>>;

    /// 复制单个文件，目标已存在时覆盖，返回复制的字节数
    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64>;

    /// 递归复制整个目录树
    async fn copy_tree(&self, from: &Path, to: &Path) -> Result<TreeCopyStats>;

    /// 删除文件
    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// 递归删除目录
    async fn remove_tree(&self, path: &Path) -> Result<()>;

    /// 逐字节比较两个文件内容
    async fn content_eq(&self, a: &Path, b: &Path) -> Result<bool>;

    /// 计算文件内容的 BLAKE3 hash
    async fn checksum(&self, path: &Path) -> Result<String>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}
