use super::{EntryInfo, EntryKind, FileMeta, Storage, TreeCopyStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::{File, Metadata};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use walkdir::WalkDir;

/// 内容比较时的读取块大小
const COMPARE_CHUNK_SIZE: usize = 64 * 1024;

pub struct LocalStorage {
    name: String,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self {
            name: "local".to_string(),
        }
    }

    fn to_meta(metadata: &Metadata) -> FileMeta {
        let kind = if metadata.is_dir() {
            EntryKind::Dir
        } else if metadata.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        FileMeta {
            kind,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified().ok(),
        }
    }

    /// 复制文件并尽量保留源文件的修改时间
    fn copy_file_blocking(from: &Path, to: &Path) -> io::Result<u64> {
        let bytes = std::fs::copy(from, to)?;

        // 保留 mtime 失败不影响复制结果，下次比较时会退回到内容比较
        if let Err(e) = Self::preserve_mtime(from, to) {
            debug!("保留修改时间失败: {:?} - {}", to, e);
        }

        Ok(bytes)
    }

    fn preserve_mtime(from: &Path, to: &Path) -> io::Result<()> {
        let modified = std::fs::metadata(from)?.modified()?;
        let dest = std::fs::OpenOptions::new().write(true).open(to)?;
        dest.set_modified(modified)
    }

    fn copy_tree_blocking(from: &Path, to: &Path) -> Result<TreeCopyStats> {
        let mut stats = TreeCopyStats::default();
        let mut failures: Vec<String> = Vec::new();

        // 跟随链接与元数据获取保持一致；循环链接由 walkdir 报错
        for entry in WalkDir::new(from).follow_links(true) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    failures.push(e.to_string());
                    continue;
                }
            };

            let relative = match entry.path().strip_prefix(from) {
                Ok(r) => r,
                Err(e) => {
                    failures.push(format!("{:?}: {}", entry.path(), e));
                    continue;
                }
            };
            let target: PathBuf = to.join(relative);
            let file_type = entry.file_type();

            let result = if file_type.is_dir() {
                std::fs::create_dir_all(&target).map(|_| stats.dirs += 1)
            } else if file_type.is_file() {
                Self::copy_file_blocking(entry.path(), &target).map(|bytes| {
                    stats.files += 1;
                    stats.bytes += bytes;
                })
            } else {
                debug!("跳过特殊文件: {:?}", entry.path());
                Ok(())
            };

            if let Err(e) = result {
                failures.push(format!("{:?}: {}", entry.path(), e));
            }
        }

        if let Some(first) = failures.first() {
            anyhow::bail!(
                "{} of the entries under {:?} could not be copied (first: {})",
                failures.len(),
                from,
                first
            );
        }

        Ok(stats)
    }

    /// 读满缓冲区或直到 EOF，返回读取的字节数
    fn fill_buf(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn content_eq_blocking(a: &Path, b: &Path) -> io::Result<bool> {
        let mut left = BufReader::new(File::open(a)?);
        let mut right = BufReader::new(File::open(b)?);
        let mut left_buf = vec![0u8; COMPARE_CHUNK_SIZE];
        let mut right_buf = vec![0u8; COMPARE_CHUNK_SIZE];

        loop {
            let n_left = Self::fill_buf(&mut left, &mut left_buf)?;
            let n_right = Self::fill_buf(&mut right, &mut right_buf)?;

            if n_left != n_right || left_buf[..n_left] != right_buf[..n_right] {
                return Ok(false);
            }
            if n_left == 0 {
                return Ok(true);
            }
        }
    }

    fn checksum_blocking(path: &Path) -> io::Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(hasher.finalize().to_hex().to_string())
    }
}

impl Default for LocalStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn list_dir(&self, dir: &Path) -> Result<Vec<EntryInfo>> {
        let mut reader = fs::read_dir(dir)
            .await
            .with_context(|| format!("failed to list {:?}", dir))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .with_context(|| format!("failed to read an entry of {:?}", dir))?
        {
            // 与 stat 语义一致：跟随符号链接
            let meta = match fs::metadata(entry.path()).await {
                Ok(m) => Some(Self::to_meta(&m)),
                Err(e) => {
                    debug!("无法获取元数据: {:?} - {}", entry.path(), e);
                    None
                }
            };

            entries.push(EntryInfo {
                name: entry.file_name(),
                meta,
            });
        }

        Ok(entries)
    }

    async fn stat(&self, path: &Path) -> Result<Option<FileMeta>> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(Some(Self::to_meta(&metadata))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to stat {:?}", path)),
        }
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<u64> {
        let (src, dst) = (from.to_path_buf(), to.to_path_buf());
        let bytes = tokio::task::spawn_blocking(move || Self::copy_file_blocking(&src, &dst))
            .await?
            .with_context(|| format!("failed to copy {:?} to {:?}", from, to))?;
        Ok(bytes)
    }

    async fn copy_tree(&self, from: &Path, to: &Path) -> Result<TreeCopyStats> {
        let (src, dst) = (from.to_path_buf(), to.to_path_buf());
        // 使用 spawn_blocking 避免阻塞 async runtime
        tokio::task::spawn_blocking(move || Self::copy_tree_blocking(&src, &dst)).await?
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)
            .await
            .with_context(|| format!("failed to delete {:?}", path))
    }

    async fn remove_tree(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
            .await
            .with_context(|| format!("failed to delete directory {:?}", path))
    }

    async fn content_eq(&self, a: &Path, b: &Path) -> Result<bool> {
        let (left, right) = (a.to_path_buf(), b.to_path_buf());
        let equal = tokio::task::spawn_blocking(move || Self::content_eq_blocking(&left, &right))
            .await?
            .with_context(|| format!("failed to compare {:?} with {:?}", a, b))?;
        Ok(equal)
    }

    async fn checksum(&self, path: &Path) -> Result<String> {
        let target = path.to_path_buf();
        let hash = tokio::task::spawn_blocking(move || Self::checksum_blocking(&target))
            .await?
            .with_context(|| format!("failed to hash {:?}", path))?;
        Ok(hash)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
