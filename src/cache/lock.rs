//! 缓存目录的进程间独占锁
//!
//! 引用集只在进程内有效。`run` 持锁期间，另一个进程的 `sweep`/`wipe`
//! 拿不到锁就直接失败，不会用空引用集去删正在下载或播放的文件。

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use crate::error::CacheError;

/// 锁文件名；清理时跳过
pub const LOCK_FILE_NAME: &str = ".jukebox.lock";

/// 持有期间独占缓存目录，drop 时释放
#[derive(Debug)]
pub struct CacheDirLock {
    _file: File,
    path: PathBuf,
}

impl CacheDirLock {
    pub fn acquire(dir: &Path) -> Result<Self, CacheError> {
        fs::create_dir_all(dir)
            .map_err(|e| CacheError::DirUnavailable(format!("{}: {e}", dir.display())))?;
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| CacheError::DirUnavailable(format!("{}: {e}", path.display())))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(CacheError::Locked(dir.display().to_string()));
            }
            Err(TryLockError::Error(e)) => {
                return Err(CacheError::DirUnavailable(format!("{}: {e}", path.display())));
            }
        }
        tracing::debug!(path = %path.display(), "已锁定缓存目录");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_lock_is_refused_until_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache_dir = dir.path().join("audio_cache");

        let held = CacheDirLock::acquire(&cache_dir).expect("first lock");
        assert!(held.path().is_file());
        let err = CacheDirLock::acquire(&cache_dir).expect_err("already held");
        assert!(matches!(err, CacheError::Locked(_)));

        drop(held);
        CacheDirLock::acquire(&cache_dir).expect("lock after release");
    }
}
