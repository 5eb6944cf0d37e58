//! 进程级引用集合
//!
//! 记录当前不允许删除的路径：正在播放、正在下载、以及永久缓存条目。
//! 所有删除都经过 [`ReferenceSet::remove_if_unreferenced`]，检查与删除在同一把锁内完成。

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// 下载器写文件时会产生的旁路文件后缀（yt-dlp 的 `.part` / `.ytdl`）
const SIDE_SUFFIXES: &[&str] = &[".part", ".ytdl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    Playback,
    Download,
    Prefetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// 常规清理：永久缓存条目也受保护
    KeepPermanent,
    /// 全量清理：只保护正在使用的文件
    IgnorePermanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    Removed { bytes: u64 },
    Referenced,
    Missing,
}

#[derive(Debug, Default)]
struct RefState {
    pins: usize,
    permanent: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReferenceSet {
    inner: Arc<Mutex<HashMap<PathBuf, RefState>>>,
}

impl ReferenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, RefState>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 登记一个使用中的引用，guard 释放时自动撤销
    pub fn pin(&self, path: impl Into<PathBuf>, kind: PinKind) -> PinGuard {
        let path = path.into();
        self.lock().entry(path.clone()).or_default().pins += 1;
        tracing::trace!(path = %path.display(), ?kind, "pin");
        PinGuard {
            refs: self.clone(),
            path,
            kind,
        }
    }

    pub fn mark_permanent(&self, path: &Path) {
        self.lock().entry(path.to_path_buf()).or_default().permanent = true;
    }

    pub fn unmark_permanent(&self, path: &Path) {
        let mut map = self.lock();
        if let Some(st) = map.get_mut(path) {
            st.permanent = false;
            if st.pins == 0 {
                map.remove(path);
            }
        }
    }

    pub fn is_permanent(&self, path: &Path) -> bool {
        self.lock().get(path).is_some_and(|st| st.permanent)
    }

    pub fn is_pinned(&self, path: &Path) -> bool {
        self.lock().get(path).is_some_and(|st| st.pins > 0)
    }

    /// 所有使用中引用的总数（不含永久标记）
    pub fn pin_count(&self) -> usize {
        self.lock().values().map(|st| st.pins).sum()
    }

    pub fn is_referenced(&self, path: &Path) -> bool {
        protects(&self.lock(), path, DeletePolicy::KeepPermanent)
    }

    /// 在锁内检查引用并删除文件；删除成功后才撤销永久标记。
    pub fn remove_if_unreferenced(&self, path: &Path, policy: DeletePolicy) -> io::Result<Removal> {
        let mut map = self.lock();
        if protects(&map, path, policy) {
            return Ok(Removal::Referenced);
        }

        let bytes = match fs::metadata(path) {
            Ok(md) => md.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                map.remove(path);
                return Ok(Removal::Missing);
            }
            Err(e) => return Err(e),
        };
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                map.remove(path);
                return Ok(Removal::Missing);
            }
            Err(e) => return Err(e),
        }
        map.remove(path);
        Ok(Removal::Removed { bytes })
    }

    fn unpin(&self, path: &Path) {
        let mut map = self.lock();
        if let Some(st) = map.get_mut(path) {
            st.pins = st.pins.saturating_sub(1);
            if st.pins == 0 && !st.permanent {
                map.remove(path);
            }
        }
    }
}

fn protects(map: &HashMap<PathBuf, RefState>, path: &Path, policy: DeletePolicy) -> bool {
    let check = |p: &Path| {
        map.get(p).is_some_and(|st| {
            st.pins > 0 || (policy == DeletePolicy::KeepPermanent && st.permanent)
        })
    };
    if check(path) {
        return true;
    }
    owner_of_side_file(path).is_some_and(|owner| check(&owner))
}

fn owner_of_side_file(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let base = SIDE_SUFFIXES.iter().find_map(|s| name.strip_suffix(s))?;
    Some(path.with_file_name(base))
}

/// 引用 guard；drop 时撤销对应的引用计数
#[derive(Debug)]
pub struct PinGuard {
    refs: ReferenceSet,
    path: PathBuf,
    kind: PinKind,
}

impl PinGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> PinKind {
        self.kind
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.refs.unpin(&self.path);
        tracing::trace!(path = %self.path.display(), kind = ?self.kind, "unpin");
    }
}
