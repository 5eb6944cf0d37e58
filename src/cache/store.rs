//! 内容寻址的音频缓存
//!
//! 每个 track id 至多一个文件：`{stem}.bin`。命中时先校验再返回，
//! 校验失败的文件会被删除并按未命中处理。未命中时经 [`Fetcher`] 下载、
//! 校验、改名提交；同一 id 的并发 `materialize` 合并成一次。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::refs::{DeletePolicy, PinGuard, PinKind, ReferenceSet, Removal};
use super::validate::{Container, Invalid, Validator};
use crate::core::infra::SingleFlight;
use crate::domain::{Track, TrackId};
use crate::error::{CacheError, FetchError};
use crate::fetch::{Fetcher, STAGING_EXTENSION};

pub const CACHE_EXTENSION: &str = "bin";

/// 未命中时下载结果校验失败后最多再下载几次；命中的文件损坏时只重新下载一次
const CORRUPT_RETRIES: u32 = 1;

/// 查找结果；`Purged` 表示命中的文件校验失败并已删除
enum Lookup {
    Hit(CacheHandle),
    Miss,
    Purged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub track_id: TrackId,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub container: Container,
    pub validated: bool,
    /// 永久条目跨播放、跨租户、跨重启复用；否则播完即删
    pub permanent: bool,
}

/// 已校验的缓存文件；持有期间文件受引用保护
#[derive(Debug)]
pub struct CacheHandle {
    entry: Arc<CacheEntry>,
    pin: PinGuard,
}

impl CacheHandle {
    pub fn entry(&self) -> &CacheEntry {
        &self.entry
    }

    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    pub fn track_id(&self) -> &TrackId {
        &self.entry.track_id
    }

    pub fn is_permanent(&self) -> bool {
        self.entry.permanent
    }

    pub fn pin_kind(&self) -> PinKind {
        self.pin.kind()
    }
}

/// single-flight 扇出的结果；共享的引用在所有等待者各自登记后才释放
#[derive(Debug, Clone)]
struct Materialized {
    entry: Arc<CacheEntry>,
    pin: Arc<PinGuard>,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub dir: PathBuf,
    pub persist: bool,
    pub min_file_bytes: u64,
}

/// 启动时扫描缓存目录的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub entries: usize,
    pub removed: usize,
}

struct Inner {
    dir: PathBuf,
    persist: bool,
    refs: ReferenceSet,
    fetcher: Fetcher,
    validator: Validator,
    entries: Mutex<HashMap<TrackId, Arc<CacheEntry>>>,
    flights: SingleFlight<TrackId, Result<Materialized, CacheError>>,
}

#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<Inner>,
}

impl CacheStore {
    pub fn open(cfg: CacheConfig, refs: ReferenceSet, fetcher: Fetcher) -> Result<Self, CacheError> {
        fs::create_dir_all(&cfg.dir)
            .map_err(|e| CacheError::DirUnavailable(format!("{}: {e}", cfg.dir.display())))?;

        let store = Self {
            inner: Arc::new(Inner {
                dir: cfg.dir,
                persist: cfg.persist,
                refs,
                fetcher,
                validator: Validator::new(cfg.min_file_bytes),
                entries: Mutex::new(HashMap::new()),
                flights: SingleFlight::new(),
            }),
        };
        let report = store.recover();
        tracing::info!(
            dir = %store.inner.dir.display(),
            persist = store.inner.persist,
            entries = report.entries,
            removed = report.removed,
            "缓存目录已就绪"
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn refs(&self) -> &ReferenceSet {
        &self.inner.refs
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.inner.fetcher
    }

    pub fn final_path(&self, id: &TrackId) -> PathBuf {
        self.inner
            .dir
            .join(format!("{}.{CACHE_EXTENSION}", id.file_stem()))
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TrackId, Arc<CacheEntry>>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 持久模式下已有索引（只查内存，不碰磁盘，用于预取判断）。
    /// 临时模式的文件随最后一个引用释放而删除，不算已缓存。
    pub fn is_cached(&self, id: &TrackId) -> bool {
        self.inner.persist && self.entries().contains_key(id)
    }

    pub fn is_in_flight(&self, id: &TrackId) -> bool {
        self.inner.flights.is_running(id) || self.inner.fetcher.is_fetching(id)
    }

    pub fn entry_count(&self) -> usize {
        self.entries().len()
    }

    /// 命中则返回已校验并登记引用的文件；损坏的文件会被删除
    pub fn lookup(&self, id: &TrackId) -> Option<CacheHandle> {
        match self.find(id, PinKind::Playback) {
            Lookup::Hit(handle) => Some(handle),
            Lookup::Miss | Lookup::Purged => None,
        }
    }

    fn find(&self, id: &TrackId, kind: PinKind) -> Lookup {
        let path = self.final_path(id);
        let pin = self.inner.refs.pin(&path, kind);

        match self.inner.validator.check(&path) {
            Ok(v) => {
                let entry = {
                    let mut entries = self.entries();
                    let entry = entries
                        .get(id)
                        .filter(|e| e.size_bytes == v.size_bytes)
                        .cloned()
                        .unwrap_or_else(|| {
                            Arc::new(CacheEntry {
                                track_id: id.clone(),
                                path: path.clone(),
                                size_bytes: v.size_bytes,
                                container: v.container,
                                validated: true,
                                permanent: self.inner.persist,
                            })
                        });
                    entries.insert(id.clone(), Arc::clone(&entry));
                    entry
                };
                if entry.permanent {
                    self.inner.refs.mark_permanent(&path);
                }
                tracing::debug!(track = %id, path = %path.display(), "cache hit");
                Lookup::Hit(CacheHandle { entry, pin })
            }
            Err(Invalid::Missing) => {
                self.entries().remove(id);
                Lookup::Miss
            }
            Err(reason) => {
                drop(pin);
                tracing::warn!(track = %id, path = %path.display(), reason = %reason, phase = "lookup", "缓存文件校验失败，删除后重新下载");
                self.purge(id, &path);
                Lookup::Purged
            }
        }
    }

    /// 解析为本地已校验文件，必要时下载
    pub async fn materialize(&self, track: &Track) -> Result<CacheHandle, CacheError> {
        self.materialize_as(track, PinKind::Playback).await
    }

    /// 同 [`materialize`](Self::materialize)，返回的句柄以 `kind` 登记引用
    pub async fn materialize_as(&self, track: &Track, kind: PinKind) -> Result<CacheHandle, CacheError> {
        let purged = match self.find(&track.id, kind) {
            Lookup::Hit(handle) => return Ok(handle),
            Lookup::Miss => false,
            Lookup::Purged => true,
        };

        let this = self.clone();
        let owned = track.clone();
        let m = self
            .inner
            .flights
            .run(track.id.clone(), move || async move { this.fill(owned, purged).await })
            .await
            .unwrap_or(Err(CacheError::Fetch(FetchError::Aborted)))?;

        let pin = self.inner.refs.pin(&m.entry.path, kind);
        Ok(CacheHandle {
            entry: m.entry,
            pin,
        })
    }

    /// 换一种引用登记同一个文件，旧引用在新引用登记后撤销
    pub fn repin(&self, handle: CacheHandle, kind: PinKind) -> CacheHandle {
        let pin = self.inner.refs.pin(&handle.entry.path, kind);
        CacheHandle {
            entry: handle.entry,
            pin,
        }
    }

    async fn fill(self, track: Track, mut purged: bool) -> Result<Materialized, CacheError> {
        // 上一个 flight 可能刚提交完
        match self.find(&track.id, PinKind::Download) {
            Lookup::Hit(handle) => {
                return Ok(Materialized {
                    entry: Arc::clone(&handle.entry),
                    pin: Arc::new(handle.pin),
                });
            }
            Lookup::Purged => purged = true,
            Lookup::Miss => {}
        }

        let final_path = self.final_path(&track.id);
        let provisional = Arc::new(self.inner.refs.pin(&final_path, PinKind::Download));

        let mut retries_left = if purged { 0 } else { CORRUPT_RETRIES };
        loop {
            let staged = self.inner.fetcher.fetch(&track).await?;

            let validated = match self.inner.validator.check(staged.path()) {
                Ok(v) => v,
                Err(reason) => {
                    let _ = tokio::fs::remove_file(staged.path()).await;
                    tracing::warn!(
                        track = %track.id,
                        reason = %reason,
                        retries_left,
                        purged,
                        phase = "validate",
                        "下载结果校验失败"
                    );
                    if retries_left > 0 {
                        retries_left -= 1;
                        continue;
                    }
                    return Err(CacheError::Corrupt {
                        track: track.id.to_string(),
                        reason: reason.to_string(),
                    });
                }
            };

            tokio::fs::rename(staged.path(), &final_path)
                .await
                .map_err(|e| CacheError::Commit(format!("{}: {e}", final_path.display())))?;
            drop(staged);

            let entry = Arc::new(CacheEntry {
                track_id: track.id.clone(),
                path: final_path.clone(),
                size_bytes: validated.size_bytes,
                container: validated.container,
                validated: true,
                permanent: self.inner.persist,
            });
            if entry.permanent {
                self.inner.refs.mark_permanent(&final_path);
            }
            self.entries().insert(track.id.clone(), Arc::clone(&entry));
            tracing::info!(
                track = %track.id,
                size_bytes = entry.size_bytes,
                container = ?entry.container,
                permanent = entry.permanent,
                "缓存已提交"
            );
            return Ok(Materialized {
                entry,
                pin: provisional,
            });
        }
    }

    /// 释放一个句柄；非永久条目在没有其他引用时立即删除
    pub fn release(&self, handle: CacheHandle) {
        let entry = Arc::clone(&handle.entry);
        drop(handle);
        if entry.permanent {
            return;
        }
        match self
            .inner
            .refs
            .remove_if_unreferenced(&entry.path, DeletePolicy::KeepPermanent)
        {
            Ok(Removal::Removed { bytes }) => {
                self.forget(&entry.path);
                tracing::debug!(track = %entry.track_id, bytes, "临时文件已删除");
            }
            Ok(Removal::Missing) => self.forget(&entry.path),
            Ok(Removal::Referenced) => {}
            Err(e) => {
                tracing::warn!(track = %entry.track_id, path = %entry.path.display(), err = %e, "删除临时文件失败");
            }
        }
    }

    /// 文件被清理删除后同步索引
    pub fn forget(&self, path: &Path) {
        let Some(id) = track_id_of(path) else {
            return;
        };
        let mut entries = self.entries();
        if entries.get(&id).is_some_and(|e| e.path == path) {
            entries.remove(&id);
        }
    }

    fn purge(&self, id: &TrackId, path: &Path) {
        self.entries().remove(id);
        self.inner.refs.unmark_permanent(path);
        match self
            .inner
            .refs
            .remove_if_unreferenced(path, DeletePolicy::IgnorePermanent)
        {
            Ok(Removal::Referenced) => {
                tracing::warn!(track = %id, path = %path.display(), "损坏的缓存文件仍被引用，暂不删除");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(track = %id, path = %path.display(), err = %e, "删除损坏的缓存文件失败"),
        }
    }

    /// 扫描缓存目录重建索引，删除残留的暂存文件和损坏的缓存文件
    fn recover(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let Ok(rd) = fs::read_dir(&self.inner.dir) else {
            return report;
        };

        for ent in rd.flatten() {
            let p = ent.path();
            if !ent.file_type().is_ok_and(|t| t.is_file()) {
                continue;
            }
            let name = ent.file_name();
            let name = name.to_string_lossy();

            if is_staging_name(&name) {
                if matches!(
                    self.inner.refs.remove_if_unreferenced(&p, DeletePolicy::KeepPermanent),
                    Ok(Removal::Removed { .. })
                ) {
                    tracing::info!(path = %p.display(), "删除残留的下载暂存文件");
                    report.removed += 1;
                }
                continue;
            }

            let Some(id) = track_id_of(&p) else {
                continue;
            };
            if !self.inner.persist {
                // 临时模式下上次运行留下的文件没有复用价值
                if matches!(
                    self.inner.refs.remove_if_unreferenced(&p, DeletePolicy::KeepPermanent),
                    Ok(Removal::Removed { .. })
                ) {
                    report.removed += 1;
                }
                continue;
            }
            if self.lookup(&id).is_some() {
                report.entries += 1;
            } else {
                report.removed += 1;
            }
        }
        report
    }
}

fn is_staging_name(name: &str) -> bool {
    let suffix = format!(".{STAGING_EXTENSION}");
    name.ends_with(&suffix)
        || name.ends_with(&format!("{suffix}.part"))
        || name.ends_with(&format!("{suffix}.ytdl"))
}

/// `{stem}.bin` → TrackId
pub fn track_id_of(path: &Path) -> Option<TrackId> {
    if path.extension()? != CACHE_EXTENSION {
        return None;
    }
    TrackId::from_file_stem(path.file_stem()?.to_str()?)
}
