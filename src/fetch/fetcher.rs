//! 下载调度：暂存路径、并发上限、同 id 合并
//!
//! 暂存文件名由 track id 决定（`{stem}.download`），进程崩溃后残留的半成品
//! 下次清理时能被识别并删除。下载开始前就登记引用，清理永远不会删掉它。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use super::downloader::{DownloadRequest, Downloader};
use crate::cache::{PinGuard, PinKind, ReferenceSet};
use crate::core::infra::SingleFlight;
use crate::domain::{Track, TrackId};
use crate::error::FetchError;
use crate::settings::DownloadSettings;

pub const STAGING_EXTENSION: &str = "download";

/// 下载完成、等待提交的暂存文件；持有期间路径受保护
#[derive(Debug, Clone)]
pub struct StagedFile {
    path: PathBuf,
    pin: Arc<PinGuard>,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 多个持有者共享同一个下载引用
    pub fn pin(&self) -> Arc<PinGuard> {
        Arc::clone(&self.pin)
    }
}

struct Inner {
    downloader: Arc<dyn Downloader>,
    staging_dir: PathBuf,
    refs: ReferenceSet,
    profile: DownloadSettings,
    permits: Arc<Semaphore>,
    flights: SingleFlight<TrackId, Result<StagedFile, FetchError>>,
}

#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<Inner>,
}

impl Fetcher {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        staging_dir: PathBuf,
        refs: ReferenceSet,
        profile: DownloadSettings,
    ) -> Self {
        let concurrency = profile.concurrency.filter(|n| *n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        tracing::info!(
            concurrency,
            format = %profile.format,
            staging_dir = %staging_dir.display(),
            "Fetcher 已启动"
        );
        Self {
            inner: Arc::new(Inner {
                downloader,
                staging_dir,
                refs,
                profile,
                permits: Arc::new(Semaphore::new(concurrency)),
                flights: SingleFlight::new(),
            }),
        }
    }

    pub fn staging_path(&self, id: &TrackId) -> PathBuf {
        staging_path(&self.inner.staging_dir, id)
    }

    pub fn is_fetching(&self, id: &TrackId) -> bool {
        self.inner.flights.is_running(id)
    }

    /// 下载 `track` 到暂存路径；同一 id 的并发请求合并为一次下载
    pub async fn fetch(&self, track: &Track) -> Result<StagedFile, FetchError> {
        let this = self.clone();
        let owned = track.clone();
        self.inner
            .flights
            .run(track.id.clone(), move || async move { this.fetch_once(owned).await })
            .await
            .unwrap_or(Err(FetchError::Aborted))
    }

    async fn fetch_once(self, track: Track) -> Result<StagedFile, FetchError> {
        let inner = &self.inner;
        let path = staging_path(&inner.staging_dir, &track.id);
        // 先登记再下载
        let pin = Arc::new(inner.refs.pin(&path, PinKind::Download));

        let _permit = Arc::clone(&inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| FetchError::Aborted)?;

        remove_quietly(&path).await;
        tracing::info!(track = %track.id, url = %track.source_url, phase = "fetch", "开始下载");
        let started = Instant::now();

        let res = inner
            .downloader
            .download(DownloadRequest {
                track: &track,
                output: &path,
                profile: &inner.profile,
            })
            .await;

        let res = match res {
            Ok(()) if tokio::fs::metadata(&path).await.is_ok() => Ok(StagedFile { path, pin }),
            Ok(()) => Err(FetchError::Format("下载器没有生成文件".to_owned())),
            Err(e) => Err(e),
        };

        match &res {
            Ok(staged) => tracing::info!(
                track = %track.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                path = %staged.path.display(),
                phase = "fetch",
                "下载完成"
            ),
            Err(e) => {
                remove_quietly(&staging_path(&inner.staging_dir, &track.id)).await;
                tracing::warn!(track = %track.id, err = %e, phase = "fetch", "下载失败");
            }
        }
        res
    }
}

pub fn staging_path(dir: &Path, id: &TrackId) -> PathBuf {
    dir.join(format!("{}.{STAGING_EXTENSION}", id.file_stem()))
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), err = %e, "删除暂存文件失败"),
    }
}
