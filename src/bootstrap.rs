//! 按配置组装缓存、下载器、播放输出和清理器

use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheConfig, CacheDirLock, CacheStore, ReferenceSet};
use crate::error::AppError;
use crate::fetch::{Downloader, Fetcher, HttpDownloader, SourceRouter, YtDlpDownloader};
use crate::player::{LocalSink, NullSink, PlaybackSink};
use crate::settings::{JukeboxSettings, SinkKind};
use crate::sweeper::Sweeper;

pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "guild-jukebox", "guild-jukebox")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".guild-jukebox"))
}

/// 命令行对配置文件的覆盖
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub sink: Option<SinkKind>,
    pub idle_timeout_secs: Option<u64>,
    pub scratch: bool,
}

impl Overrides {
    pub fn apply(&self, settings: &mut JukeboxSettings) {
        if let Some(dir) = self.cache_dir.clone() {
            settings.cache_dir = Some(dir);
        }
        if let Some(sink) = self.sink {
            settings.sink = sink;
        }
        if let Some(secs) = self.idle_timeout_secs {
            settings.idle_timeout_secs = secs;
        }
        if self.scratch {
            settings.persist_cache = false;
        }
    }
}

/// 只依赖缓存目录的部分；`sweep`/`wipe` 子命令只需要这些。
/// 持有期间独占缓存目录。
pub struct CacheServices {
    pub lock: CacheDirLock,
    pub refs: ReferenceSet,
    pub cache: CacheStore,
    pub sweeper: Sweeper,
}

impl CacheServices {
    pub fn build(data_dir: &Path, settings: &JukeboxSettings) -> Result<Self, AppError> {
        let dir = settings.cache_dir_or(data_dir);
        // 先锁目录再扫描恢复，恢复会删除暂存文件
        let lock = CacheDirLock::acquire(&dir)?;
        let refs = ReferenceSet::new();
        let profile = settings.download.clone();

        let youtube: Arc<dyn Downloader> = Arc::new(YtDlpDownloader::new(&profile.ytdlp_program));
        let direct: Arc<dyn Downloader> = Arc::new(HttpDownloader::new(&profile)?);
        let router = Arc::new(SourceRouter::new(youtube, direct));
        // 暂存文件与最终文件同目录，提交只需一次 rename
        let fetcher = Fetcher::new(router, dir.clone(), refs.clone(), profile);

        let cache = CacheStore::open(
            CacheConfig {
                dir,
                persist: settings.persist_cache,
                min_file_bytes: settings.min_file_bytes,
            },
            refs.clone(),
            fetcher,
        )?;
        let sweeper = Sweeper::new(cache.clone());
        Ok(Self {
            lock,
            refs,
            cache,
            sweeper,
        })
    }
}

pub fn build_sink(settings: &JukeboxSettings) -> Result<Arc<dyn PlaybackSink>, AppError> {
    let sink: Arc<dyn PlaybackSink> = match settings.sink {
        SinkKind::Null => Arc::new(NullSink::new(Duration::from_secs(
            settings.simulated_track_secs.max(1),
        ))),
        SinkKind::Local => Arc::new(LocalSink::open()?),
    };
    tracing::info!(sink = ?settings.sink, "播放输出已就绪");
    Ok(sink)
}
