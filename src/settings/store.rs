use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;

/// 播放输出后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// 不出声，按固定时长模拟播放
    Null,
    /// 本机声卡（rodio）
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JukeboxSettings {
    // 缓存设置
    /// 缓存目录（默认 `{data_dir}/audio_cache`）
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// true: 下载结果作为永久缓存跨播放复用；false: 播完即删
    #[serde(default = "default_persist_cache")]
    pub persist_cache: bool,
    #[serde(default = "default_min_file_bytes")]
    pub min_file_bytes: u64,

    // 计时设置
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_full_wipe_interval_hours")]
    pub full_wipe_interval_hours: u64,

    // 播放设置
    #[serde(default = "default_sink")]
    pub sink: SinkKind,
    /// Null 输出下每首歌的模拟时长
    #[serde(default = "default_simulated_track_secs")]
    pub simulated_track_secs: u64,

    #[serde(default)]
    pub download: DownloadSettings,
}

/// 下载配置：固定的请求画像，不随单次请求变化
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub ytdlp_program: String,
    /// yt-dlp `-f` 参数；251 是 opus/webm
    pub format: String,
    pub referer: String,
    pub user_agent: String,
    pub no_check_certificates: bool,
    pub http_timeout_secs: u64,
    pub http_connect_timeout_secs: u64,
    /// None 表示按 CPU 数自动决定
    pub concurrency: Option<usize>,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            ytdlp_program: "yt-dlp".to_owned(),
            format: "251/bestaudio".to_owned(),
            referer: "youtube.com".to_owned(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3".to_owned(),
            no_check_certificates: true,
            http_timeout_secs: 30,
            http_connect_timeout_secs: 10,
            concurrency: None,
            retries: 2,
            retry_backoff_ms: 250,
            retry_backoff_max_ms: 2_000,
        }
    }
}

impl Default for JukeboxSettings {
    fn default() -> Self {
        Self {
            cache_dir: None,
            persist_cache: default_persist_cache(),
            min_file_bytes: default_min_file_bytes(),
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            full_wipe_interval_hours: default_full_wipe_interval_hours(),
            sink: default_sink(),
            simulated_track_secs: default_simulated_track_secs(),
            download: DownloadSettings::default(),
        }
    }
}

// 默认值函数（用于 serde default）
fn default_persist_cache() -> bool { true }
fn default_min_file_bytes() -> u64 { 1024 }
fn default_idle_timeout_secs() -> u64 { 5 * 60 }
fn default_sweep_interval_secs() -> u64 { 10 * 60 }
fn default_full_wipe_interval_hours() -> u64 { 3 * 24 }
fn default_sink() -> SinkKind { SinkKind::Null }
fn default_simulated_track_secs() -> u64 { 5 }

impl JukeboxSettings {
    pub fn cache_dir_or(&self, data_dir: &Path) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| data_dir.join("audio_cache"))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn full_wipe_interval(&self) -> Duration {
        Duration::from_secs(self.full_wipe_interval_hours.max(1) * 60 * 60)
    }
}

pub fn load_settings(data_dir: &Path) -> JukeboxSettings {
    let p = settings_path(data_dir);
    let Ok(bytes) = fs::read(&p) else {
        return JukeboxSettings::default();
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        tracing::warn!(path = %p.display(), err = %e, "配置文件解析失败，使用默认配置");
        JukeboxSettings::default()
    })
}

pub fn save_settings(data_dir: &Path, s: &JukeboxSettings) -> std::io::Result<()> {
    fs::create_dir_all(data_dir)?;
    let bytes = serde_json::to_vec_pretty(s).map_err(std::io::Error::other)?;
    let mut tmp = NamedTempFile::new_in(data_dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(settings_path(data_dir))
        .map_err(|e| e.error)?;
    Ok(())
}

fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}
