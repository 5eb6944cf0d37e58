//! tracing 初始化：按天滚动的日志文件，外加 stderr 上的告警

use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const DEFAULT_FILTER: &str = "info,reqwest=warn,hyper=warn";
const LOG_FILE_PREFIX: &str = "guild-jukebox.log";

/// 持有到进程退出，保证缓冲的日志写完
pub struct LogGuard {
    _file: Option<WorkerGuard>,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    pub dir: Option<PathBuf>,
    pub filter: Option<String>,
    /// 同时把 WARN 及以上输出到 stderr
    pub stderr_warnings: bool,
}

fn resolve_dir(data_dir: &Path, dir: Option<PathBuf>) -> PathBuf {
    let wanted = dir.unwrap_or_else(|| data_dir.join("logs"));
    if fs::create_dir_all(&wanted).is_ok() {
        return wanted;
    }
    let fallback = std::env::temp_dir().join("guild-jukebox-logs");
    let _ = fs::create_dir_all(&fallback);
    fallback
}

fn build_filter(filter: Option<String>) -> EnvFilter {
    match filter {
        Some(s) if !s.trim().is_empty() => EnvFilter::new(s),
        _ => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    }
}

pub fn init(data_dir: &Path, cfg: LogConfig) -> LogGuard {
    let log_dir = resolve_dir(data_dir, cfg.dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(true)
        .with_writer(file_writer)
        .with_filter(build_filter(cfg.filter));

    let stderr_layer = cfg.stderr_warnings.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(LevelFilter::WARN)
    });

    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init();
    tracing::info!(log_dir = %log_dir.display(), "tracing 已初始化");

    LogGuard {
        _file: Some(guard),
        dir: log_dir,
    }
}
