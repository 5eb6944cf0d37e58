//! yt-dlp 子进程下载器

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use super::downloader::{DownloadRequest, Downloader};
use crate::error::FetchError;

/// stderr 只保留最后这么多字节进入错误信息
const STDERR_TAIL: usize = 400;

#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    program: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, req: &DownloadRequest<'_>) -> Command {
        let p = req.profile;
        let mut cmd = Command::new(&self.program);
        cmd.arg("--format")
            .arg(&p.format)
            .arg("--no-playlist")
            .arg("--no-warnings")
            .arg("--prefer-free-formats")
            .arg("--no-progress")
            .arg("--add-header")
            .arg(format!("referer:{}", p.referer))
            .arg("--add-header")
            .arg(format!("user-agent:{}", p.user_agent));
        if p.no_check_certificates {
            cmd.arg("--no-check-certificates");
        }
        cmd.arg("--output")
            .arg(req.output)
            .arg("--")
            .arg(&req.track.source_url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Downloader for YtDlpDownloader {
    fn download<'a>(&'a self, req: DownloadRequest<'a>) -> BoxFuture<'a, Result<(), FetchError>> {
        async move {
            let output = self
                .command(&req)
                .output()
                .await
                .map_err(|e| FetchError::Network(format!("启动 {} 失败: {e}", self.program.display())))?;

            if output.status.success() {
                return Ok(());
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_stderr(&stderr))
        }
        .boxed()
    }
}

fn classify_stderr(stderr: &str) -> FetchError {
    let tail = stderr_tail(stderr);
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("requested format is not available") || lower.contains("no video formats") {
        FetchError::Format(tail)
    } else if lower.contains("video unavailable")
        || lower.contains("private video")
        || lower.contains("http error 404")
        || lower.contains("has been removed")
    {
        FetchError::NotFound(tail)
    } else {
        FetchError::Network(tail)
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let start = trimmed
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| trimmed.len() - i <= STDERR_TAIL)
        .unwrap_or(trimmed.len());
    trimmed[start..].replace('\n', " | ")
}
