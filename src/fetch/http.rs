//! 直链 HTTP 下载器（带重试与指数退避）

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use reqwest::header::{CONTENT_TYPE, REFERER, USER_AGENT};
use reqwest::{Client, StatusCode};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

use super::downloader::{DownloadRequest, Downloader};
use crate::error::FetchError;
use crate::settings::DownloadSettings;

#[derive(Debug, Clone)]
pub struct HttpDownloader {
    http: Client,
    retries: u32,
    backoff_ms: u64,
    backoff_max_ms: u64,
}

impl HttpDownloader {
    pub fn new(profile: &DownloadSettings) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(profile.http_timeout_secs))
            .connect_timeout(Duration::from_secs(profile.http_connect_timeout_secs))
            .danger_accept_invalid_certs(profile.no_check_certificates)
            .build()
            .map_err(|e| FetchError::Network(format!("初始化 HTTP 客户端失败: {e}")))?;
        Ok(Self {
            http,
            retries: profile.retries,
            backoff_ms: profile.retry_backoff_ms,
            backoff_max_ms: profile.retry_backoff_max_ms,
        })
    }

    async fn download_with_retries(&self, req: DownloadRequest<'_>) -> Result<(), FetchError> {
        let url = req.track.source_url.as_str();
        let mut attempt = 0;
        loop {
            // 每次尝试都从干净的文件开始
            let _ = tokio::fs::remove_file(req.output).await;

            match self.attempt(url, req.output, req.profile).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.retries && e.is_retryable() => {
                    tracing::debug!(track = %req.track.id, attempt, err = %e, "下载失败，准备重试");
                    sleep_backoff(attempt, self.backoff_ms, self.backoff_max_ms).await;
                    attempt += 1;
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(req.output).await;
                    return Err(e);
                }
            }
        }
    }

    async fn attempt(&self, url: &str, out_path: &Path, profile: &DownloadSettings) -> Result<(), FetchError> {
        let resp = self
            .http
            .get(url)
            .header(REFERER, &profile.referer)
            .header(USER_AGENT, &profile.user_agent)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status));
        }
        let is_html = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/html"));
        if is_html {
            return Err(FetchError::Format(format!("返回的是网页而不是音频: {url}")));
        }

        let mut file = tokio::fs::File::create(out_path).await?;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| FetchError::Network(e.to_string()))?;
            file.write_all(&bytes).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

impl Downloader for HttpDownloader {
    fn download<'a>(&'a self, req: DownloadRequest<'a>) -> BoxFuture<'a, Result<(), FetchError>> {
        self.download_with_retries(req).boxed()
    }
}

fn status_error(status: StatusCode) -> FetchError {
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        FetchError::NotFound(format!("HTTP {status}"))
    } else if is_retryable_status(status) {
        FetchError::Network(format!("HTTP {status}"))
    } else {
        FetchError::Format(format!("HTTP {status}"))
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

async fn sleep_backoff(attempt: u32, base_ms: u64, max_ms: u64) {
    let exp = base_ms.saturating_mul(2u64.saturating_pow(attempt.min(6)));
    let mut ms = exp.min(max_ms);

    // Tiny jitter (0..=250ms) without pulling in RNG deps.
    let jitter = now_ms() % 251;
    ms = ms.saturating_add(jitter).min(max_ms);

    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Track;

    fn profile() -> DownloadSettings {
        DownloadSettings {
            retries: 1,
            retry_backoff_ms: 1,
            retry_backoff_max_ms: 1,
            ..DownloadSettings::default()
        }
    }

    #[tokio::test]
    async fn test_downloads_body_to_output() {
        let mut server = mockito::Server::new_async().await;
        let body = b"OggS-and-some-audio".to_vec();
        let mock = server
            .mock("GET", "/a.ogg")
            .match_header("referer", "youtube.com")
            .with_status(200)
            .with_header("content-type", "audio/ogg")
            .with_body(body.clone())
            .create_async()
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("direct-x.download");
        let track = Track::from_url(&format!("{}/a.ogg", server.url()), "alice").expect("track");
        let p = profile();
        let dl = HttpDownloader::new(&p).expect("client");
        dl.download(DownloadRequest {
            track: &track,
            output: &out,
            profile: &p,
        })
        .await
        .expect("download");

        mock.assert_async().await;
        assert_eq!(std::fs::read(&out).expect("read"), body);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/gone.mp3")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("direct-y.download");
        let track = Track::from_url(&format!("{}/gone.mp3", server.url()), "bob").expect("track");
        let p = profile();
        let dl = HttpDownloader::new(&p).expect("client");
        let err = dl
            .download(DownloadRequest {
                track: &track,
                output: &out,
                profile: &p,
            })
            .await
            .expect_err("404");

        assert!(matches!(err, FetchError::NotFound(_)));
        mock.assert_async().await;
        assert!(!out.exists());
    }

    #[tokio::test]
    async fn test_server_error_retries_then_fails() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky.webm")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("direct-z.download");
        let track = Track::from_url(&format!("{}/flaky.webm", server.url()), "carol").expect("track");
        let p = profile();
        let dl = HttpDownloader::new(&p).expect("client");
        let err = dl
            .download(DownloadRequest {
                track: &track,
                output: &out,
                profile: &p,
            })
            .await
            .expect_err("503");

        assert!(matches!(err, FetchError::Network(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_html_response_is_format_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/page.mp3")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<html></html>")
            .create_async()
            .await;

        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("direct-w.download");
        let track = Track::from_url(&format!("{}/page.mp3", server.url()), "dave").expect("track");
        let p = profile();
        let dl = HttpDownloader::new(&p).expect("client");
        let err = dl
            .download(DownloadRequest {
                track: &track,
                output: &out,
                profile: &p,
            })
            .await
            .expect_err("html");
        assert!(matches!(err, FetchError::Format(_)));
    }
}
