use futures_util::future::BoxFuture;
use std::path::Path;
use std::sync::Arc;

use crate::domain::{SourceKind, Track};
use crate::error::FetchError;
use crate::settings::DownloadSettings;

/// 一次下载请求：把 `track` 写到 `output`
#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest<'a> {
    pub track: &'a Track,
    pub output: &'a Path,
    pub profile: &'a DownloadSettings,
}

/// 外部下载器
///
/// 只承诺一件事：成功返回时 `output` 处已经有一个完整文件。
pub trait Downloader: Send + Sync {
    fn download<'a>(&'a self, req: DownloadRequest<'a>) -> BoxFuture<'a, Result<(), FetchError>>;
}

/// 按来源分发到不同的下载器
pub struct SourceRouter {
    youtube: Arc<dyn Downloader>,
    direct: Arc<dyn Downloader>,
}

impl SourceRouter {
    pub fn new(youtube: Arc<dyn Downloader>, direct: Arc<dyn Downloader>) -> Self {
        Self { youtube, direct }
    }
}

impl Downloader for SourceRouter {
    fn download<'a>(&'a self, req: DownloadRequest<'a>) -> BoxFuture<'a, Result<(), FetchError>> {
        match req.track.id.source() {
            SourceKind::YouTube => self.youtube.download(req),
            SourceKind::Direct => self.direct.download(req),
        }
    }
}
