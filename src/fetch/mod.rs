mod downloader;
mod fetcher;
mod http;
mod ytdlp;

pub use downloader::{DownloadRequest, Downloader, SourceRouter};
pub use fetcher::{Fetcher, STAGING_EXTENSION, StagedFile, staging_path};
pub use http::HttpDownloader;
pub use ytdlp::YtDlpDownloader;
