//! 应用层错误

use super::{CacheError, FetchError, SinkError};

/// 应用顶层错误类型（main 使用）
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// IO 错误
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    /// 播放输出初始化失败
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// 缓存目录初始化失败
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// 下载器初始化失败
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// 数据目录不可用
    #[error("数据目录不可用: {0}")]
    DataDir(String),

    /// 其他错误
    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "文件未找到");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::Io(_)));
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::DataDir("/nonexistent".to_owned());
        assert_eq!(err.to_string(), "数据目录不可用: /nonexistent");
    }
}
