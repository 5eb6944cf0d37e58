//! 缓存相关错误

use super::FetchError;

/// 缓存操作错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// 缓存目录不可用
    #[error("缓存目录不可用: {0}")]
    DirUnavailable(String),

    /// 下载失败
    #[error("下载失败: {0}")]
    Fetch(#[from] FetchError),

    /// 文件未通过校验（大小或容器头）
    #[error("缓存文件损坏({track}): {reason}")]
    Corrupt { track: String, reason: String },

    /// 提交暂存文件失败
    #[error("提交暂存文件失败: {0}")]
    Commit(String),

    /// 另一个进程正在使用该缓存目录
    #[error("缓存目录正被另一个进程使用: {0}")]
    Locked(String),
}

impl CacheError {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, CacheError::Corrupt { .. })
    }
}
