//! 下载相关错误

/// 外部下载器失败的分类
///
/// 会通过 single-flight 扇出给所有等待者，因此是 `Clone` 的，只保存原因字符串。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// 网络或下载器进程失败
    #[error("网络错误: {0}")]
    Network(String),

    /// 资源不存在（HTTP 404、视频不可用）
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 没有可用的音频格式，或下载结果不是音频
    #[error("格式不可用: {0}")]
    Format(String),

    /// 写入暂存文件失败
    #[error("写入暂存文件失败: {0}")]
    Io(String),

    /// 下载任务在完成前被丢弃
    #[error("下载任务已中断")]
    Aborted,
}

impl FetchError {
    /// HTTP 下载器据此决定是否重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Io(_))
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Io(e.to_string())
    }
}
