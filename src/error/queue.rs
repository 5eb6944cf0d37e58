//! 队列/租户相关错误

use std::path::PathBuf;

/// 用户可见的队列错误，不改变任何状态
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("无效的链接: {0}")]
    InvalidUrl(String),

    #[error("请先加入一个语音频道")]
    NoVoiceTarget,

    #[error("当前没有正在播放的歌曲")]
    NotPlaying,

    #[error("播放队列为空")]
    EmptyQueue,

    #[error("服务正在关闭")]
    ShuttingDown,
}

/// 拆除租户时的失败；只记录日志，不阻塞拆除
#[derive(Debug, thiserror::Error)]
pub enum TeardownError {
    #[error("断开播放连接失败: {0}")]
    Disconnect(String),

    #[error("删除文件失败({path}): {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
