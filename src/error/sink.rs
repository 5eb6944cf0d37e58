//! 播放输出相关错误

use std::path::PathBuf;

/// 播放输出错误类型
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// 连接语音目标失败
    #[error("连接语音频道失败({target}): {reason}")]
    Attach { target: String, reason: String },

    /// 打开音频文件失败
    #[error("打开音频文件失败({path}): {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 解码失败
    #[error("解码音频失败({path}): {reason}")]
    Decode { path: PathBuf, reason: String },

    /// 音频输出设备不可用
    #[error("音频输出不可用: {0}")]
    Device(String),

    /// 连接已断开
    #[error("播放连接已关闭")]
    Closed,
}
