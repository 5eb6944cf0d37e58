//! 指令来源 ↔ 核心 的消息

use std::fmt;

use crate::domain::{TenantId, Track, VoiceTarget};
use crate::error::QueueError;

/// 用户指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Play(String),
    Skip,
    Stop,
}

/// 一条来自指令来源的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub tenant: TenantId,
    pub requester: String,
    pub command: Command,
    /// 请求者当前所在的语音频道
    pub voice: Option<VoiceTarget>,
}

/// 入队结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub track: Track,
    /// 在待播列表中的位置（从 1 开始）；0 表示立即开始播放
    pub position: usize,
}

/// 对请求的回复；`Display` 即发给用户的单行文本
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Enqueued(Enqueued),
    Skipped(Track),
    Stopped,
    Failed(QueueError),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Enqueued(e) if e.position == 0 => {
                write!(f, "🎶 已加入队列: {}", e.track.source_url)
            }
            Reply::Enqueued(e) => write!(
                f,
                "🎶 已加入队列: {}（第 {} 位）",
                e.track.source_url, e.position
            ),
            Reply::Skipped(track) => write!(f, "⏭️ 已跳过: {}", track.source_url),
            Reply::Stopped => write!(f, "🛑 已停止播放并离开语音频道"),
            Reply::Failed(e) => write!(f, "❌ {e}"),
        }
    }
}
