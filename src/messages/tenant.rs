//! 协调器 → 租户 worker 的指令

use std::path::PathBuf;
use tokio::sync::oneshot;

use super::request::Enqueued;
use crate::domain::{Track, TrackId, VoiceTarget};
use crate::error::QueueError;

/// 外部成员变化导致的拆除
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownCause {
    /// 语音频道里只剩机器人自己
    AloneInChannel,
    /// 机器人被踢出或断开
    Disconnected,
    /// 租户（服务器）已移除机器人
    TenantRemoved,
}

/// 租户生命周期结束的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveReason {
    Stopped,
    IdleTimeout,
    Teardown(TeardownCause),
    Shutdown,
}

#[derive(Debug)]
pub enum TenantCommand {
    Enqueue {
        track: Track,
        voice: VoiceTarget,
        reply: oneshot::Sender<Result<Enqueued, QueueError>>,
    },
    Skip {
        reply: oneshot::Sender<Result<Track, QueueError>>,
    },
    Stop {
        reason: LeaveReason,
        reply: Option<oneshot::Sender<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStateKind {
    Idle,
    Joining,
    Playing,
    Draining,
}

/// 某一时刻的队列快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub state: QueueStateKind,
    pub current: Option<Track>,
    pub current_file: Option<PathBuf>,
    pub pending: Vec<Track>,
    pub idle_timer_armed: bool,
    pub prefetched: Option<TrackId>,
    /// 预取失败、轮到时直接跳过的队首
    pub prefetch_failed: Option<TrackId>,
}
