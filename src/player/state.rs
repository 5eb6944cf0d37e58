//! 单个租户的队列状态

use std::collections::VecDeque;

use crate::cache::CacheHandle;
use crate::core::infra::IdleTimer;
use crate::domain::{TenantId, Track, TrackId, VoiceTarget};
use crate::messages::{QueueSnapshot, QueueStateKind};

/// 正在播放的歌曲；`file` 持有播放引用直到释放
#[derive(Debug)]
pub struct NowPlaying {
    pub track: Track,
    pub file: CacheHandle,
    pub play_id: u64,
}

#[derive(Debug)]
pub enum QueueState {
    Idle,
    /// 等待缓存/下载结果；`resolve_id` 对不上的结果一律丢弃
    Joining { track: Track, resolve_id: u64 },
    Playing(NowPlaying),
    Draining,
}

impl QueueState {
    pub fn kind(&self) -> QueueStateKind {
        match self {
            QueueState::Idle => QueueStateKind::Idle,
            QueueState::Joining { .. } => QueueStateKind::Joining,
            QueueState::Playing(_) => QueueStateKind::Playing,
            QueueState::Draining => QueueStateKind::Draining,
        }
    }
}

#[derive(Debug)]
pub struct TenantQueue {
    pub tenant: TenantId,
    pub voice: Option<VoiceTarget>,
    pub songs: VecDeque<Track>,
    pub state: QueueState,
    pub idle: IdleTimer,
}

impl TenantQueue {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            voice: None,
            songs: VecDeque::new(),
            state: QueueState::Idle,
            idle: IdleTimer::new(),
        }
    }

    pub fn current_track(&self) -> Option<&Track> {
        match &self.state {
            QueueState::Joining { track, .. } => Some(track),
            QueueState::Playing(now) => Some(&now.track),
            QueueState::Idle | QueueState::Draining => None,
        }
    }

    pub fn current_file(&self) -> Option<&CacheHandle> {
        match &self.state {
            QueueState::Playing(now) => Some(&now.file),
            _ => None,
        }
    }

    /// 仅在 `Playing` 时取出当前歌曲，状态回到 `Idle`
    pub fn take_playing(&mut self) -> Option<NowPlaying> {
        if !matches!(self.state, QueueState::Playing(_)) {
            return None;
        }
        match std::mem::replace(&mut self.state, QueueState::Idle) {
            QueueState::Playing(now) => Some(now),
            _ => None,
        }
    }

    pub fn snapshot(&self, prefetched: Option<&TrackId>, prefetch_failed: Option<&TrackId>) -> QueueSnapshot {
        QueueSnapshot {
            state: self.state.kind(),
            current: self.current_track().cloned(),
            current_file: self.current_file().map(|h| h.path().to_path_buf()),
            pending: self.songs.iter().cloned().collect(),
            idle_timer_armed: self.idle.is_armed(),
            prefetched: prefetched.cloned(),
            prefetch_failed: prefetch_failed.cloned(),
        }
    }
}
