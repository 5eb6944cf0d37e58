use crate::domain::{TenantId, Track};

use super::tenant::LeaveReason;

/// 核心主动发出的通知，由指令来源转发给用户
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JukeboxEvent {
    NowPlaying {
        tenant: TenantId,
        track: Track,
    },
    TrackFailed {
        tenant: TenantId,
        track: Track,
        reason: String,
    },
    Left {
        tenant: TenantId,
        reason: LeaveReason,
    },
}
