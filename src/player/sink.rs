//! 播放输出接口
//!
//! 真正把音频送进语音频道的是外部组件；核心只关心 attach/play/stop
//! 以及异步回传的 finished/error 事件。

use std::path::Path;
use tokio::sync::mpsc;

use crate::domain::{TenantId, VoiceTarget};
use crate::error::{SinkError, TeardownError};

/// 播放连接回传的事件；`play_id` 用来丢弃过期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Finished { play_id: u64 },
    Error { play_id: u64, message: String },
}

pub type SinkEventSender = mpsc::UnboundedSender<SinkEvent>;

pub trait PlaybackSink: Send + Sync {
    /// 连接到某个租户的语音目标
    fn attach(
        &self,
        tenant: &TenantId,
        target: &VoiceTarget,
        events: SinkEventSender,
    ) -> Result<Box<dyn SinkConnection>, SinkError>;
}

pub trait SinkConnection: Send {
    /// 开始播放文件；之前的播放会被直接替换且不再回传事件
    fn play(&mut self, play_id: u64, file: &Path) -> Result<(), SinkError>;

    /// 停止当前播放，不回传 `Finished`
    fn stop(&mut self);

    fn disconnect(self: Box<Self>) -> Result<(), TeardownError>;
}
