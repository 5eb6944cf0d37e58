//! 每个租户一个 worker task，串行处理指令、播放事件和计时器
//!
//! 队列状态只由这个 task 修改；下载和预取在后台 task 里跑，
//! 结果带着 `resolve_id` 回到这里，对不上就释放掉。

use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;

use super::sink::{PlaybackSink, SinkConnection, SinkEvent};
use super::state::{NowPlaying, QueueState, TenantQueue};
use crate::cache::{CacheHandle, CacheStore, PinKind};
use crate::domain::{TenantId, Track, TrackId, VoiceTarget};
use crate::error::{CacheError, QueueError};
use crate::messages::{Enqueued, JukeboxEvent, LeaveReason, TenantCommand};

/// 所有租户 worker 共享的依赖
pub struct DriverContext {
    pub cache: CacheStore,
    pub sink: Arc<dyn PlaybackSink>,
    pub events: mpsc::UnboundedSender<JukeboxEvent>,
    pub idle_timeout: Duration,
    pub exits: mpsc::UnboundedSender<TenantExit>,
}

/// worker 退出通知；`leftover` 是关闭信道后仍未处理的指令
#[derive(Debug)]
pub struct TenantExit {
    pub tenant: TenantId,
    pub instance: u64,
    pub reason: LeaveReason,
    pub leftover: Vec<TenantCommand>,
}

#[derive(Debug, Clone)]
pub struct TenantHandle {
    pub instance: u64,
    pub tx: mpsc::UnboundedSender<TenantCommand>,
}

enum Internal {
    Resolved {
        resolve_id: u64,
        track: Track,
        result: Result<CacheHandle, CacheError>,
    },
    Prefetched {
        track_id: TrackId,
        result: Result<CacheHandle, CacheError>,
    },
}

pub fn spawn_tenant(ctx: Arc<DriverContext>, tenant: TenantId, instance: u64) -> TenantHandle {
    let (tx, rx_cmd) = mpsc::unbounded_channel();
    let (tx_sink, rx_sink) = mpsc::unbounded_channel();
    let (tx_internal, rx_internal) = mpsc::unbounded_channel();

    tracing::info!(tenant = %tenant, instance, "租户 worker 启动");
    let driver = TenantDriver {
        ctx,
        instance,
        queue: TenantQueue::new(tenant),
        rx_cmd,
        tx_sink,
        rx_sink,
        tx_internal,
        rx_internal,
        conn: None,
        next_play_id: 0,
        next_resolve_id: 0,
        prefetched: None,
        prefetching: None,
        prefetch_failed: None,
    };
    tokio::spawn(driver.run());
    TenantHandle { instance, tx }
}

struct TenantDriver {
    ctx: Arc<DriverContext>,
    instance: u64,
    queue: TenantQueue,
    rx_cmd: mpsc::UnboundedReceiver<TenantCommand>,
    tx_sink: mpsc::UnboundedSender<SinkEvent>,
    rx_sink: mpsc::UnboundedReceiver<SinkEvent>,
    tx_internal: mpsc::UnboundedSender<Internal>,
    rx_internal: mpsc::UnboundedReceiver<Internal>,
    conn: Option<Box<dyn SinkConnection>>,
    next_play_id: u64,
    next_resolve_id: u64,
    /// 已预取并持有引用的队首歌曲
    prefetched: Option<(TrackId, CacheHandle)>,
    prefetching: Option<TrackId>,
    /// 队首预取失败的原因；轮到它时直接报告，不再下载第二次
    prefetch_failed: Option<(TrackId, CacheError)>,
}

impl TenantDriver {
    async fn run(mut self) {
        let reason = loop {
            select! {
                biased;
                maybe_cmd = self.rx_cmd.recv() => {
                    let Some(cmd) = maybe_cmd else {
                        self.drain(LeaveReason::Shutdown);
                        break LeaveReason::Shutdown;
                    };
                    if let Some(reason) = self.handle_command(cmd) {
                        break reason;
                    }
                }
                Some(evt) = self.rx_sink.recv() => {
                    self.handle_sink_event(evt);
                }
                Some(msg) = self.rx_internal.recv() => {
                    self.handle_internal(msg);
                }
                generation = self.queue.idle.fired() => {
                    if self.queue.idle.take_if(generation)
                        && matches!(self.queue.state, QueueState::Idle)
                        && self.queue.songs.is_empty()
                    {
                        tracing::info!(tenant = %self.queue.tenant, "空闲超时，离开语音频道");
                        self.drain(LeaveReason::IdleTimeout);
                        break LeaveReason::IdleTimeout;
                    }
                }
            }
        };

        self.rx_cmd.close();
        let mut leftover = Vec::new();
        while let Ok(cmd) = self.rx_cmd.try_recv() {
            leftover.push(cmd);
        }
        tracing::info!(
            tenant = %self.queue.tenant,
            instance = self.instance,
            ?reason,
            leftover = leftover.len(),
            "租户 worker 退出"
        );
        let _ = self.ctx.exits.send(TenantExit {
            tenant: self.queue.tenant.clone(),
            instance: self.instance,
            reason,
            leftover,
        });
    }

    fn handle_command(&mut self, cmd: TenantCommand) -> Option<LeaveReason> {
        match cmd {
            TenantCommand::Enqueue {
                track,
                voice,
                reply,
            } => {
                let _ = reply.send(Ok(self.enqueue(track, voice)));
                None
            }
            TenantCommand::Skip { reply } => {
                let _ = reply.send(self.skip());
                None
            }
            TenantCommand::Stop { reason, reply } => {
                self.drain(reason);
                if let Some(reply) = reply {
                    let _ = reply.send(());
                }
                Some(reason)
            }
            TenantCommand::Snapshot { reply } => {
                let prefetched = self.prefetched.as_ref().map(|(id, _)| id);
                let failed = self.prefetch_failed.as_ref().map(|(id, _)| id);
                let _ = reply.send(self.queue.snapshot(prefetched, failed));
                None
            }
        }
    }

    fn enqueue(&mut self, track: Track, voice: VoiceTarget) -> Enqueued {
        if self.queue.voice.is_none() {
            self.queue.voice = Some(voice);
        }
        if self.queue.idle.cancel() {
            tracing::debug!(tenant = %self.queue.tenant, "新歌入队，取消空闲计时");
        }
        tracing::info!(tenant = %self.queue.tenant, track = %track.id, by = %track.requested_by, "入队");
        self.queue.songs.push_back(track.clone());

        if matches!(self.queue.state, QueueState::Idle) {
            self.advance();
            return Enqueued { track, position: 0 };
        }
        let position = self.queue.songs.len();
        if matches!(self.queue.state, QueueState::Playing(_)) {
            self.kick_prefetch();
        }
        Enqueued { track, position }
    }

    fn skip(&mut self) -> Result<Track, QueueError> {
        let Some(now) = self.queue.take_playing() else {
            return Err(QueueError::NotPlaying);
        };
        tracing::info!(tenant = %self.queue.tenant, track = %now.track.id, "跳过当前歌曲");
        if let Some(conn) = self.conn.as_mut() {
            conn.stop();
        }
        let track = now.track.clone();
        self.ctx.cache.release(now.file);
        self.advance();
        Ok(track)
    }

    /// 队首出队并开始解析；队列空了就回到 Idle 并开始空闲计时
    fn advance(&mut self) {
        while let Some(track) = self.queue.songs.pop_front() {
            if let Some(handle) = self.take_prefetched(&track.id) {
                tracing::debug!(tenant = %self.queue.tenant, track = %track.id, "使用预取结果");
                let handle = self.ctx.cache.repin(handle, PinKind::Playback);
                if self.start_playback(track, handle) {
                    return;
                }
                continue;
            }
            if let Some(err) = self.take_prefetch_failure(&track.id) {
                tracing::warn!(tenant = %self.queue.tenant, track = %track.id, err = %err, phase = "prefetch", "获取歌曲失败，跳过");
                self.notify_failed(track, err.to_string());
                continue;
            }
            self.begin_resolve(track);
            return;
        }

        self.queue.state = QueueState::Idle;
        self.queue.idle.arm(self.ctx.idle_timeout);
        tracing::info!(
            tenant = %self.queue.tenant,
            timeout_secs = self.ctx.idle_timeout.as_secs(),
            "队列已空，开始空闲计时"
        );
    }

    fn begin_resolve(&mut self, track: Track) {
        self.next_resolve_id = self.next_resolve_id.wrapping_add(1).max(1);
        let resolve_id = self.next_resolve_id;
        self.queue.state = QueueState::Joining {
            track: track.clone(),
            resolve_id,
        };

        let cache = self.ctx.cache.clone();
        let tx = self.tx_internal.clone();
        tokio::spawn(async move {
            let result = cache.materialize(&track).await;
            if let Err(mpsc::error::SendError(Internal::Resolved {
                result: Ok(handle),
                ..
            })) = tx.send(Internal::Resolved {
                resolve_id,
                track,
                result,
            }) {
                cache.release(handle);
            }
        });
    }

    /// 交给播放输出；失败时通知并返回 false，由调用方继续推进
    fn start_playback(&mut self, track: Track, file: CacheHandle) -> bool {
        let tenant = self.queue.tenant.clone();
        let play_id = self.next_play_id.wrapping_add(1).max(1);
        self.next_play_id = play_id;

        let played = self.ensure_connection().and_then(|conn| {
            conn.play(play_id, file.path())
                .map_err(|e| e.to_string())
        });
        if let Err(reason) = played {
            tracing::warn!(tenant = %tenant, track = %track.id, reason = %reason, phase = "play", "播放失败，跳过");
            self.ctx.cache.release(file);
            self.queue.state = QueueState::Idle;
            self.notify_failed(track, reason);
            return false;
        }

        tracing::info!(tenant = %tenant, track = %track.id, play_id, path = %file.path().display(), "开始播放");
        let _ = self.ctx.events.send(JukeboxEvent::NowPlaying {
            tenant,
            track: track.clone(),
        });
        self.queue.state = QueueState::Playing(NowPlaying {
            track,
            file,
            play_id,
        });
        self.kick_prefetch();
        true
    }

    fn ensure_connection(&mut self) -> Result<&mut Box<dyn SinkConnection>, String> {
        if self.conn.is_none() {
            let voice = self
                .queue
                .voice
                .clone()
                .ok_or_else(|| QueueError::NoVoiceTarget.to_string())?;
            let conn = self
                .ctx
                .sink
                .attach(&self.queue.tenant, &voice, self.tx_sink.clone())
                .map_err(|e| e.to_string())?;
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| "播放连接不可用".to_owned())
    }

    /// 后台预取新的队首；已缓存、正在下载或已持有的跳过
    fn kick_prefetch(&mut self) {
        let Some(head) = self.queue.songs.front() else {
            return;
        };
        if self.prefetched.as_ref().is_some_and(|(id, _)| id == &head.id)
            || self.prefetch_failed.as_ref().is_some_and(|(id, _)| id == &head.id)
            || self.prefetching.as_ref() == Some(&head.id)
            || self.ctx.cache.is_cached(&head.id)
            || self.ctx.cache.is_in_flight(&head.id)
        {
            return;
        }
        if let Some((_, stale)) = self.prefetched.take() {
            self.ctx.cache.release(stale);
        }
        self.prefetch_failed = None;

        tracing::debug!(tenant = %self.queue.tenant, track = %head.id, "开始预取");
        let track = head.clone();
        self.prefetching = Some(track.id.clone());
        let cache = self.ctx.cache.clone();
        let tx = self.tx_internal.clone();
        tokio::spawn(async move {
            let result = cache.materialize_as(&track, PinKind::Prefetch).await;
            if let Err(mpsc::error::SendError(Internal::Prefetched {
                result: Ok(handle),
                ..
            })) = tx.send(Internal::Prefetched {
                track_id: track.id,
                result,
            }) {
                cache.release(handle);
            }
        });
    }

    fn take_prefetched(&mut self, id: &TrackId) -> Option<CacheHandle> {
        match self.prefetched.take() {
            Some((pid, handle)) if &pid == id => Some(handle),
            Some((_, handle)) => {
                self.ctx.cache.release(handle);
                None
            }
            None => None,
        }
    }

    fn take_prefetch_failure(&mut self, id: &TrackId) -> Option<CacheError> {
        match self.prefetch_failed.take() {
            Some((fid, err)) if &fid == id => Some(err),
            _ => None,
        }
    }

    fn handle_internal(&mut self, msg: Internal) {
        match msg {
            Internal::Resolved {
                resolve_id,
                track,
                result,
            } => {
                let current = matches!(
                    &self.queue.state,
                    QueueState::Joining { resolve_id: id, .. } if *id == resolve_id
                );
                if !current {
                    if let Ok(handle) = result {
                        self.ctx.cache.release(handle);
                    }
                    return;
                }
                match result {
                    Ok(handle) => {
                        if !self.start_playback(track, handle) {
                            self.advance();
                        }
                    }
                    Err(e) => {
                        tracing::warn!(tenant = %self.queue.tenant, track = %track.id, err = %e, phase = "resolve", "获取歌曲失败，跳过");
                        self.queue.state = QueueState::Idle;
                        self.notify_failed(track, e.to_string());
                        self.advance();
                    }
                }
            }
            Internal::Prefetched { track_id, result } => {
                if self.prefetching.as_ref() == Some(&track_id) {
                    self.prefetching = None;
                }
                match result {
                    Ok(handle) => {
                        let wanted = self.prefetched.is_none()
                            && self.queue.songs.front().is_some_and(|t| t.id == track_id);
                        if wanted {
                            tracing::debug!(tenant = %self.queue.tenant, track = %track_id, "预取完成");
                            self.prefetched = Some((track_id, handle));
                        } else {
                            self.ctx.cache.release(handle);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(tenant = %self.queue.tenant, track = %track_id, err = %e, "预取失败");
                        if self.queue.songs.front().is_some_and(|t| t.id == track_id) {
                            self.prefetch_failed = Some((track_id, e));
                        }
                    }
                }
            }
        }
    }

    fn handle_sink_event(&mut self, evt: SinkEvent) {
        let (play_id, failure) = match evt {
            SinkEvent::Finished { play_id } => (play_id, None),
            SinkEvent::Error { play_id, message } => (play_id, Some(message)),
        };
        let current = matches!(&self.queue.state, QueueState::Playing(now) if now.play_id == play_id);
        if !current {
            tracing::trace!(tenant = %self.queue.tenant, play_id, "忽略过期的播放事件");
            return;
        }
        let Some(now) = self.queue.take_playing() else {
            return;
        };
        match failure {
            None => {
                tracing::info!(tenant = %self.queue.tenant, track = %now.track.id, "播放结束");
                self.ctx.cache.release(now.file);
            }
            Some(message) => {
                tracing::warn!(tenant = %self.queue.tenant, track = %now.track.id, reason = %message, phase = "play", "播放出错，跳过");
                self.ctx.cache.release(now.file);
                self.notify_failed(now.track, message);
            }
        }
        self.advance();
    }

    fn notify_failed(&self, track: Track, reason: String) {
        let _ = self.ctx.events.send(JukeboxEvent::TrackFailed {
            tenant: self.queue.tenant.clone(),
            track,
            reason,
        });
    }

    /// 清空队列，释放所有引用并断开连接
    fn drain(&mut self, reason: LeaveReason) {
        let tenant = self.queue.tenant.clone();
        tracing::info!(tenant = %tenant, ?reason, pending = self.queue.songs.len(), "租户拆除");

        let previous = std::mem::replace(&mut self.queue.state, QueueState::Draining);
        self.queue.songs.clear();
        self.queue.idle.cancel();

        if let QueueState::Playing(now) = previous {
            if let Some(conn) = self.conn.as_mut() {
                conn.stop();
            }
            self.ctx.cache.release(now.file);
        }
        if let Some((_, handle)) = self.prefetched.take() {
            self.ctx.cache.release(handle);
        }
        self.prefetching = None;
        self.prefetch_failed = None;
        self.rx_internal.close();
        while let Ok(msg) = self.rx_internal.try_recv() {
            if let Internal::Resolved { result: Ok(handle), .. }
            | Internal::Prefetched { result: Ok(handle), .. } = msg
            {
                self.ctx.cache.release(handle);
            }
        }

        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.disconnect() {
                tracing::warn!(tenant = %tenant, err = %e, "断开连接失败，继续拆除");
            }
        }
        let _ = self.ctx.events.send(JukeboxEvent::Left { tenant, reason });
    }
}
