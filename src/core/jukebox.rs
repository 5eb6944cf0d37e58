//! 租户协调器
//!
//! 一个 actor 持有 `TenantId -> Slot` 的注册表，负责按需创建租户 worker、
//! 转发指令，并在 worker 退出时回收注册项。同一租户任何时刻最多只有一个
//! worker：旧实例拆除期间到达的点歌先暂存，旧实例退出后交给新实例。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{Notify, mpsc, oneshot};

use crate::cache::CacheStore;
use crate::domain::{TenantId, Track, VoiceTarget};
use crate::error::QueueError;
use crate::messages::{
    Command, Enqueued, JukeboxEvent, LeaveReason, QueueSnapshot, Reply, Request, TeardownCause,
    TenantCommand,
};
use crate::player::{DriverContext, PlaybackSink, TenantExit, TenantHandle, spawn_tenant};

pub struct JukeboxConfig {
    pub cache: CacheStore,
    pub sink: Arc<dyn PlaybackSink>,
    pub idle_timeout: Duration,
    /// 租户拆除后唤醒清理器
    pub sweep_kick: Option<Arc<Notify>>,
}

enum ControlMsg {
    Dispatch {
        tenant: TenantId,
        cmd: TenantCommand,
    },
    Tenants {
        reply: oneshot::Sender<Vec<TenantId>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// 协调器句柄
#[derive(Clone)]
pub struct Jukebox {
    tx: mpsc::UnboundedSender<ControlMsg>,
}

pub fn spawn_jukebox(cfg: JukeboxConfig) -> (Jukebox, mpsc::UnboundedReceiver<JukeboxEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (tx_evt, rx_evt) = mpsc::unbounded_channel();
    let (tx_exit, rx_exit) = mpsc::unbounded_channel();

    let ctx = Arc::new(DriverContext {
        cache: cfg.cache,
        sink: cfg.sink,
        events: tx_evt,
        idle_timeout: cfg.idle_timeout,
        exits: tx_exit,
    });
    let coordinator = Coordinator {
        ctx,
        rx,
        rx_exit,
        registry: HashMap::new(),
        next_instance: 0,
        sweep_kick: cfg.sweep_kick,
        shutdown: None,
    };
    tokio::spawn(coordinator.run());
    (Jukebox { tx }, rx_evt)
}

impl Jukebox {
    fn send(&self, tenant: TenantId, cmd: TenantCommand) {
        // 协调器已退出时 reply 随指令一起被丢弃，调用方按关闭处理
        let _ = self.tx.send(ControlMsg::Dispatch { tenant, cmd });
    }

    /// 解析链接并入队；链接无效或不在语音频道时不改变任何状态
    pub async fn play(
        &self,
        tenant: TenantId,
        requester: &str,
        url: &str,
        voice: Option<VoiceTarget>,
    ) -> Result<Enqueued, QueueError> {
        let track = Track::from_url(url, requester)?;
        let voice = voice.ok_or(QueueError::NoVoiceTarget)?;
        let (reply, rx) = oneshot::channel();
        self.send(tenant, TenantCommand::Enqueue { track, voice, reply });
        rx.await.map_err(|_| QueueError::ShuttingDown)?
    }

    pub async fn skip(&self, tenant: TenantId) -> Result<Track, QueueError> {
        let (reply, rx) = oneshot::channel();
        self.send(tenant, TenantCommand::Skip { reply });
        rx.await.map_err(|_| QueueError::NotPlaying)?
    }

    pub async fn stop(&self, tenant: TenantId) -> Result<(), QueueError> {
        self.leave(tenant, LeaveReason::Stopped)
            .await
            .then_some(())
            .ok_or(QueueError::EmptyQueue)
    }

    /// 外部成员变化导致的拆除；返回该租户之前是否存在
    pub async fn teardown(&self, tenant: TenantId, cause: TeardownCause) -> bool {
        self.leave(tenant, LeaveReason::Teardown(cause)).await
    }

    async fn leave(&self, tenant: TenantId, reason: LeaveReason) -> bool {
        let (reply, rx) = oneshot::channel();
        self.send(
            tenant,
            TenantCommand::Stop {
                reason,
                reply: Some(reply),
            },
        );
        rx.await.is_ok()
    }

    pub async fn snapshot(&self, tenant: TenantId) -> Option<QueueSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(tenant, TenantCommand::Snapshot { reply });
        rx.await.ok()
    }

    /// 当前活跃（未在拆除中）的租户
    pub async fn tenants(&self) -> Vec<TenantId> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ControlMsg::Tenants { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// 拆除所有租户并等待它们退出
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(ControlMsg::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// 处理一条用户请求并生成回复
    pub async fn handle(&self, req: Request) -> Reply {
        let Request {
            tenant,
            requester,
            command,
            voice,
        } = req;
        let result = match command {
            Command::Play(url) => self
                .play(tenant, &requester, &url, voice)
                .await
                .map(Reply::Enqueued),
            Command::Skip => self.skip(tenant).await.map(Reply::Skipped),
            Command::Stop => self.stop(tenant).await.map(|()| Reply::Stopped),
        };
        result.unwrap_or_else(Reply::Failed)
    }
}

/// 注册表中的一项；`stopping` 期间新的点歌先暂存
struct Slot {
    handle: TenantHandle,
    stopping: bool,
    parked: Vec<TenantCommand>,
}

struct Coordinator {
    ctx: Arc<DriverContext>,
    rx: mpsc::UnboundedReceiver<ControlMsg>,
    rx_exit: mpsc::UnboundedReceiver<TenantExit>,
    registry: HashMap<TenantId, Slot>,
    next_instance: u64,
    sweep_kick: Option<Arc<Notify>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Coordinator {
    async fn run(mut self) {
        loop {
            select! {
                maybe_exit = self.rx_exit.recv() => {
                    // ctx 持有发送端，不会为 None
                    let Some(exit) = maybe_exit else {
                        break;
                    };
                    self.on_exit(exit);
                }
                maybe_msg = self.rx.recv(), if self.shutdown.is_none() => {
                    match maybe_msg {
                        Some(ControlMsg::Dispatch { tenant, cmd }) => self.dispatch(tenant, cmd),
                        Some(ControlMsg::Tenants { reply }) => {
                            let mut tenants: Vec<TenantId> = self
                                .registry
                                .iter()
                                .filter(|(_, slot)| !slot.stopping)
                                .map(|(t, _)| t.clone())
                                .collect();
                            tenants.sort_by(|a, b| a.0.cmp(&b.0));
                            let _ = reply.send(tenants);
                        }
                        Some(ControlMsg::Shutdown { reply }) => self.begin_shutdown(reply),
                        None => self.begin_shutdown(oneshot::channel().0),
                    }
                }
            }
            if self.shutdown.is_some() && self.registry.is_empty() {
                if let Some(reply) = self.shutdown.take() {
                    let _ = reply.send(());
                }
                break;
            }
        }

        self.rx.close();
        while let Ok(msg) = self.rx.try_recv() {
            if let ControlMsg::Dispatch { cmd, .. } = msg {
                reject(cmd, QueueError::ShuttingDown);
            }
        }
        tracing::info!("协调器已退出");
    }

    fn spawn(&mut self, tenant: &TenantId) {
        self.next_instance = self.next_instance.wrapping_add(1);
        let handle = spawn_tenant(Arc::clone(&self.ctx), tenant.clone(), self.next_instance);
        self.registry.insert(
            tenant.clone(),
            Slot {
                handle,
                stopping: false,
                parked: Vec::new(),
            },
        );
    }

    fn dispatch(&mut self, tenant: TenantId, cmd: TenantCommand) {
        if self.shutdown.is_some() {
            reject(cmd, QueueError::ShuttingDown);
            return;
        }
        if !self.registry.contains_key(&tenant) {
            match &cmd {
                TenantCommand::Enqueue { .. } => self.spawn(&tenant),
                TenantCommand::Stop { .. } => return reject(cmd, QueueError::EmptyQueue),
                _ => return reject(cmd, QueueError::NotPlaying),
            }
        }
        let Some(slot) = self.registry.get_mut(&tenant) else {
            return reject(cmd, QueueError::ShuttingDown);
        };

        if slot.stopping {
            match cmd {
                TenantCommand::Enqueue { .. } => slot.parked.push(cmd),
                TenantCommand::Stop { .. } => reject(cmd, QueueError::EmptyQueue),
                other => reject(other, QueueError::NotPlaying),
            }
            return;
        }

        let is_stop = matches!(cmd, TenantCommand::Stop { .. });
        if let Err(mpsc::error::SendError(cmd)) = slot.handle.tx.send(cmd) {
            // worker 已自行退出，退出通知还在路上
            tracing::debug!(tenant = %tenant, instance = slot.handle.instance, "租户 worker 已关闭");
            slot.stopping = true;
            match cmd {
                TenantCommand::Enqueue { .. } => slot.parked.push(cmd),
                TenantCommand::Stop { .. } => reject(cmd, QueueError::EmptyQueue),
                other => reject(other, QueueError::NotPlaying),
            }
            return;
        }
        if is_stop {
            slot.stopping = true;
        }
    }

    fn on_exit(&mut self, exit: TenantExit) {
        let TenantExit {
            tenant,
            instance,
            reason,
            leftover,
        } = exit;
        let mut parked = Vec::new();
        if self
            .registry
            .get(&tenant)
            .is_some_and(|slot| slot.handle.instance == instance)
        {
            if let Some(slot) = self.registry.remove(&tenant) {
                parked = slot.parked;
            }
        }
        tracing::debug!(tenant = %tenant, instance, ?reason, "租户已移除");
        if let Some(kick) = &self.sweep_kick {
            kick.notify_one();
        }

        for cmd in leftover.into_iter().chain(parked) {
            match cmd {
                TenantCommand::Enqueue { .. } => self.dispatch(tenant.clone(), cmd),
                // 针对的是已退出的实例，不能转给新实例
                TenantCommand::Stop { reply, .. } => {
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                }
                other => reject(other, QueueError::NotPlaying),
            }
        }
    }

    fn begin_shutdown(&mut self, reply: oneshot::Sender<()>) {
        tracing::info!(tenants = self.registry.len(), "开始关闭所有租户");
        for (tenant, slot) in self.registry.iter_mut() {
            for cmd in slot.parked.drain(..) {
                reject(cmd, QueueError::ShuttingDown);
            }
            if slot.stopping {
                continue;
            }
            slot.stopping = true;
            let stop = TenantCommand::Stop {
                reason: LeaveReason::Shutdown,
                reply: None,
            };
            if slot.handle.tx.send(stop).is_err() {
                tracing::debug!(tenant = %tenant, "租户 worker 已关闭");
            }
        }
        self.shutdown = Some(reply);
    }
}

/// 回复一个无法投递的指令
fn reject(cmd: TenantCommand, err: QueueError) {
    match cmd {
        TenantCommand::Enqueue { reply, .. } => {
            let _ = reply.send(Err(err));
        }
        TenantCommand::Skip { reply } => {
            let _ = reply.send(Err(err));
        }
        // 丢弃 reply，调用方据此得知租户不存在
        TenantCommand::Stop { .. } | TenantCommand::Snapshot { .. } => {}
    }
}
