//! 缓存清理
//!
//! 定期扫描缓存目录，删除没有被播放、下载或永久标记保护的文件。
//! 检查与删除都在引用集的锁内完成，所以清理永远不会删掉正在使用的文件。
//! 全量清空会连永久条目一起删除，但仍然跳过被引用的文件。

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::cache::{CacheStore, DeletePolicy, LOCK_FILE_NAME, Removal};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: usize,
    pub bytes: u64,
    pub kept: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    cache: CacheStore,
    kick: Arc<Notify>,
}

impl Sweeper {
    pub fn new(cache: CacheStore) -> Self {
        Self {
            cache,
            kick: Arc::new(Notify::new()),
        }
    }

    /// 用于在租户拆除后触发一次清理
    pub fn kick_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.kick)
    }

    pub fn request_sweep(&self) {
        self.kick.notify_one();
    }

    /// 删除所有未被引用且非永久的文件
    pub fn sweep(&self) -> SweepReport {
        self.pass(DeletePolicy::KeepPermanent)
    }

    /// 删除所有未被引用的文件，包括永久条目
    pub fn full_wipe(&self) -> SweepReport {
        self.pass(DeletePolicy::IgnorePermanent)
    }

    fn pass(&self, policy: DeletePolicy) -> SweepReport {
        let mut report = SweepReport::default();
        let dir = self.cache.dir();
        let rd = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), err = %e, "读取缓存目录失败");
                return report;
            }
        };

        for ent in rd.flatten() {
            if !ent.file_type().is_ok_and(|t| t.is_file()) || ent.file_name() == LOCK_FILE_NAME {
                continue;
            }
            report.scanned += 1;
            let path = ent.path();
            match self.cache.refs().remove_if_unreferenced(&path, policy) {
                Ok(Removal::Removed { bytes }) => {
                    self.cache.forget(&path);
                    report.removed += 1;
                    report.bytes = report.bytes.saturating_add(bytes);
                    tracing::debug!(path = %path.display(), bytes, "清理缓存文件");
                }
                Ok(Removal::Missing) => self.cache.forget(&path),
                Ok(Removal::Referenced) => report.kept += 1,
                Err(e) => {
                    report.kept += 1;
                    log_remove_failure(&path, &e);
                }
            }
        }

        if report.removed > 0 {
            tracing::info!(
                ?policy,
                scanned = report.scanned,
                removed = report.removed,
                bytes = report.bytes,
                kept = report.kept,
                "缓存清理完成"
            );
        } else {
            tracing::debug!(?policy, scanned = report.scanned, kept = report.kept, "缓存清理完成");
        }
        report
    }

    async fn pass_blocking(&self, policy: DeletePolicy) {
        let this = self.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || this.pass(policy)).await {
            tracing::warn!(err = %e, "缓存清理任务异常退出");
        }
    }

    /// 启动后台定时清理；`shutdown` 变为 true 时退出
    pub fn spawn(
        self,
        sweep_every: Duration,
        wipe_every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let sweep_every = sweep_every.max(Duration::from_secs(1));
        let wipe_every = wipe_every.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let start = Instant::now();
            let mut sweep_tick = interval_at(start + sweep_every, sweep_every);
            let mut wipe_tick = interval_at(start + wipe_every, wipe_every);
            sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            wipe_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                sweep_secs = sweep_every.as_secs(),
                wipe_secs = wipe_every.as_secs(),
                "缓存清理器已启动"
            );

            loop {
                select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = wipe_tick.tick() => self.pass_blocking(DeletePolicy::IgnorePermanent).await,
                    _ = sweep_tick.tick() => self.pass_blocking(DeletePolicy::KeepPermanent).await,
                    _ = self.kick.notified() => self.pass_blocking(DeletePolicy::KeepPermanent).await,
                }
            }
            tracing::info!("缓存清理器已停止");
        })
    }
}

fn log_remove_failure(path: &Path, err: &std::io::Error) {
    tracing::warn!(path = %path.display(), err = %err, "删除缓存文件失败");
}
