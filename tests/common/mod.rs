#![allow(dead_code)]

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use guild_jukebox::cache::{CacheConfig, CacheStore, ReferenceSet};
use guild_jukebox::error::{FetchError, SinkError, TeardownError};
use guild_jukebox::fetch::{DownloadRequest, Downloader, Fetcher};
use guild_jukebox::player::{PlaybackSink, SinkConnection, SinkEvent, SinkEventSender};
use guild_jukebox::settings::DownloadSettings;
use guild_jukebox::{TenantId, Track, VoiceTarget};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const MIN_FILE_BYTES: u64 = 64;

pub fn webm_bytes() -> Vec<u8> {
    let mut v = vec![0x1A, 0x45, 0xDF, 0xA3];
    v.resize(256, 0x42);
    v
}

pub fn youtube(id: &str) -> Track {
    Track::from_url(&format!("https://youtu.be/{id}"), "alice").expect("track")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Valid,
    Corrupt,
    Fail,
}

/// 按曲目预设结果的下载器；默认写出合法的 webm
pub struct ScriptedDownloader {
    calls: AtomicUsize,
    per_track: Mutex<HashMap<String, usize>>,
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedDownloader {
    pub fn new(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            per_track: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            delay,
            gate: None,
        }
    }

    /// 每次下载都要先拿到一个许可
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn script(&self, track: &Track, outcomes: &[Outcome]) {
        self.scripts
            .lock()
            .expect("scripts")
            .insert(track.id.to_string(), outcomes.iter().copied().collect());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, track: &Track) -> usize {
        self.per_track
            .lock()
            .expect("per_track")
            .get(&track.id.to_string())
            .copied()
            .unwrap_or(0)
    }
}

impl Downloader for ScriptedDownloader {
    fn download<'a>(&'a self, req: DownloadRequest<'a>) -> BoxFuture<'a, Result<(), FetchError>> {
        async move {
            let key = req.track.id.to_string();
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.per_track.lock().expect("per_track").entry(key.clone()).or_default() += 1;
            let outcome = self
                .scripts
                .lock()
                .expect("scripts")
                .get_mut(&key)
                .and_then(|q| q.pop_front())
                .unwrap_or(Outcome::Valid);

            if let Some(gate) = &self.gate {
                gate.acquire().await.expect("gate").forget();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match outcome {
                Outcome::Valid => tokio::fs::write(req.output, webm_bytes()).await?,
                Outcome::Corrupt => tokio::fs::write(req.output, vec![0u8; 256]).await?,
                Outcome::Fail => return Err(FetchError::NotFound(key)),
            }
            Ok(())
        }
        .boxed()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub refs: ReferenceSet,
    pub cache: CacheStore,
    pub downloader: Arc<ScriptedDownloader>,
}

pub fn harness(downloader: ScriptedDownloader, persist: bool) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    harness_in(dir, downloader, persist)
}

pub fn harness_in(dir: TempDir, downloader: ScriptedDownloader, persist: bool) -> Harness {
    let refs = ReferenceSet::new();
    let downloader = Arc::new(downloader);
    let fetcher = Fetcher::new(
        downloader.clone(),
        dir.path().to_path_buf(),
        refs.clone(),
        DownloadSettings::default(),
    );
    let cache = CacheStore::open(
        CacheConfig {
            dir: dir.path().to_path_buf(),
            persist,
            min_file_bytes: MIN_FILE_BYTES,
        },
        refs.clone(),
        fetcher,
    )
    .expect("open cache");
    Harness {
        dir,
        refs,
        cache,
        downloader,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayRecord {
    pub tenant: TenantId,
    pub play_id: u64,
    pub file: PathBuf,
}

#[derive(Default)]
struct SinkLog {
    plays: Vec<PlayRecord>,
    senders: HashMap<TenantId, SinkEventSender>,
    stops: usize,
    disconnects: usize,
}

/// 记录播放并由测试手动结束的播放输出
#[derive(Clone, Default)]
pub struct ScriptedSink {
    log: Arc<Mutex<SinkLog>>,
}

impl ScriptedSink {
    pub fn plays(&self) -> Vec<PlayRecord> {
        self.log.lock().expect("log").plays.clone()
    }

    pub fn stops(&self) -> usize {
        self.log.lock().expect("log").stops
    }

    pub fn disconnects(&self) -> usize {
        self.log.lock().expect("log").disconnects
    }

    /// 让该租户最近一次播放结束
    pub fn finish(&self, tenant: &TenantId) {
        let log = self.log.lock().expect("log");
        let play_id = log
            .plays
            .iter()
            .rev()
            .find(|p| &p.tenant == tenant)
            .map(|p| p.play_id)
            .expect("nothing played");
        let tx = log.senders.get(tenant).expect("attached");
        let _ = tx.send(SinkEvent::Finished { play_id });
    }

    pub fn fail(&self, tenant: &TenantId, message: &str) {
        let log = self.log.lock().expect("log");
        let play_id = log
            .plays
            .iter()
            .rev()
            .find(|p| &p.tenant == tenant)
            .map(|p| p.play_id)
            .expect("nothing played");
        let tx = log.senders.get(tenant).expect("attached");
        let _ = tx.send(SinkEvent::Error {
            play_id,
            message: message.to_owned(),
        });
    }
}

impl PlaybackSink for ScriptedSink {
    fn attach(
        &self,
        tenant: &TenantId,
        _target: &VoiceTarget,
        events: SinkEventSender,
    ) -> Result<Box<dyn SinkConnection>, SinkError> {
        self.log
            .lock()
            .expect("log")
            .senders
            .insert(tenant.clone(), events);
        Ok(Box::new(ScriptedConnection {
            tenant: tenant.clone(),
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedConnection {
    tenant: TenantId,
    log: Arc<Mutex<SinkLog>>,
}

impl SinkConnection for ScriptedConnection {
    fn play(&mut self, play_id: u64, file: &Path) -> Result<(), SinkError> {
        assert!(file.is_file(), "played file must exist: {}", file.display());
        self.log.lock().expect("log").plays.push(PlayRecord {
            tenant: self.tenant.clone(),
            play_id,
            file: file.to_path_buf(),
        });
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().expect("log").stops += 1;
    }

    fn disconnect(self: Box<Self>) -> Result<(), TeardownError> {
        self.log.lock().expect("log").disconnects += 1;
        Ok(())
    }
}

/// 轮询直到条件成立，最多两秒
pub async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

/// 轮询租户快照直到满足条件
pub async fn wait_snapshot(
    jukebox: &guild_jukebox::Jukebox,
    tenant: &TenantId,
    what: &str,
    pred: impl Fn(&guild_jukebox::messages::QueueSnapshot) -> bool,
) -> guild_jukebox::messages::QueueSnapshot {
    for _ in 0..400 {
        if let Some(snap) = jukebox.snapshot(tenant.clone()).await {
            if pred(&snap) {
                return snap;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}
