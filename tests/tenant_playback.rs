mod common;

use common::{Harness, Outcome, ScriptedDownloader, ScriptedSink, eventually, harness, wait_snapshot, youtube};
use guild_jukebox::error::QueueError;
use guild_jukebox::messages::{
    Command, JukeboxEvent, LeaveReason, QueueStateKind, Reply, Request, TeardownCause,
};
use guild_jukebox::{Jukebox, JukeboxConfig, TenantId, VoiceTarget, spawn_jukebox};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

fn start(h: &Harness, idle: Duration) -> (Jukebox, mpsc::UnboundedReceiver<JukeboxEvent>, ScriptedSink) {
    let sink = ScriptedSink::default();
    let (jukebox, events) = spawn_jukebox(JukeboxConfig {
        cache: h.cache.clone(),
        sink: Arc::new(sink.clone()),
        idle_timeout: idle,
        sweep_kick: None,
    });
    (jukebox, events, sink)
}

fn voice() -> Option<VoiceTarget> {
    Some(VoiceTarget::from("vc-1"))
}

fn url(id: &str) -> String {
    format!("https://youtu.be/{id}")
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<JukeboxEvent>) -> JukeboxEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event in time")
        .expect("event channel open")
}

async fn wait_left(rx: &mut mpsc::UnboundedReceiver<JukeboxEvent>) -> LeaveReason {
    loop {
        if let JukeboxEvent::Left { reason, .. } = next_event(rx).await {
            return reason;
        }
    }
}

#[tokio::test]
async fn plays_in_fifo_order() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, _events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");
    let ids = ["aaaaaaaaaaa", "bbbbbbbbbbb", "ccccccccccc"];

    let mut positions = Vec::new();
    for id in ids {
        let e = jukebox
            .play(g.clone(), "alice", &url(id), voice())
            .await
            .expect("enqueue");
        positions.push(e.position);
    }
    assert_eq!(positions, vec![0, 1, 2]);

    for (n, id) in ids.iter().enumerate() {
        eventually("next track plays", || sink.plays().len() == n + 1).await;
        let expected = h.cache.final_path(&youtube(id).id);
        assert_eq!(sink.plays()[n].file, expected);
        sink.finish(&g);
    }

    let snap = wait_snapshot(&jukebox, &g, "queue drained", |s| {
        s.state == QueueStateKind::Idle
    })
    .await;
    assert!(snap.pending.is_empty());
    assert!(snap.idle_timer_armed);
    assert_eq!(h.refs.pin_count(), 0);
}

#[tokio::test]
async fn next_track_is_prefetched_while_playing() {
    let h = harness(ScriptedDownloader::new(Duration::from_millis(20)), true);
    let (jukebox, _events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");
    let (a, b) = (youtube("aaaaaaaaaaa"), youtube("bbbbbbbbbbb"));

    jukebox.play(g.clone(), "alice", &a.source_url, voice()).await.expect("a");
    jukebox.play(g.clone(), "bob", &b.source_url, voice()).await.expect("b");

    eventually("a plays", || sink.plays().len() == 1).await;
    let snap = wait_snapshot(&jukebox, &g, "b prefetched", |s| {
        s.prefetched.as_ref() == Some(&b.id)
    })
    .await;
    assert_eq!(snap.current.as_ref().map(|t| &t.id), Some(&a.id));
    assert!(h.refs.is_pinned(&h.cache.final_path(&b.id)));

    sink.finish(&g);
    eventually("b plays", || sink.plays().len() == 2).await;
    assert_eq!(h.downloader.calls_for(&b), 1);
    assert_eq!(h.downloader.calls(), 2);
}

#[tokio::test]
async fn failed_prefetch_is_reported_without_second_download() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, mut events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");
    let (a, b) = (youtube("aaaaaaaaaaa"), youtube("bbbbbbbbbbb"));
    h.downloader.script(&b, &[Outcome::Fail, Outcome::Valid]);

    jukebox.play(g.clone(), "alice", &a.source_url, voice()).await.expect("a");
    eventually("a plays", || sink.plays().len() == 1).await;
    jukebox.play(g.clone(), "alice", &b.source_url, voice()).await.expect("b");
    wait_snapshot(&jukebox, &g, "b prefetch failed", |s| {
        s.prefetch_failed.as_ref() == Some(&b.id)
    })
    .await;

    sink.finish(&g);
    loop {
        match next_event(&mut events).await {
            JukeboxEvent::TrackFailed { track, .. } => {
                assert_eq!(track.id, b.id);
                break;
            }
            JukeboxEvent::NowPlaying { track, .. } => assert_eq!(track.id, a.id),
            other => panic!("unexpected event {other:?}"),
        }
    }
    let snap = wait_snapshot(&jukebox, &g, "idle", |s| s.state == QueueStateKind::Idle).await;
    assert!(snap.prefetch_failed.is_none());
    assert_eq!(h.downloader.calls_for(&b), 1);
    assert_eq!(sink.plays().len(), 1);
}

#[tokio::test]
async fn skip_releases_current_and_advances() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), false);
    let (jukebox, _events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");
    let (a, b) = (youtube("aaaaaaaaaaa"), youtube("bbbbbbbbbbb"));

    jukebox.play(g.clone(), "alice", &a.source_url, voice()).await.expect("a");
    jukebox.play(g.clone(), "alice", &b.source_url, voice()).await.expect("b");
    eventually("a plays", || sink.plays().len() == 1).await;
    let a_file = sink.plays()[0].file.clone();

    let skipped = jukebox.skip(g.clone()).await.expect("skip");
    assert_eq!(skipped.id, a.id);
    eventually("b plays without another command", || sink.plays().len() == 2).await;
    assert!(sink.stops() >= 1);
    // 临时缓存：跳过的文件在没有引用后删除
    assert!(!a_file.exists());
    assert_eq!(sink.plays()[1].file, h.cache.final_path(&b.id));
}

#[tokio::test]
async fn skip_without_playback_is_rejected() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, _events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");

    assert_eq!(jukebox.skip(g.clone()).await, Err(QueueError::NotPlaying));

    jukebox.play(g.clone(), "alice", &url("aaaaaaaaaaa"), voice()).await.expect("a");
    eventually("a plays", || sink.plays().len() == 1).await;
    sink.finish(&g);
    wait_snapshot(&jukebox, &g, "idle", |s| s.state == QueueStateKind::Idle).await;
    assert_eq!(jukebox.skip(g.clone()).await, Err(QueueError::NotPlaying));
}

#[tokio::test]
async fn stop_mid_fetch_discards_result() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(ScriptedDownloader::gated(gate.clone()), true);
    let (jukebox, mut events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");
    let a = youtube("aaaaaaaaaaa");

    jukebox.play(g.clone(), "alice", &a.source_url, voice()).await.expect("a");
    wait_snapshot(&jukebox, &g, "joining", |s| s.state == QueueStateKind::Joining).await;
    eventually("download started", || h.downloader.calls() == 1).await;

    jukebox.stop(g.clone()).await.expect("stop");
    assert_eq!(wait_left(&mut events).await, LeaveReason::Stopped);
    assert!(jukebox.tenants().await.is_empty());

    gate.add_permits(1);
    eventually("download committed", || h.cache.is_cached(&a.id)).await;
    eventually("no pins remain", || h.refs.pin_count() == 0).await;
    assert!(sink.plays().is_empty());
    assert!(jukebox.snapshot(g.clone()).await.is_none());
}

#[tokio::test]
async fn stop_unknown_tenant_reports_empty_queue() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, _events, _sink) = start(&h, Duration::from_secs(300));
    assert_eq!(
        jukebox.stop(TenantId::from("nobody")).await,
        Err(QueueError::EmptyQueue)
    );
}

#[tokio::test]
async fn idle_timer_is_cancelled_by_enqueue_and_evicts_when_left_alone() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), false);
    let (jukebox, mut events, sink) = start(&h, Duration::from_millis(300));
    let g = TenantId::from("g1");

    jukebox.play(g.clone(), "alice", &url("aaaaaaaaaaa"), voice()).await.expect("a");
    eventually("a plays", || sink.plays().len() == 1).await;
    sink.finish(&g);
    let snap = wait_snapshot(&jukebox, &g, "armed", |s| s.idle_timer_armed).await;
    assert_eq!(snap.state, QueueStateKind::Idle);

    jukebox.play(g.clone(), "alice", &url("bbbbbbbbbbb"), voice()).await.expect("b");
    let snap = jukebox.snapshot(g.clone()).await.expect("tenant alive");
    assert!(!snap.idle_timer_armed);
    eventually("b plays", || sink.plays().len() == 2).await;

    // 超过原计时时长，租户仍在
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(jukebox.tenants().await, vec![g.clone()]);

    sink.finish(&g);
    assert_eq!(wait_left(&mut events).await, LeaveReason::IdleTimeout);
    eventually("disconnected", || sink.disconnects() == 1).await;
    assert!(jukebox.tenants().await.is_empty());
    assert_eq!(h.refs.pin_count(), 0);
    assert!(!sink.plays()[1].file.exists());
}

#[tokio::test]
async fn failed_track_is_skipped() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, mut events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");
    let (a, b) = (youtube("aaaaaaaaaaa"), youtube("bbbbbbbbbbb"));
    h.downloader.script(&a, &[Outcome::Fail]);

    jukebox.play(g.clone(), "alice", &a.source_url, voice()).await.expect("a");
    jukebox.play(g.clone(), "alice", &b.source_url, voice()).await.expect("b");

    loop {
        match next_event(&mut events).await {
            JukeboxEvent::TrackFailed { track, .. } => {
                assert_eq!(track.id, a.id);
                break;
            }
            JukeboxEvent::NowPlaying { track, .. } => assert_ne!(track.id, a.id),
            other => panic!("unexpected event {other:?}"),
        }
    }
    eventually("b plays", || sink.plays().len() == 1).await;
    assert_eq!(sink.plays()[0].file, h.cache.final_path(&b.id));
}

#[tokio::test]
async fn sink_error_advances_to_next_track() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, _events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");

    jukebox.play(g.clone(), "alice", &url("aaaaaaaaaaa"), voice()).await.expect("a");
    jukebox.play(g.clone(), "alice", &url("bbbbbbbbbbb"), voice()).await.expect("b");
    eventually("a plays", || sink.plays().len() == 1).await;
    sink.fail(&g, "decoder exploded");
    eventually("b plays", || sink.plays().len() == 2).await;
}

#[tokio::test]
async fn invalid_requests_do_not_create_tenants() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, _events, _sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");

    let err = jukebox
        .play(g.clone(), "alice", "ftp://example.com/x.mp3", voice())
        .await
        .expect_err("invalid");
    assert!(matches!(err, QueueError::InvalidUrl(_)));
    let err = jukebox
        .play(g.clone(), "alice", &url("aaaaaaaaaaa"), None)
        .await
        .expect_err("no voice");
    assert_eq!(err, QueueError::NoVoiceTarget);
    assert!(jukebox.tenants().await.is_empty());
    assert_eq!(h.downloader.calls(), 0);
}

#[tokio::test]
async fn teardown_removes_tenant() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, mut events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");

    jukebox.play(g.clone(), "alice", &url("aaaaaaaaaaa"), voice()).await.expect("a");
    jukebox.play(g.clone(), "alice", &url("bbbbbbbbbbb"), voice()).await.expect("b");
    eventually("a plays", || sink.plays().len() == 1).await;

    assert!(jukebox.teardown(g.clone(), TeardownCause::AloneInChannel).await);
    assert_eq!(
        wait_left(&mut events).await,
        LeaveReason::Teardown(TeardownCause::AloneInChannel)
    );
    eventually("no pins", || h.refs.pin_count() == 0).await;
    assert!(!jukebox.teardown(g.clone(), TeardownCause::TenantRemoved).await);

    // 拆除后重新点歌会创建新的队列
    let e = jukebox.play(g.clone(), "alice", &url("ccccccccccc"), voice()).await.expect("c");
    assert_eq!(e.position, 0);
}

#[tokio::test]
async fn tenants_are_independent() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, _events, sink) = start(&h, Duration::from_secs(300));
    let (g1, g2) = (TenantId::from("g1"), TenantId::from("g2"));

    jukebox.play(g1.clone(), "alice", &url("aaaaaaaaaaa"), voice()).await.expect("g1");
    jukebox.play(g2.clone(), "bob", &url("aaaaaaaaaaa"), voice()).await.expect("g2");
    eventually("both play", || sink.plays().len() == 2).await;
    // 同一首歌只下载一次
    assert_eq!(h.downloader.calls(), 1);

    jukebox.stop(g1.clone()).await.expect("stop g1");
    let snap = jukebox.snapshot(g2.clone()).await.expect("g2 alive");
    assert_eq!(snap.state, QueueStateKind::Playing);
    assert!(h.refs.is_pinned(&h.cache.final_path(&youtube("aaaaaaaaaaa").id)));
}

#[tokio::test]
async fn request_replies_are_user_facing_lines() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, _events, sink) = start(&h, Duration::from_secs(300));
    let g = TenantId::from("g1");

    let reply = jukebox
        .handle(Request {
            tenant: g.clone(),
            requester: "alice".to_owned(),
            command: Command::Play(url("aaaaaaaaaaa")),
            voice: voice(),
        })
        .await;
    assert!(matches!(reply, Reply::Enqueued(_)));
    assert!(reply.to_string().starts_with("🎶"));
    eventually("a plays", || sink.plays().len() == 1).await;

    let reply = jukebox
        .handle(Request {
            tenant: g.clone(),
            requester: "alice".to_owned(),
            command: Command::Stop,
            voice: None,
        })
        .await;
    assert_eq!(reply, Reply::Stopped);

    let reply = jukebox
        .handle(Request {
            tenant: g,
            requester: "alice".to_owned(),
            command: Command::Skip,
            voice: None,
        })
        .await;
    assert_eq!(reply, Reply::Failed(QueueError::NotPlaying));
}

#[tokio::test]
async fn shutdown_drains_every_tenant() {
    let h = harness(ScriptedDownloader::new(Duration::ZERO), true);
    let (jukebox, _events, sink) = start(&h, Duration::from_secs(300));
    for g in ["g1", "g2"] {
        jukebox
            .play(TenantId::from(g), "alice", &url("aaaaaaaaaaa"), voice())
            .await
            .expect("play");
    }
    eventually("both play", || sink.plays().len() == 2).await;

    jukebox.shutdown().await;
    assert_eq!(sink.disconnects(), 2);
    assert_eq!(h.refs.pin_count(), 0);
    let err = jukebox
        .play(TenantId::from("g1"), "alice", &url("aaaaaaaaaaa"), voice())
        .await
        .expect_err("closed");
    assert_eq!(err, QueueError::ShuttingDown);
}
