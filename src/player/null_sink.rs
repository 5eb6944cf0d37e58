//! 不出声的播放输出：按固定时长模拟一首歌

use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::sink::{PlaybackSink, SinkConnection, SinkEvent, SinkEventSender};
use crate::domain::{TenantId, VoiceTarget};
use crate::error::{SinkError, TeardownError};

#[derive(Debug, Clone)]
pub struct NullSink {
    track_len: Duration,
}

impl NullSink {
    pub fn new(track_len: Duration) -> Self {
        Self { track_len }
    }
}

impl PlaybackSink for NullSink {
    fn attach(
        &self,
        tenant: &TenantId,
        target: &VoiceTarget,
        events: SinkEventSender,
    ) -> Result<Box<dyn SinkConnection>, SinkError> {
        tracing::info!(tenant = %tenant, target = %target, "NullSink 已连接");
        Ok(Box::new(NullConnection {
            tenant: tenant.clone(),
            track_len: self.track_len,
            events,
            playing: None,
        }))
    }
}

struct NullConnection {
    tenant: TenantId,
    track_len: Duration,
    events: SinkEventSender,
    playing: Option<JoinHandle<()>>,
}

impl SinkConnection for NullConnection {
    fn play(&mut self, play_id: u64, file: &Path) -> Result<(), SinkError> {
        std::fs::metadata(file).map_err(|source| SinkError::OpenFile {
            path: file.to_path_buf(),
            source,
        })?;
        self.stop();

        tracing::debug!(tenant = %self.tenant, play_id, path = %file.display(), "模拟播放");
        let events = self.events.clone();
        let track_len = self.track_len;
        self.playing = Some(tokio::spawn(async move {
            tokio::time::sleep(track_len).await;
            let _ = events.send(SinkEvent::Finished { play_id });
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.playing.take() {
            task.abort();
        }
    }

    fn disconnect(mut self: Box<Self>) -> Result<(), TeardownError> {
        self.stop();
        tracing::info!(tenant = %self.tenant, "NullSink 已断开");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_finishes_after_track_len() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"x").expect("write");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = NullSink::new(Duration::from_secs(3));
        let mut conn = sink
            .attach(&TenantId::from("g1"), &VoiceTarget::from("v1"), tx)
            .expect("attach");
        conn.play(7, &file).expect("play");

        assert_eq!(rx.recv().await, Some(SinkEvent::Finished { play_id: 7 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_suppresses_finished() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"x").expect("write");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = NullSink::new(Duration::from_secs(3));
        let mut conn = sink
            .attach(&TenantId::from("g1"), &VoiceTarget::from("v1"), tx)
            .expect("attach");
        conn.play(1, &file).expect("play");
        conn.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sink = NullSink::new(Duration::from_secs(1));
        let mut conn = sink
            .attach(&TenantId::from("g1"), &VoiceTarget::from("v1"), tx)
            .expect("attach");
        let err = conn
            .play(1, Path::new("/definitely/not/here.bin"))
            .expect_err("missing file");
        assert!(matches!(err, SinkError::OpenFile { .. }));
    }
}
