//! 用本机声卡播放的输出，所有租户共用一个 mixer

use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStreamBuilder, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread;

use super::sink::{PlaybackSink, SinkConnection, SinkEvent, SinkEventSender};
use crate::domain::{TenantId, VoiceTarget};
use crate::error::{SinkError, TeardownError};

pub struct LocalSink {
    mixer: Mixer,
    // 丢弃后输出线程退出并关闭设备
    _close: std_mpsc::Sender<()>,
}

impl LocalSink {
    /// 在独立线程里打开默认输出设备
    pub fn open() -> Result<Self, SinkError> {
        let (tx_ready, rx_ready) = std_mpsc::channel::<Result<Mixer, String>>();
        let (tx_close, rx_close) = std_mpsc::channel::<()>();

        thread::Builder::new()
            .name("jukebox-audio-output".to_owned())
            .spawn(move || {
                let stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::error!(err = %e, "初始化音频输出失败");
                        let _ = tx_ready.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = tx_ready.send(Ok(stream.mixer().clone()));
                let _ = rx_close.recv();
                tracing::debug!("音频输出线程退出");
                drop(stream);
            })
            .map_err(|e| SinkError::Device(e.to_string()))?;

        let mixer = rx_ready
            .recv()
            .map_err(|_| SinkError::Device("音频输出线程意外退出".to_owned()))?
            .map_err(SinkError::Device)?;
        tracing::info!("本地音频输出已启动");
        Ok(Self {
            mixer,
            _close: tx_close,
        })
    }
}

impl PlaybackSink for LocalSink {
    fn attach(
        &self,
        tenant: &TenantId,
        target: &VoiceTarget,
        events: SinkEventSender,
    ) -> Result<Box<dyn SinkConnection>, SinkError> {
        tracing::info!(tenant = %tenant, target = %target, "本地输出已连接");
        Ok(Box::new(LocalConnection {
            tenant: tenant.clone(),
            mixer: self.mixer.clone(),
            events,
            current: None,
        }))
    }
}

struct ActiveSink {
    sink: Arc<Sink>,
    end_cancel: Arc<AtomicBool>,
}

struct LocalConnection {
    tenant: TenantId,
    mixer: Mixer,
    events: SinkEventSender,
    current: Option<ActiveSink>,
}

impl LocalConnection {
    fn build_sink(&self, file: &Path) -> Result<Sink, SinkError> {
        let f = File::open(file).map_err(|source| SinkError::OpenFile {
            path: file.to_path_buf(),
            source,
        })?;
        let decoder = Decoder::new(BufReader::new(f)).map_err(|e| SinkError::Decode {
            path: file.to_path_buf(),
            reason: e.to_string(),
        })?;
        let sink = Sink::connect_new(&self.mixer);
        sink.append(decoder);
        Ok(sink)
    }
}

impl SinkConnection for LocalConnection {
    fn play(&mut self, play_id: u64, file: &Path) -> Result<(), SinkError> {
        self.stop();

        let sink = Arc::new(self.build_sink(file)?);
        let cancel = Arc::new(AtomicBool::new(false));
        let sink_end = Arc::clone(&sink);
        let cancel_end = Arc::clone(&cancel);
        let tx_end = self.events.clone();
        let tenant = self.tenant.clone();

        let spawned = thread::Builder::new()
            .name(format!("jukebox-end-check-{play_id}"))
            .spawn(move || {
                let start = std::time::Instant::now();
                sink_end.sleep_until_end();
                let elapsed_ms = start.elapsed().as_millis();
                if cancel_end.load(Ordering::Relaxed) {
                    tracing::debug!(tenant = %tenant, play_id, elapsed_ms, "end check cancelled");
                } else {
                    tracing::debug!(tenant = %tenant, play_id, elapsed_ms, "playback ended");
                    let _ = tx_end.send(SinkEvent::Finished { play_id });
                }
            });
        if let Err(e) = spawned {
            sink.stop();
            return Err(SinkError::Device(format!("无法启动播放监视线程: {e}")));
        }

        self.current = Some(ActiveSink {
            sink,
            end_cancel: cancel,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cur) = self.current.take() {
            cur.end_cancel.store(true, Ordering::Relaxed);
            cur.sink.stop();
        }
    }

    fn disconnect(mut self: Box<Self>) -> Result<(), TeardownError> {
        self.stop();
        tracing::info!(tenant = %self.tenant, "本地输出已断开");
        Ok(())
    }
}
