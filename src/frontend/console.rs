//! 控制台指令来源：从输入读消息，把回复和通知写到输出

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::{mpsc, watch};

use super::parser::{Inbound, parse_line};
use crate::core::Jukebox;
use crate::domain::TenantId;
use crate::messages::{JukeboxEvent, LeaveReason, TeardownCause};

pub async fn run_console<R, W>(
    jukebox: Jukebox,
    mut events: mpsc::UnboundedReceiver<JukeboxEvent>,
    reader: R,
    mut writer: W,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut events_open = true;

    loop {
        select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            maybe_evt = events.recv(), if events_open => {
                match maybe_evt {
                    Some(evt) => {
                        if let Some((tenant, text)) = format_event(&evt) {
                            write_line(&mut writer, Some(tenant), &text).await?;
                        }
                    }
                    None => events_open = false,
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("控制台输入结束");
                    break;
                };
                handle_line(&jukebox, &mut writer, &line).await?;
            }
        }
    }

    // 输出已经排队的通知
    while let Ok(evt) = events.try_recv() {
        if let Some((tenant, text)) = format_event(&evt) {
            write_line(&mut writer, Some(tenant), &text).await?;
        }
    }
    writer.flush().await
}

async fn handle_line<W>(jukebox: &Jukebox, writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match parse_line(line) {
        Ok(Inbound::Request(req)) => {
            tracing::debug!(tenant = %req.tenant, requester = %req.requester, command = ?req.command, "收到指令");
            let tenant = req.tenant.clone();
            let reply = jukebox.handle(req).await;
            write_line(writer, Some(&tenant), &reply.to_string()).await
        }
        Ok(Inbound::Presence { tenant, cause }) => {
            if !jukebox.teardown(tenant.clone(), cause).await {
                tracing::debug!(tenant = %tenant, ?cause, "成员事件对应的租户不存在");
            }
            Ok(())
        }
        Ok(Inbound::Ignored) => Ok(()),
        Err(e) => write_line(writer, None, &format!("❌ {e}")).await,
    }
}

fn format_event(evt: &JukeboxEvent) -> Option<(&TenantId, String)> {
    match evt {
        JukeboxEvent::NowPlaying { tenant, track } => Some((
            tenant,
            format!("▶️ 正在播放: {}（{} 点播）", track.source_url, track.requested_by),
        )),
        JukeboxEvent::TrackFailed {
            tenant,
            track,
            reason,
        } => Some((
            tenant,
            format!("⚠️ 无法播放 {}，已跳过: {reason}", track.source_url),
        )),
        JukeboxEvent::Left { tenant, reason } => {
            let text = match reason {
                // `!stop` 的回复已经说明
                LeaveReason::Stopped => return None,
                LeaveReason::IdleTimeout => "💤 空闲超时，已离开语音频道".to_owned(),
                LeaveReason::Teardown(TeardownCause::AloneInChannel) => {
                    "👋 频道里没有其他人了，已离开".to_owned()
                }
                LeaveReason::Teardown(TeardownCause::Disconnected) => {
                    "👋 已被断开连接，播放队列已清空".to_owned()
                }
                LeaveReason::Teardown(TeardownCause::TenantRemoved) => {
                    "👋 已被移出服务器，播放队列已清空".to_owned()
                }
                LeaveReason::Shutdown => "👋 服务关闭，已离开语音频道".to_owned(),
            };
            Some((tenant, text))
        }
    }
}

async fn write_line<W>(writer: &mut W, tenant: Option<&TenantId>, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let ts = chrono::Local::now().format("%H:%M:%S");
    let line = match tenant {
        Some(t) => format!("[{ts}] [{t}] {text}\n"),
        None => format!("[{ts}] {text}\n"),
    };
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
