//! 链接 → TrackId 解析
//!
//! 纯函数，不做网络请求。YouTube 链接按视频 id 归一化，
//! 其余 `http(s)` 音频直链按规范化后的 URL 取摘要。

use super::ids::{TrackId, is_key_byte};
use crate::error::QueueError;

const YOUTUBE_ID_LEN: usize = 11;

const AUDIO_EXTENSIONS: &[&str] = &[
    ".webm", ".weba", ".ogg", ".opus", ".oga", ".mp3", ".m4a", ".mp4", ".flac", ".wav",
];

pub fn resolve(url: &str) -> Result<TrackId, QueueError> {
    let invalid = || QueueError::InvalidUrl(url.to_owned());

    let (scheme, rest) = url.split_once("://").ok_or_else(invalid)?;
    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(invalid());
    }

    let rest = rest.split('#').next().unwrap_or_default();
    let (authority, path_and_query) = match rest.find(['/', '?']) {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let host = authority
        .rsplit('@')
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if host.is_empty() {
        return Err(invalid());
    }

    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path_and_query, ""),
    };

    if let Some(video_id) = youtube_video_id(&host, path, query) {
        return Ok(TrackId::youtube(video_id));
    }
    if is_youtube_host(&host) {
        // YouTube 域名但解析不出视频 id（频道页、播放列表等）
        return Err(invalid());
    }

    let lower_path = path.to_ascii_lowercase();
    if AUDIO_EXTENSIONS.iter().any(|ext| lower_path.ends_with(ext)) {
        let mut normalized = format!("{scheme}://{host}{path}");
        if !query.is_empty() {
            normalized.push('?');
            normalized.push_str(query);
        }
        return Ok(TrackId::direct(&normalized));
    }

    Err(invalid())
}

fn is_youtube_host(host: &str) -> bool {
    let host = strip_subdomain(host);
    host == "youtube.com" || host == "youtu.be" || host == "youtube-nocookie.com"
}

fn strip_subdomain(host: &str) -> &str {
    ["www.", "m.", "music."]
        .iter()
        .find_map(|p| host.strip_prefix(p))
        .unwrap_or(host)
}

fn youtube_video_id(host: &str, path: &str, query: &str) -> Option<String> {
    let host = strip_subdomain(host);
    let candidate = match host {
        "youtu.be" => path.trim_start_matches('/').split('/').next()?.to_owned(),
        "youtube.com" | "youtube-nocookie.com" => {
            let mut segments = path.trim_start_matches('/').split('/');
            match segments.next()? {
                "watch" => query_param(query, "v")?,
                "shorts" | "embed" | "live" | "v" => segments.next()?.to_owned(),
                _ => return None,
            }
        }
        _ => return None,
    };

    (candidate.len() == YOUTUBE_ID_LEN && candidate.bytes().all(is_key_byte)).then_some(candidate)
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k != name {
            return None;
        }
        urlencoding::decode(v).ok().map(|v| v.into_owned())
    })
}
