//! 缓存文件校验：最小尺寸 + 容器魔数

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

const HEADER_LEN: usize = 12;

/// 识别出的音频容器
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// EBML 头，yt-dlp 的 251 格式（opus/webm）
    WebM,
    Ogg,
    Mp4,
    Mp3,
    Flac,
    Wav,
}

pub fn sniff(header: &[u8]) -> Option<Container> {
    match header {
        [0x1A, 0x45, 0xDF, 0xA3, ..] => Some(Container::WebM),
        [b'O', b'g', b'g', b'S', ..] => Some(Container::Ogg),
        [b'f', b'L', b'a', b'C', ..] => Some(Container::Flac),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some(Container::Wav),
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some(Container::Mp4),
        [b'I', b'D', b'3', ..] => Some(Container::Mp3),
        [0xFF, b, ..] if b & 0xE0 == 0xE0 => Some(Container::Mp3),
        _ => None,
    }
}

/// 通过校验的文件信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validated {
    pub container: Container,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Invalid {
    #[error("文件不存在")]
    Missing,
    #[error("文件过小: {size} < {min} 字节")]
    TooSmall { size: u64, min: u64 },
    #[error("未知的容器头: {0}")]
    UnknownHeader(String),
    #[error("读取失败: {0}")]
    Read(String),
}

#[derive(Debug, Clone, Copy)]
pub struct Validator {
    min_bytes: u64,
}

impl Validator {
    pub fn new(min_bytes: u64) -> Self {
        Self { min_bytes }
    }

    pub fn check(&self, path: &Path) -> Result<Validated, Invalid> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Invalid::Missing),
            Err(e) => return Err(Invalid::Read(e.to_string())),
        };
        let size = file
            .metadata()
            .map_err(|e| Invalid::Read(e.to_string()))?
            .len();
        if size < self.min_bytes.max(HEADER_LEN as u64) {
            return Err(Invalid::TooSmall {
                size,
                min: self.min_bytes,
            });
        }

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|e| Invalid::Read(e.to_string()))?;

        // 日志里只出现头部的十六进制，不出现文件内容
        let container = sniff(&header).ok_or_else(|| Invalid::UnknownHeader(hex::encode(&header[..4])))?;
        Ok(Validated {
            container,
            size_bytes: size,
        })
    }
}
