//! 按服务器（租户）排队的点歌播放核心
//!
//! 每个租户一个串行的播放循环；音频文件按曲目标识缓存在本地，
//! 下载去重、下一首预取、定期清理，三者共用一个引用集，
//! 保证清理不会删掉正在播放、正在下载或永久缓存的文件。

pub mod bootstrap;
pub mod cache;
pub mod cli;
pub mod core;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod frontend;
pub mod logging;
pub mod messages;
pub mod player;
pub mod settings;
pub mod sweeper;

pub use crate::core::{Jukebox, JukeboxConfig, spawn_jukebox};
pub use domain::{TenantId, Track, TrackId, VoiceTarget};
