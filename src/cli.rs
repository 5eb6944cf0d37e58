use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::settings::SinkKind;

#[derive(Debug, Parser)]
#[command(
    name = "guild-jukebox",
    version,
    about = "按服务器排队播放的点歌机器人（带本地缓存与预取）"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// 覆盖数据目录（默认走系统 data_local_dir）
    #[arg(long, env = "JUKEBOX_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// 覆盖缓存目录（默认 `{data_dir}/audio_cache`）
    #[arg(long, env = "JUKEBOX_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// 覆盖日志目录（默认 `{data_dir}/logs`）
    #[arg(long, env = "JUKEBOX_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// 覆盖日志过滤（等价于设置 RUST_LOG）
    #[arg(long, env = "RUST_LOG")]
    pub log_filter: Option<String>,

    /// 播放输出
    #[arg(long, value_enum, env = "JUKEBOX_SINK")]
    pub sink: Option<SinkKind>,

    /// 队列播完后多久离开语音频道
    #[arg(long, env = "JUKEBOX_IDLE_TIMEOUT_SECS")]
    pub idle_timeout_secs: Option<u64>,

    /// 只用临时缓存：播完即删，启动时清掉旧文件
    #[arg(long, env = "JUKEBOX_SCRATCH")]
    pub scratch: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// 从标准输入读取指令并播放（默认）
    Run,

    /// 清理一次未被使用的临时缓存
    Sweep,

    /// 删除所有缓存文件（包括永久缓存）
    Wipe,

    /// 打印链接解析出的曲目标识和缓存文件名
    Resolve { url: String },
}
