//! 播放输出与每租户的播放循环

pub mod driver;
pub mod local_sink;
pub mod null_sink;
pub mod sink;
pub mod state;

pub use driver::{DriverContext, TenantExit, TenantHandle, spawn_tenant};
pub use local_sink::LocalSink;
pub use null_sink::NullSink;
pub use sink::{PlaybackSink, SinkConnection, SinkEvent, SinkEventSender};
pub use state::{NowPlaying, QueueState, TenantQueue};
