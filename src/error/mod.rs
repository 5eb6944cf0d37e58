//! 统一错误处理模块
//!
//! 各模块的结构化错误类型。

mod app;
mod cache;
mod fetch;
mod queue;
mod sink;

pub use app::AppError;
pub use cache::CacheError;
pub use fetch::FetchError;
pub use queue::{QueueError, TeardownError};
pub use sink::SinkError;
