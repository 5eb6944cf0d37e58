//! 带代数的空闲计时器
//!
//! 每次 `arm` 递增代数；触发时用 `take_if` 做 compare-and-cancel，
//! 旧代数的触发一律丢弃。

use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Instant, Sleep, sleep_until};

#[derive(Debug, Default)]
pub struct IdleTimer {
    generation: u64,
    armed: Option<(u64, Pin<Box<Sleep>>)>,
}

impl IdleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 重新计时，返回新的代数
    pub fn arm(&mut self, after: Duration) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        let deadline = Instant::now() + after;
        self.armed = Some((self.generation, Box::pin(sleep_until(deadline))));
        self.generation
    }

    /// 取消计时；返回之前是否处于计时中
    pub fn cancel(&mut self) -> bool {
        self.armed.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// 仅当 `generation` 仍是当前计时的代数时才消费它
    pub fn take_if(&mut self, generation: u64) -> bool {
        match &self.armed {
            Some((g, _)) if *g == generation => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }

    /// 等待到期并返回代数；未计时则永远挂起
    pub async fn fired(&mut self) -> u64 {
        match &mut self.armed {
            Some((generation, sleep)) => {
                sleep.as_mut().await;
                *generation
            }
            None => std::future::pending().await,
        }
    }
}
