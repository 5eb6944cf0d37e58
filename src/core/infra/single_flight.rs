//! 按 key 合并并发请求
//!
//! 同一 key 同时只有一个底层任务在跑；后来的调用者挂到等待列表上，
//! 任务结束后把同一个结果 clone 给所有等待者。
//! 任务本身是 `tokio::spawn` 出去的，调用者中途放弃不会打断它。

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// 底层任务 panic 或被运行时丢弃
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("合并请求的底层任务已中断")]
pub struct FlightAborted;

type Waiters<K, V> = Arc<Mutex<HashMap<K, Vec<oneshot::Sender<V>>>>>;

pub struct SingleFlight<K, V> {
    waiters: Waiters<K, V>,
}

impl<K, V> Clone for SingleFlight<K, V> {
    fn clone(&self) -> Self {
        Self {
            waiters: Arc::clone(&self.waiters),
        }
    }
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            waiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock<K, V>(w: &Waiters<K, V>) -> MutexGuard<'_, HashMap<K, Vec<oneshot::Sender<V>>>> {
    w.lock().unwrap_or_else(|e| e.into_inner())
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, key: &K) -> bool {
        lock(&self.waiters).contains_key(key)
    }

    /// 加入（或发起）`key` 对应的任务并等待结果。
    ///
    /// 只有发起者的 `make` 会被调用。
    pub async fn run<F, Fut>(&self, key: K, make: F) -> Result<V, FlightAborted>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut map = lock(&self.waiters);
            match map.get_mut(&key) {
                Some(list) => {
                    list.push(tx);
                    false
                }
                None => {
                    map.insert(key.clone(), vec![tx]);
                    true
                }
            }
        };

        if leader {
            let fut = make();
            let done = FlightDone {
                waiters: Arc::clone(&self.waiters),
                key: Some(key),
            };
            tokio::spawn(async move {
                let value = fut.await;
                done.finish(value);
            });
        }

        rx.await.map_err(|_| FlightAborted)
    }
}

/// 任务结束时摘掉等待列表；panic 时 drop 也会摘掉，等待者收到 `FlightAborted`
struct FlightDone<K: Eq + Hash, V> {
    waiters: Waiters<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V: Clone> FlightDone<K, V> {
    fn finish(mut self, value: V) {
        let Some(key) = self.key.take() else {
            return;
        };
        let list = lock(&self.waiters).remove(&key).unwrap_or_default();
        for tx in list {
            let _ = tx.send(value.clone());
        }
    }
}

impl<K: Eq + Hash, V> Drop for FlightDone<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(&self.waiters).remove(&key);
        }
    }
}
