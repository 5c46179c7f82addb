//! Bounded concurrency pool: a counting semaphore with optional (nullable)
//! capacity and FIFO waiters, grounded on the teacher's worktree pool
//! acquire/release-handle pattern.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

struct Inner {
    max: Option<usize>,
    current: usize,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// A counting semaphore whose capacity can be raised or lowered at runtime.
/// `max = None` means unlimited: `acquire` never blocks.
pub struct ConcurrencyPool {
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub current: usize,
    pub max: Option<usize>,
    pub available: Option<usize>,
}

impl ConcurrencyPool {
    pub fn new(max: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                max,
                current: 0,
                waiters: VecDeque::new(),
            }),
        })
    }

    /// Cooperative acquire: blocks until a slot is free, served FIFO.
    pub async fn acquire(self: &Arc<Self>) -> ReleaseToken {
        let rx = {
            let mut inner = self.inner.lock().await;
            match inner.max {
                Some(max) if inner.current >= max => {
                    let (tx, rx) = oneshot::channel();
                    inner.waiters.push_back(tx);
                    Some(rx)
                }
                _ => {
                    inner.current += 1;
                    None
                }
            }
        };
        if let Some(rx) = rx {
            // Another holder will bump `current` on our behalf when it hands
            // us the slot; see `release_one`.
            let _ = rx.await;
        }
        ReleaseToken::new(self.clone())
    }

    /// Non-blocking variant: `None` if at capacity.
    pub async fn try_acquire(self: &Arc<Self>) -> Option<ReleaseToken> {
        let mut inner = self.inner.lock().await;
        match inner.max {
            Some(max) if inner.current >= max => None,
            _ => {
                inner.current += 1;
                Some(ReleaseToken::new_locked(self.clone()))
            }
        }
    }

    async fn release_one(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(tx) = inner.waiters.pop_front() {
            // Hand our slot directly to the next waiter; `current` stays
            // unchanged since the slot was never freed, only reassigned.
            if tx.send(()).is_err() {
                // Waiter dropped (e.g. cancelled); try the next one.
                drop(inner);
                // Box::pin to keep this non-async-recursive call bounded.
                Box::pin(self.release_one()).await;
            }
            return;
        }
        inner.current = inner.current.saturating_sub(1);
    }

    /// Raises or lowers capacity. Raising wakes waiters up to the new
    /// headroom; lowering never preempts slots already held.
    pub async fn set_max_concurrent(&self, max: Option<usize>) {
        let mut inner = self.inner.lock().await;
        inner.max = max;
        debug!(?max, "pool capacity updated");
        loop {
            let headroom = match inner.max {
                None => true,
                Some(m) => inner.current < m,
            };
            if !headroom {
                break;
            }
            match inner.waiters.pop_front() {
                Some(tx) => {
                    if tx.send(()).is_ok() {
                        inner.current += 1;
                    }
                }
                None => break,
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            current: inner.current,
            max: inner.max,
            available: inner.max.map(|m| m.saturating_sub(inner.current)),
        }
    }
}

/// Held while an execution occupies a pool slot. Every path out of
/// `execute` — success, error, cancellation, or a dropped future — must
/// release exactly once; `Drop` is the backstop for the paths that don't
/// call `release` explicitly.
pub struct ReleaseToken {
    pool: Arc<ConcurrencyPool>,
    released: Arc<AtomicBool>,
}

impl ReleaseToken {
    fn new(pool: Arc<ConcurrencyPool>) -> Self {
        Self {
            pool,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    fn new_locked(pool: Arc<ConcurrencyPool>) -> Self {
        Self::new(pool)
    }

    /// Idempotent: a second call (or a concurrent call racing the `Drop`
    /// impl) is a no-op.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            let pool = self.pool.clone();
            tokio::spawn(async move {
                pool.release_one().await;
            });
        }
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            let pool = self.pool.clone();
            let released = self.released.clone();
            tokio::spawn(async move {
                if !released.swap(true, Ordering::SeqCst) {
                    pool.release_one().await;
                } else {
                    warn!("pool token released twice; second release is a no-op");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn try_acquire_fails_at_capacity() {
        let pool = ConcurrencyPool::new(Some(1));
        let _t1 = pool.try_acquire().await.unwrap();
        assert!(pool.try_acquire().await.is_none());
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let pool = ConcurrencyPool::new(Some(1));
        let token = pool.try_acquire().await.unwrap();
        token.release();
        token.release();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let stats = pool.stats().await;
        assert_eq!(stats.current, 0);
    }

    #[tokio::test]
    async fn unlimited_capacity_never_blocks() {
        let pool = ConcurrencyPool::new(None);
        let _a = pool.acquire().await;
        let _b = pool.acquire().await;
        let stats = pool.stats().await;
        assert_eq!(stats.current, 2);
        assert!(stats.available.is_none());
    }

    #[tokio::test]
    async fn waiters_served_fifo_on_release() {
        let pool = ConcurrencyPool::new(Some(1));
        let first = pool.acquire().await;

        let pool2 = pool.clone();
        let second_waiting = tokio::spawn(async move {
            let _second = pool2.acquire().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second_waiting.is_finished());

        first.release();
        tokio::time::timeout(Duration::from_millis(200), second_waiting)
            .await
            .expect("second waiter should have been granted the slot")
            .unwrap();
    }

    #[tokio::test]
    async fn raising_capacity_releases_waiters() {
        let pool = ConcurrencyPool::new(Some(1));
        let _first = pool.acquire().await;

        let pool2 = pool.clone();
        let second_waiting = tokio::spawn(async move {
            let _second = pool2.acquire().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.set_max_concurrent(Some(2)).await;
        tokio::time::timeout(Duration::from_millis(200), second_waiting)
            .await
            .expect("raising capacity should release the waiter")
            .unwrap();
    }
}
