//! Coordinates graceful shutdown: stop accepting new routing triggers,
//! give in-flight executions a grace period to finish, escalate to
//! cancellation if they don't, then close persistence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::executor::Executor;
use crate::routing::AcceptingChecker;
use crate::store::Store;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct Lifecycle {
    accepting: AtomicBool,
    shutting_down: AtomicBool,
    executor: Arc<Executor>,
    store: Store,
}

impl Lifecycle {
    pub fn new(executor: Arc<Executor>, store: Store) -> Arc<Self> {
        Arc::new(Self {
            accepting: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            executor,
            store,
        })
    }

    /// Runs the shutdown sequence. Re-entrant calls while a shutdown is
    /// already underway are a no-op.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("shutdown already in progress; ignoring duplicate signal");
            return;
        }

        self.accepting.store(false, Ordering::SeqCst);
        info!("no longer accepting new routing triggers");

        if self.drain(SHUTDOWN_GRACE).await {
            info!("all executions drained within the grace period");
        } else {
            let remaining = self.executor.running_execution_count().await;
            warn!(remaining, "grace period elapsed; cancelling remaining executions");
            self.executor.cancel_all().await;
            self.drain(SHUTDOWN_GRACE).await;
        }

        self.store.close().await;
        info!("persistence closed");
    }

    /// Polls the executor's running-execution count until it reaches zero
    /// or `budget` elapses. Returns whether it drained to zero.
    async fn drain(&self, budget: Duration) -> bool {
        let attempts = (budget.as_secs() / SHUTDOWN_POLL_INTERVAL.as_secs()).max(1);
        for _ in 0..attempts {
            if self.executor.running_execution_count().await == 0 {
                return true;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
        self.executor.running_execution_count().await == 0
    }
}

impl AcceptingChecker for Lifecycle {
    fn accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }
}
