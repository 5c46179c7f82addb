//! Startup recovery: resumes every non-terminal routing left over from a
//! previous process. Orphaned executions (still `pending`/`running` in the
//! store with no child process behind them) are swept before the driver
//! loop re-enters, so the server never mistakes a stale row for live work.

use std::sync::Arc;

use tracing::{error, info, info_span, warn, Instrument};

use crate::domain::{ExecutionStatus, TaskRouting};
use crate::error::Result;
use crate::routing::RoutingEngine;
use crate::store::Store;

const ORPHAN_MESSAGE: &str = "Execution abandoned by server restart";

pub struct Recovery {
    store: Store,
    routing: Arc<RoutingEngine>,
}

impl Recovery {
    pub fn new(store: Store, routing: Arc<RoutingEngine>) -> Self {
        Self { store, routing }
    }

    /// Scans routings in `pending`/`running` status, oldest first, and
    /// resumes each one. A single routing's failure to recover is logged
    /// and does not halt the sweep. Returns how many were resumed.
    pub async fn run(&self) -> Result<usize> {
        let routings = self.store.list_pending_or_running_routings().await?;
        info!(count = routings.len(), "starting recovery scan");

        let mut resumed = 0;
        for routing in routings {
            let span = info_span!("recovery", routing_id = %routing.id, task_id = %routing.task_id);
            match self.recover_one(&routing).instrument(span).await {
                Ok(()) => resumed += 1,
                Err(e) => error!(routing_id = %routing.id, error = %e, "failed to recover routing"),
            }
        }
        info!(resumed, "recovery scan complete");
        Ok(resumed)
    }

    async fn recover_one(&self, routing: &TaskRouting) -> Result<()> {
        self.sweep_orphaned_executions(routing).await?;
        self.routing.resume(&routing.id).await?;
        Ok(())
    }

    async fn sweep_orphaned_executions(&self, routing: &TaskRouting) -> Result<()> {
        let executions = self.store.list_executions_for_routing(&routing.id).await?;
        for execution in executions {
            if matches!(execution.status, ExecutionStatus::Pending | ExecutionStatus::Running) {
                warn!(execution_id = %execution.id, "marking orphaned execution failed before resume");
                self.store
                    .fail_execution(&execution.id, Some(ORPHAN_MESSAGE.to_string()))
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::RoutingStatus;
    use crate::events::EventBus;
    use crate::executor::Executor;
    use crate::pool::ConcurrencyPool;
    use crate::routing::AcceptingChecker;
    use crate::subprocess::MockAgentSpawner;
    use std::time::Duration;

    struct AlwaysAccepting;
    impl AcceptingChecker for AlwaysAccepting {
        fn accepting(&self) -> bool {
            true
        }
    }

    async fn setup() -> (Store, Arc<RoutingEngine>) {
        let store = Store::open_in_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let events = EventBus::new();
        let pool = ConcurrencyPool::new(Some(4));
        let spawner: Arc<dyn crate::subprocess::AgentSpawner> = Arc::new(MockAgentSpawner::new());
        let executor = Arc::new(Executor::new(
            store.clone(),
            events.clone(),
            pool,
            spawner,
            Config::default(),
            tmp.path().to_path_buf(),
        ));
        let routing = RoutingEngine::new(store.clone(), executor, events, Arc::new(AlwaysAccepting), 3, Duration::from_millis(1));
        (store, routing)
    }

    #[tokio::test]
    async fn terminal_routings_are_skipped() {
        let (store, routing) = setup().await;
        let ws = store.create_workspace("ws").await.unwrap();
        let task = store.create_task(&ws.id, "t", None).await.unwrap();
        let r = store.find_or_create_routing(&task.id).await.unwrap();
        store.complete_routing(&r.id).await.unwrap();

        let recovery = Recovery::new(store.clone(), routing);
        let resumed = recovery.run().await.unwrap();
        assert_eq!(resumed, 0);
    }

    #[tokio::test]
    async fn pending_routing_with_orphaned_execution_is_swept_and_resumed() {
        let (store, routing) = setup().await;
        let ws = store.create_workspace("ws").await.unwrap();
        let task = store.create_task(&ws.id, "t", None).await.unwrap();
        let agent = store
            .create_agent(&ws.id, "Reviewer", "claude", None, None, None)
            .await
            .unwrap();
        let r = store.find_or_create_routing(&task.id).await.unwrap();
        store.set_routing_status(&r.id, RoutingStatus::Running).await.unwrap();
        let orphan = store
            .create_execution(&task.id, &r.id, &agent.id, &agent.name, &agent.cli_type)
            .await
            .unwrap();
        store.mark_execution_running(&orphan.id).await.unwrap();

        let recovery = Recovery::new(store.clone(), routing);
        let resumed = recovery.run().await.unwrap();
        assert_eq!(resumed, 1);

        let orphan = store.get_execution(&orphan.id).await.unwrap();
        assert_eq!(orphan.status, ExecutionStatus::Failed);
        assert_eq!(orphan.output.as_deref(), Some(ORPHAN_MESSAGE));
    }
}
