//! Bundles the long-lived services a CLI command needs: persistence, the
//! event bus, the executor, the routing engine, and the lifecycle
//! coordinator. Built fresh per process invocation — this binary is a
//! thin client, not a resident daemon, except while `serve` blocks.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::events::EventBus;
use crate::executor::Executor;
use crate::lifecycle::Lifecycle;
use crate::pool::ConcurrencyPool;
use crate::routing::RoutingEngine;
use crate::store::Store;
use crate::subprocess::{AgentSpawner, TokioAgentSpawner};

pub struct AppContext {
    pub config: Config,
    pub store: Store,
    pub events: Arc<EventBus>,
    pub executor: Arc<Executor>,
    pub routing: Arc<RoutingEngine>,
    pub lifecycle: Arc<Lifecycle>,
}

impl AppContext {
    pub async fn build(config_path: Option<&std::path::Path>) -> Result<Self> {
        let config = Config::load(config_path)?;
        info!(
            data_dir = %config.data_dir.display(),
            agent_binary = %config.agent_binary,
            max_concurrent_executions = ?config.max_concurrent_executions,
            "resolved configuration"
        );

        let store = Store::open(&config.db_path()).await?;
        let events = EventBus::new();
        let pool = ConcurrencyPool::new(config.max_concurrent_executions);
        let spawner: Arc<dyn AgentSpawner> = Arc::new(TokioAgentSpawner);
        let tmp_dir = std::env::temp_dir().join("prodigy-router");

        let executor = Arc::new(Executor::new(
            store.clone(),
            events.clone(),
            pool,
            spawner,
            config.clone(),
            tmp_dir,
        ));
        let lifecycle = Lifecycle::new(executor.clone(), store.clone());
        let routing = RoutingEngine::new(
            store.clone(),
            executor.clone(),
            events.clone(),
            lifecycle.clone(),
            config.max_retries,
            std::time::Duration::from_millis(config.retry_backoff_ms),
        );

        Ok(Self {
            config,
            store,
            events,
            executor,
            routing,
            lifecycle,
        })
    }
}
