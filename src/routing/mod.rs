//! The routing engine: the driver loop that walks a task through its
//! workspace's ordered agents until the task converges or a fatal error
//! gives up. Grounded on the same async-loop-with-sleep shape the
//! teacher's workflow executor uses for its own retry/step progression.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, info_span, warn, Instrument};

use crate::domain::{Agent, AuthorType, ExecutionResult, ExecutionStatus, RoutingStatus, Task, TaskRouting, TaskStatus};
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::executor::{Executor, ExecutionContext};
use crate::store::Store;

/// Lets the routing engine refuse new work during shutdown without a
/// direct dependency on the lifecycle coordinator, which in turn depends
/// on the executor the engine drives — see the lifecycle module for the
/// concrete implementation.
pub trait AcceptingChecker: Send + Sync {
    fn accepting(&self) -> bool;
}

pub struct RoutingEngine {
    store: Store,
    executor: Arc<Executor>,
    events: Arc<EventBus>,
    accepting: Arc<dyn AcceptingChecker>,
    max_retries: i64,
    retry_backoff: Duration,
}

impl RoutingEngine {
    pub fn new(
        store: Store,
        executor: Arc<Executor>,
        events: Arc<EventBus>,
        accepting: Arc<dyn AcceptingChecker>,
        max_retries: i64,
        retry_backoff: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            executor,
            events,
            accepting,
            max_retries,
            retry_backoff,
        })
    }

    /// Finds or creates the routing record for a task, acquires its lock,
    /// transitions the task to `in_progress`, and spawns the driver loop.
    /// Idempotent: calling this while the routing is already running just
    /// returns the current record.
    pub async fn trigger(self: &Arc<Self>, task_id: &str) -> Result<TaskRouting> {
        if !self.accepting.accepting() {
            return Err(crate::error::Error::Conflict(
                "server is shutting down; not accepting new routings".into(),
            ));
        }

        let task = self.store.get_task(task_id).await?;
        let mut routing = self.store.find_or_create_routing(task_id).await?;
        if routing.status.is_terminal() {
            routing = self.store.reset_routing(&routing.id).await?;
        }

        if !self.store.try_acquire_lock(&routing.id).await? {
            return Ok(routing);
        }

        if task.status != TaskStatus::InProgress {
            self.store.transition_task_status(task_id, TaskStatus::InProgress).await?;
        }
        self.store.set_routing_status(&routing.id, RoutingStatus::Running).await?;
        let routing = self.store.get_routing(&routing.id).await?;

        self.emit_routing_updated(&routing).await;
        self.events
            .emit(Event::TaskUpdated {
                id: task.id.clone(),
                workspace_id: task.workspace_id.clone(),
                status: TaskStatus::InProgress,
            })
            .await;

        self.spawn_driver_loop(routing.id.clone(), task_id.to_string());
        Ok(routing)
    }

    /// Re-enters the driver loop for an existing, non-terminal routing at
    /// its persisted position. Used both by startup recovery and by the
    /// on-demand resume API.
    pub async fn resume(self: &Arc<Self>, routing_id: &str) -> Result<TaskRouting> {
        let routing = self.store.get_routing(routing_id).await?;
        if routing.status.is_terminal() {
            return Ok(routing);
        }
        if !self.store.try_acquire_lock(routing_id).await? {
            return Ok(routing);
        }
        self.store.set_routing_status(routing_id, RoutingStatus::Running).await?;
        let routing = self.store.get_routing(routing_id).await?;
        self.emit_routing_updated(&routing).await;

        self.spawn_driver_loop(routing.id.clone(), routing.task_id.clone());
        Ok(routing)
    }

    /// Cancels all running executions for a task's routing and marks it
    /// failed with a user-facing reason. Idempotent; a routing already in
    /// a terminal state is still re-marked failed since the caller's
    /// intent is "stop further work", and a task with no routing at all
    /// is a no-op returning `None`.
    pub async fn cancel(self: &Arc<Self>, task_id: &str) -> Result<Option<TaskRouting>> {
        let routing = match self.store.get_routing_by_task(task_id).await? {
            Some(r) => r,
            None => return Ok(None),
        };

        self.executor.cancel_by_task(task_id).await;
        self.store.fail_routing(&routing.id, "Cancelled by user").await?;

        let task = self.store.get_task(task_id).await?;
        if task.status != TaskStatus::Todo {
            self.store.transition_task_status(task_id, TaskStatus::Todo).await?;
        }
        let comment = self
            .store
            .create_comment(task_id, "system", AuthorType::System, "Task routing cancelled by user", None)
            .await?;
        self.emit_comment_added(&comment).await;

        let routing = self.store.get_routing(&routing.id).await?;
        self.emit_routing_updated(&routing).await;
        Ok(Some(routing))
    }

    pub async fn get_routing(&self, task_id: &str) -> Result<Option<TaskRouting>> {
        self.store.get_routing_by_task(task_id).await
    }

    /// Looks up a routing by its own id rather than its task's.
    pub async fn get(&self, routing_id: &str) -> Result<TaskRouting> {
        self.store.get_routing(routing_id).await
    }

    pub async fn list_pending_or_running(&self) -> Result<Vec<TaskRouting>> {
        self.store.list_pending_or_running_routings().await
    }

    /// All routings, oldest first, optionally narrowed to one status.
    pub async fn list(&self, status: Option<RoutingStatus>) -> Result<Vec<TaskRouting>> {
        self.store.list_routings(status).await
    }

    /// Deletes a task and, by cascade, its routing/execution/comment
    /// history. Refuses to touch a task mid-flight unless `force` is set,
    /// in which case in-flight work is cancelled first.
    pub async fn delete(self: &Arc<Self>, task_id: &str, force: bool) -> Result<()> {
        let task = self.store.get_task(task_id).await?;
        if task.status == TaskStatus::InProgress {
            if !force {
                return Err(Error::Conflict(format!(
                    "task {task_id} is in progress; pass force to cancel and delete"
                )));
            }
            self.cancel(task_id).await?;
        }
        self.store.delete_task(task_id).await
    }

    fn spawn_driver_loop(self: &Arc<Self>, routing_id: String, task_id: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            let span = info_span!("routing", routing_id = %routing_id, task_id = %task_id);
            engine.run_execution_loop(routing_id, task_id).instrument(span).await;
        });
    }

    async fn run_execution_loop(self: Arc<Self>, routing_id: String, task_id: String) {
        let _lock_guard = LockGuard {
            store: self.store.clone(),
            routing_id: routing_id.clone(),
        };
        if let Err(e) = self.run_execution_loop_inner(&routing_id, &task_id).await {
            error!(error = %e, "routing driver loop failed fatally");
            if let Err(e2) = self.fail_routing_and_task(&routing_id, &task_id, &e.to_string()).await {
                error!(error = %e2, "failed to record routing failure");
            }
        }
    }

    async fn run_execution_loop_inner(&self, routing_id: &str, task_id: &str) -> Result<()> {
        let task = self.store.get_task(task_id).await?;

        loop {
            let routing = self.store.get_routing(routing_id).await?;
            if routing.status != RoutingStatus::Running {
                break;
            }

            let agents = self.store.list_agents_ordered(&task.workspace_id).await?;
            if agents.is_empty() {
                self.complete_routing_and_task(routing_id, task_id).await?;
                break;
            }

            if routing.current_agent_index as usize >= agents.len() {
                if routing.any_agent_worked {
                    self.store.start_new_iteration(routing_id).await?;
                    let routing = self.store.get_routing(routing_id).await?;
                    self.emit_routing_updated(&routing).await;
                    continue;
                } else {
                    self.complete_routing_and_task(routing_id, task_id).await?;
                    break;
                }
            }

            let agent = &agents[routing.current_agent_index as usize];
            let outcome = self.execute_agent(&task, agent, routing_id).await?;

            if outcome.success {
                if outcome.worked {
                    self.store.mark_agent_worked(routing_id).await?;
                }
                self.store.advance_to_next_agent(routing_id).await?;
                let routing = self.store.get_routing(routing_id).await?;
                self.emit_routing_updated(&routing).await;
                continue;
            }

            if outcome.retryable && routing.retry_count < self.max_retries {
                self.store.increment_retry_count(routing_id).await?;
                tokio::time::sleep(self.retry_backoff).await;
                continue;
            }

            let comment = self
                .store
                .create_comment(
                    task_id,
                    "system",
                    AuthorType::System,
                    &format!("Agent {} failed: {}", agent.name, outcome.error.unwrap_or_default()),
                    None,
                )
                .await?;
            self.emit_comment_added(&comment).await;
            self.store.mark_agent_worked(routing_id).await?;
            self.store.advance_to_next_agent(routing_id).await?;
            let routing = self.store.get_routing(routing_id).await?;
            self.emit_routing_updated(&routing).await;
        }
        Ok(())
    }

    async fn execute_agent(&self, task: &Task, agent: &Agent, routing_id: &str) -> Result<AgentOutcome> {
        let execution = self
            .store
            .create_execution(&task.id, routing_id, &agent.id, &agent.name, &agent.cli_type)
            .await?;
        self.events
            .emit(Event::ExecutionCreated {
                id: execution.id.clone(),
                task_id: task.id.clone(),
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                status: execution.status,
            })
            .await;

        let workspace = self.store.get_workspace(&task.workspace_id).await?;
        let workspace_instruction = self.store.get_workspace_setting(&workspace.id, "instruction").await?;

        let ctx = ExecutionContext {
            execution_id: execution.id.clone(),
            task: task.clone(),
            agent: agent.clone(),
            workspace,
            workspace_instruction,
        };
        let execution = self.executor.execute(ctx).await?;

        Ok(match (execution.status, execution.result) {
            (ExecutionStatus::Completed, Some(ExecutionResult::Comment)) => {
                let comment = self
                    .store
                    .create_comment(
                        &task.id,
                        &agent.name,
                        AuthorType::Agent,
                        &execution.output.clone().unwrap_or_default(),
                        None,
                    )
                    .await?;
                self.emit_comment_added(&comment).await;
                AgentOutcome::success(true)
            }
            (ExecutionStatus::Completed, Some(ExecutionResult::Skip)) | (ExecutionStatus::Completed, None) => {
                AgentOutcome::success(false)
            }
            (ExecutionStatus::Completed, Some(ExecutionResult::Error)) => AgentOutcome::success(true),
            (ExecutionStatus::Failed, _) => {
                let output = execution.output.clone().unwrap_or_default();
                let lower = output.to_lowercase();
                if lower.contains("timeout") || lower.contains("terminated") {
                    let comment = self
                        .store
                        .create_comment(
                            &task.id,
                            "system",
                            AuthorType::System,
                            &format!("Agent {} timed out", agent.name),
                            None,
                        )
                        .await?;
                    self.emit_comment_added(&comment).await;
                    AgentOutcome::success(true)
                } else {
                    AgentOutcome::retryable(output)
                }
            }
            _ => AgentOutcome::retryable("agent produced no result".to_string()),
        })
    }

    async fn complete_routing_and_task(&self, routing_id: &str, task_id: &str) -> Result<()> {
        self.store.complete_routing(routing_id).await?;
        let task = self.store.transition_task_status(task_id, TaskStatus::InReview).await?;
        let comment = self
            .store
            .create_comment(
                task_id,
                "system",
                AuthorType::System,
                "Task routing completed — awaiting review",
                None,
            )
            .await?;
        self.emit_comment_added(&comment).await;

        let routing = self.store.get_routing(routing_id).await?;
        self.emit_routing_updated(&routing).await;
        self.events
            .emit(Event::TaskUpdated {
                id: task.id,
                workspace_id: task.workspace_id,
                status: task.status,
            })
            .await;
        Ok(())
    }

    async fn fail_routing_and_task(&self, routing_id: &str, task_id: &str, err: &str) -> Result<()> {
        self.store.fail_routing(routing_id, err).await?;
        let task = self.store.get_task(task_id).await?;
        if task.status != TaskStatus::Todo {
            self.store.transition_task_status(task_id, TaskStatus::Todo).await?;
        }
        let comment = self
            .store
            .create_comment(
                task_id,
                "system",
                AuthorType::System,
                &format!("Task routing failed: {err}"),
                None,
            )
            .await?;
        self.emit_comment_added(&comment).await;

        let routing = self.store.get_routing(routing_id).await?;
        self.emit_routing_updated(&routing).await;
        Ok(())
    }

    async fn emit_comment_added(&self, comment: &crate::domain::Comment) {
        self.events
            .emit(Event::TaskCommentAdded {
                task_id: comment.task_id.clone(),
                comment_id: comment.id.clone(),
                author: comment.author.clone(),
                author_type: comment.author_type.as_str().to_string(),
            })
            .await;
    }

    async fn emit_routing_updated(&self, routing: &TaskRouting) {
        self.events
            .emit(Event::RoutingUpdated {
                task_id: routing.task_id.clone(),
                status: routing.status,
                current_agent_index: routing.current_agent_index,
                iteration: routing.iteration,
            })
            .await;
    }
}

struct AgentOutcome {
    success: bool,
    worked: bool,
    retryable: bool,
    error: Option<String>,
}

impl AgentOutcome {
    fn success(worked: bool) -> Self {
        Self {
            success: true,
            worked,
            retryable: false,
            error: None,
        }
    }

    fn retryable(error: String) -> Self {
        Self {
            success: false,
            worked: false,
            retryable: true,
            error: Some(error),
        }
    }
}

/// Releases the routing lock once the driver loop exits, however it exits.
struct LockGuard {
    store: Store,
    routing_id: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let store = self.store.clone();
        let routing_id = self.routing_id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.release_lock(&routing_id).await {
                warn!(routing_id, error = %e, "failed to release routing lock on driver loop exit");
            }
        });
    }
}
