//! Runs one agent against one task and delivers a structured result.
//!
//! Owns the per-execution sandbox directory, the agent child process, and
//! the execution row's lifecycle (`pending -> running -> terminal`).

mod sandbox;
mod wire;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::config::Config;
use crate::domain::{Agent, Execution, ExecutionResult, ExecutionStatus, Task, Workspace};
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::pool::ConcurrencyPool;
use crate::store::Store;
use crate::subprocess::{AgentSpawner, ExitOutcome, ProcessCommandBuilder};

pub use sandbox::Sandbox;
pub use wire::{TaskInput, TaskOutput};

const HARD_KILL_GRACE: Duration = Duration::from_secs(5);
const STDIN_PROMPT_TEMPLATE: &str =
    "Read {path} and follow the instructions in fully autonomous mode.";

/// Everything the executor needs to run one agent invocation.
pub struct ExecutionContext {
    pub execution_id: String,
    pub task: Task,
    pub agent: Agent,
    pub workspace: Workspace,
    pub workspace_instruction: Option<String>,
}

pub struct Executor {
    store: Store,
    events: Arc<EventBus>,
    pool: Arc<ConcurrencyPool>,
    spawner: Arc<dyn AgentSpawner>,
    config: Config,
    tmp_dir: std::path::PathBuf,
    running_by_execution: Mutex<HashMap<String, RunningHandle>>,
    running_by_task: Mutex<HashMap<String, Vec<String>>>,
}

#[derive(Clone)]
struct RunningHandle {
    cancel: tokio_util_cancel::CancelHandle,
}

/// A cooperative cancellation signal backed by `Notify`, so `cancel()`
/// wakes the in-flight read loop immediately instead of requiring it to
/// poll.
mod tokio_util_cancel {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[derive(Clone)]
    pub struct CancelHandle {
        flag: Arc<AtomicBool>,
        notify: Arc<Notify>,
    }

    impl CancelHandle {
        pub fn new() -> Self {
            Self {
                flag: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
            }
        }
        pub fn cancel(&self) {
            self.flag.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
        /// Resolves once cancellation has been signalled, even if `cancel`
        /// was already called before this was awaited.
        pub async fn cancelled(&self) {
            if self.flag.load(Ordering::SeqCst) {
                return;
            }
            self.notify.notified().await;
        }
    }
}

impl Executor {
    pub fn new(
        store: Store,
        events: Arc<EventBus>,
        pool: Arc<ConcurrencyPool>,
        spawner: Arc<dyn AgentSpawner>,
        config: Config,
        tmp_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            store,
            events,
            pool,
            spawner,
            config,
            tmp_dir,
            running_by_execution: Mutex::new(HashMap::new()),
            running_by_task: Mutex::new(HashMap::new()),
        }
    }

    /// Runs one agent invocation to completion and returns the final,
    /// persisted execution row. Never returns an `Err` for agent-side
    /// failures (crash, timeout, bad output) — those are encoded in the
    /// returned `Execution`'s status/result/output, matching the
    /// classification table the routing engine consumes. `Err` is
    /// reserved for store/io failures that prevent recording a result at
    /// all.
    pub async fn execute(&self, ctx: ExecutionContext) -> Result<Execution> {
        let span = info_span!(
            "execution",
            execution_id = %ctx.execution_id,
            task_id = %ctx.task.id,
            agent = %ctx.agent.name,
        );
        self.execute_inner(ctx).instrument(span).await
    }

    async fn execute_inner(&self, ctx: ExecutionContext) -> Result<Execution> {
        let token = self.pool.acquire().await;

        let execution = self.store.mark_execution_running(&ctx.execution_id).await?;
        self.events
            .emit(Event::ExecutionUpdated {
                id: execution.id.clone(),
                task_id: execution.task_id.clone(),
                status: execution.status,
                result: execution.result,
            })
            .await;

        let sandbox = match Sandbox::prepare(&self.tmp_dir, &self.store, &self.config, &ctx).await {
            Ok(sandbox) => sandbox,
            Err(e) => {
                warn!(error = %e, "failed to prepare execution sandbox");
                token.release();
                return self
                    .store
                    .fail_execution(&ctx.execution_id, Some(format!("setup failed: {e}")))
                    .await;
            }
        };

        let outcome = self.run_agent(&ctx, &sandbox).await;
        sandbox.cleanup();
        token.release();

        let execution = match outcome {
            Ok(RunOutcome::Completed { result, output }) => {
                self.store.complete_execution(&ctx.execution_id, result, output).await?
            }
            Ok(RunOutcome::Killed) => {
                self.store
                    .fail_execution(
                        &ctx.execution_id,
                        Some("Execution was terminated because it exceeded its timeout".to_string()),
                    )
                    .await?
            }
            Ok(RunOutcome::NonZeroExit(code)) => {
                self.store
                    .fail_execution(&ctx.execution_id, Some(format!("CLI exited with code {code}")))
                    .await?
            }
            Err(e) => {
                self.store
                    .fail_execution(&ctx.execution_id, Some(e.to_string()))
                    .await?
            }
        };

        self.events
            .emit(Event::ExecutionUpdated {
                id: execution.id.clone(),
                task_id: execution.task_id.clone(),
                status: execution.status,
                result: execution.result,
            })
            .await;
        self.events.close_execution_logs(&execution.id).await;
        Ok(execution)
    }

    async fn run_agent(&self, ctx: &ExecutionContext, sandbox: &Sandbox) -> Result<RunOutcome> {
        let mut args = self.config.agent_args.clone();
        let prompt = STDIN_PROMPT_TEMPLATE.replace("{path}", &sandbox.task_input_path().display().to_string());

        let command = ProcessCommandBuilder::new(&ctx.agent.cli_type)
            .args(args.drain(..))
            .current_dir(sandbox.dir())
            .env("BROWSER", "none")
            .stdin(prompt)
            .build();

        let mut spawned = self.spawner.spawn(command).await.map_err(crate::error::Error::from)?;

        let cancel = tokio_util_cancel::CancelHandle::new();
        self.register_running(&ctx.execution_id, &ctx.task.id, cancel.clone()).await;

        let timeout_minutes = ctx.agent.timeout_minutes.or(self.config.default_timeout_minutes);
        let deadline = timeout_minutes.map(|m| Duration::from_secs((m.max(0) as u64) * 60));

        let deadline_instant = deadline.map(|d| tokio::time::Instant::now() + d);
        let mut killed = false;
        loop {
            enum Woken {
                Line(Option<String>),
                TimedOut,
                Cancelled,
            }

            let woken = match deadline_instant {
                Some(at) => {
                    tokio::select! {
                        line = spawned.recv_line() => Woken::Line(line),
                        _ = tokio::time::sleep_until(at) => Woken::TimedOut,
                        _ = cancel.cancelled() => Woken::Cancelled,
                    }
                }
                None => {
                    tokio::select! {
                        line = spawned.recv_line() => Woken::Line(line),
                        _ = cancel.cancelled() => Woken::Cancelled,
                    }
                }
            };

            match woken {
                Woken::Line(Some(line)) => {
                    if let Some(text) = wire::extract_log_text(&line) {
                        self.store.append_execution_log(&ctx.execution_id, &text).await?;
                        self.events
                            .emit(Event::ExecutionLog {
                                execution_id: ctx.execution_id.clone(),
                                content: text,
                                timestamp: crate::domain::ids::now_millis(),
                            })
                            .await;
                    }
                }
                Woken::Line(None) => break,
                Woken::TimedOut => {
                    warn!("agent exceeded its timeout, sending termination signal");
                    spawned.terminate().await;
                    if tokio::time::timeout(HARD_KILL_GRACE, spawned.wait()).await.is_err() {
                        spawned.kill().await;
                    }
                    killed = true;
                    break;
                }
                Woken::Cancelled => {
                    info!("execution cancelled, sending termination signal");
                    spawned.terminate().await;
                    if tokio::time::timeout(HARD_KILL_GRACE, spawned.wait()).await.is_err() {
                        spawned.kill().await;
                    }
                    killed = true;
                    break;
                }
            }
        }

        // Stdout reaching EOF doesn't guarantee the child has exited yet;
        // the timeout/cancel deadline still covers this final wait.
        let exit = if killed {
            ExitOutcome::Killed
        } else {
            enum WaitWoken {
                Exited(std::result::Result<ExitOutcome, crate::subprocess::ProcessError>),
                TimedOut,
                Cancelled,
            }
            let woken = match deadline_instant {
                Some(at) => {
                    tokio::select! {
                        result = spawned.wait() => WaitWoken::Exited(result),
                        _ = tokio::time::sleep_until(at) => WaitWoken::TimedOut,
                        _ = cancel.cancelled() => WaitWoken::Cancelled,
                    }
                }
                None => {
                    tokio::select! {
                        result = spawned.wait() => WaitWoken::Exited(result),
                        _ = cancel.cancelled() => WaitWoken::Cancelled,
                    }
                }
            };
            match woken {
                WaitWoken::Exited(result) => result.map_err(crate::error::Error::from)?,
                WaitWoken::TimedOut => {
                    warn!("agent exceeded its timeout while exiting, sending termination signal");
                    spawned.terminate().await;
                    if tokio::time::timeout(HARD_KILL_GRACE, spawned.wait()).await.is_err() {
                        spawned.kill().await;
                    }
                    ExitOutcome::Killed
                }
                WaitWoken::Cancelled => {
                    info!("execution cancelled while exiting, sending termination signal");
                    spawned.terminate().await;
                    if tokio::time::timeout(HARD_KILL_GRACE, spawned.wait()).await.is_err() {
                        spawned.kill().await;
                    }
                    ExitOutcome::Killed
                }
            }
        };

        self.unregister_running(&ctx.execution_id, &ctx.task.id).await;

        match exit {
            ExitOutcome::Killed => Ok(RunOutcome::Killed),
            ExitOutcome::Failure(code) => Ok(RunOutcome::NonZeroExit(code)),
            ExitOutcome::Success => {
                let output = wire::read_task_output(&sandbox.task_output_path());
                match output {
                    Some(TaskOutput { result: Some(result), content }) => {
                        Ok(RunOutcome::Completed { result, output: content })
                    }
                    _ => Ok(RunOutcome::Completed {
                        result: ExecutionResult::Skip,
                        output: None,
                    }),
                }
            }
        }
    }

    async fn register_running(&self, execution_id: &str, task_id: &str, cancel: tokio_util_cancel::CancelHandle) {
        self.running_by_execution
            .lock()
            .await
            .insert(execution_id.to_string(), RunningHandle { cancel });
        self.running_by_task
            .lock()
            .await
            .entry(task_id.to_string())
            .or_default()
            .push(execution_id.to_string());
    }

    async fn unregister_running(&self, execution_id: &str, task_id: &str) {
        self.running_by_execution.lock().await.remove(execution_id);
        if let Some(list) = self.running_by_task.lock().await.get_mut(task_id) {
            list.retain(|id| id != execution_id);
        }
    }

    /// Signals cancellation to a live execution; returns whether one was
    /// found. Actual process teardown happens inside the in-flight
    /// `run_agent` loop once it observes the flag on its next line read.
    pub async fn cancel(&self, execution_id: &str) -> bool {
        let handles = self.running_by_execution.lock().await;
        if let Some(handle) = handles.get(execution_id) {
            handle.cancel.cancel();
            info!(execution_id, "cancellation requested");
            true
        } else {
            false
        }
    }

    pub async fn cancel_by_task(&self, task_id: &str) -> usize {
        let execution_ids = self
            .running_by_task
            .lock()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default();
        let mut cancelled = 0;
        for id in execution_ids {
            if self.cancel(&id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn running_execution_count(&self) -> usize {
        self.running_by_execution.lock().await.len()
    }

    /// Ids of every execution currently in flight.
    pub async fn running_execution_ids(&self) -> Vec<String> {
        self.running_by_execution.lock().await.keys().cloned().collect()
    }

    /// Cancels every currently-running execution, regardless of task.
    /// Used by shutdown once the grace period has elapsed.
    pub async fn cancel_all(&self) -> usize {
        let execution_ids: Vec<String> = self.running_by_execution.lock().await.keys().cloned().collect();
        let mut cancelled = 0;
        for id in execution_ids {
            if self.cancel(&id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    pub async fn pool_stats(&self) -> crate::pool::PoolStats {
        self.pool.stats().await
    }
}

enum RunOutcome {
    Completed {
        result: ExecutionResult,
        output: Option<String>,
    },
    Killed,
    NonZeroExit(i32),
}
