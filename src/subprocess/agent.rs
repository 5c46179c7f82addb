//! Spawns and supervises one agent CLI child process.
//!
//! This is the single seam between the [`crate::executor`] and the outside
//! world: production code drives a real child via [`TokioAgentSpawner`],
//! tests drive a scripted one via [`MockAgentSpawner`]. Both speak the same
//! [`AgentSpawner`]/[`SpawnedAgent`] contract so the executor never branches
//! on which one it holds.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::error::ProcessError;

/// A fully-specified invocation of an agent CLI.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub stdin: Option<String>,
}

/// Terminal state of a spawned process, as reported by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failure(i32),
    /// The process was killed by us (soft or hard) rather than exiting on
    /// its own.
    Killed,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }
}

/// A running (or just-finished) agent child process.
///
/// `recv_line` drains stdout one line at a time; the channel closes when
/// the child's stdout pipe closes. Callers should keep pulling lines
/// until `recv_line` returns `None`, then `wait` for the exit outcome.
#[async_trait]
pub trait SpawnedAgent: Send {
    async fn recv_line(&mut self) -> Option<String>;
    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError>;
    /// Best-effort graceful termination (`SIGTERM` on unix).
    async fn terminate(&mut self);
    /// Unconditional termination (`SIGKILL` on unix).
    async fn kill(&mut self);
}

#[async_trait]
pub trait AgentSpawner: Send + Sync {
    async fn spawn(&self, command: ProcessCommand) -> Result<Box<dyn SpawnedAgent>, ProcessError>;
}

/// Production spawner: a real child process via tokio.
pub struct TokioAgentSpawner;

#[async_trait]
impl AgentSpawner for TokioAgentSpawner {
    async fn spawn(&self, command: ProcessCommand) -> Result<Box<dyn SpawnedAgent>, ProcessError> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args);
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProcessError::CommandNotFound(command.program.clone())
            } else {
                ProcessError::Io(e)
            }
        })?;

        if let Some(stdin_data) = command.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(stdin_data.as_bytes()).await.ok();
                stdin.shutdown().await.ok();
            }
        }

        let pid = child.id();
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let (tx, rx) = mpsc::channel::<String>(256);
        let out_tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if out_tx.send(line).await.is_err() {
                    break;
                }
            }
        });
        // Stderr is diagnostic only (spec 4.3.5): log it, don't surface it
        // on the same channel as stdout.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::warn!(agent_stderr = %line, "agent CLI stderr");
            }
        });

        Ok(Box::new(TokioSpawnedAgent {
            child,
            pid,
            rx,
            killed: false,
        }))
    }
}

struct TokioSpawnedAgent {
    child: tokio::process::Child,
    pid: Option<u32>,
    rx: mpsc::Receiver<String>,
    killed: bool,
}

#[async_trait]
impl SpawnedAgent for TokioSpawnedAgent {
    async fn recv_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError> {
        let status = self.child.wait().await.map_err(ProcessError::Io)?;
        if self.killed {
            return Ok(ExitOutcome::Killed);
        }
        Ok(if status.success() {
            ExitOutcome::Success
        } else {
            ExitOutcome::Failure(status.code().unwrap_or(-1))
        })
    }

    async fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            // No signal-sending crate in the dependency set; shell out to
            // `kill` for a portable SIGTERM rather than jumping straight
            // to tokio's SIGKILL-only `Child::kill`.
            let _ = tokio::process::Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
        }
        #[cfg(not(unix))]
        {
            self.killed = true;
            let _ = self.child.start_kill();
        }
    }

    async fn kill(&mut self) {
        self.killed = true;
        let _ = self.child.start_kill();
    }
}

/// A scripted response for [`MockAgentSpawner`]: a sequence of stdout
/// lines, an exit outcome, and an optional delay before exiting (used to
/// simulate hangs for timeout tests).
#[derive(Debug, Clone, Default)]
pub struct MockAgentScript {
    pub lines: Vec<String>,
    pub outcome: ExitOutcome,
    pub hangs: bool,
    /// If set, written as `task_output.json` into the working directory
    /// before the script's outcome is reported, so tests can drive the
    /// executor's result-classification path without a real agent CLI.
    pub task_output: Option<String>,
}

impl MockAgentScript {
    pub fn completes(lines: Vec<String>) -> Self {
        Self {
            lines,
            outcome: ExitOutcome::Success,
            hangs: false,
            task_output: None,
        }
    }

    pub fn fails(lines: Vec<String>, code: i32) -> Self {
        Self {
            lines,
            outcome: ExitOutcome::Failure(code),
            hangs: false,
            task_output: None,
        }
    }

    pub fn hangs_forever() -> Self {
        Self {
            lines: Vec::new(),
            outcome: ExitOutcome::Killed,
            hangs: true,
            task_output: None,
        }
    }

    /// A successful run that writes `task_output.json` with the given
    /// `result` (`"skip"`, `"comment"`, or `"error"`) and optional content.
    pub fn completes_with_output(lines: Vec<String>, result: &str, content: Option<&str>) -> Self {
        let body = serde_json::json!({ "result": result, "content": content });
        Self {
            lines,
            outcome: ExitOutcome::Success,
            hangs: false,
            task_output: Some(body.to_string()),
        }
    }
}

impl Default for ExitOutcome {
    fn default() -> Self {
        ExitOutcome::Success
    }
}

/// Test double: hands back pre-scripted [`MockAgentScript`]s in call
/// order per `program`, falling back to the last registered script for
/// that program once exhausted.
#[derive(Clone, Default)]
pub struct MockAgentSpawner {
    scripts: Arc<Mutex<HashMap<String, Vec<MockAgentScript>>>>,
    calls: Arc<Mutex<Vec<ProcessCommand>>>,
}

impl MockAgentSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, program: &str, script: MockAgentScript) {
        self.scripts
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push(script);
    }

    pub fn calls(&self) -> Vec<ProcessCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentSpawner for MockAgentSpawner {
    async fn spawn(&self, command: ProcessCommand) -> Result<Box<dyn SpawnedAgent>, ProcessError> {
        self.calls.lock().unwrap().push(command.clone());

        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.entry(command.program.clone()).or_default();
            if queue.len() > 1 {
                queue.remove(0)
            } else if let Some(last) = queue.first() {
                last.clone()
            } else {
                return Err(ProcessError::MockExpectationNotMet(format!(
                    "no script registered for {}",
                    command.program
                )));
            }
        };

        if let (Some(body), Some(dir)) = (&script.task_output, &command.working_dir) {
            let _ = std::fs::write(dir.join("task_output.json"), body);
        }

        let (tx, rx) = mpsc::channel::<String>(256);
        for line in script.lines.clone() {
            let _ = tx.send(line).await;
        }
        drop(tx);

        Ok(Box::new(MockSpawnedAgent {
            rx,
            outcome: script.outcome,
            hangs: script.hangs,
            killed: false,
        }))
    }
}

struct MockSpawnedAgent {
    rx: mpsc::Receiver<String>,
    outcome: ExitOutcome,
    hangs: bool,
    killed: bool,
}

#[async_trait]
impl SpawnedAgent for MockSpawnedAgent {
    async fn recv_line(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    async fn wait(&mut self) -> Result<ExitOutcome, ProcessError> {
        if self.hangs && !self.killed {
            // Simulate a wedged CLI: never resolves on its own. The
            // executor's timeout path is what unblocks this via kill().
            std::future::pending::<()>().await;
        }
        Ok(if self.killed {
            ExitOutcome::Killed
        } else {
            self.outcome
        })
    }

    async fn terminate(&mut self) {
        self.killed = true;
    }

    async fn kill(&mut self) {
        self.killed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_replays_scripted_lines_then_outcome() {
        let spawner = MockAgentSpawner::new();
        spawner.push_script(
            "claude",
            MockAgentScript::completes(vec!["line one".into(), "line two".into()]),
        );

        let mut proc = spawner
            .spawn(ProcessCommand {
                program: "claude".into(),
                args: vec![],
                env: HashMap::new(),
                working_dir: None,
                stdin: None,
            })
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = proc.recv_line().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["line one", "line two"]);
        assert_eq!(proc.wait().await.unwrap(), ExitOutcome::Success);
    }

    #[tokio::test]
    async fn mock_reuses_last_script_once_queue_drains() {
        let spawner = MockAgentSpawner::new();
        spawner.push_script("claude", MockAgentScript::completes(vec!["only".into()]));

        for _ in 0..3 {
            let mut proc = spawner
                .spawn(ProcessCommand {
                    program: "claude".into(),
                    args: vec![],
                    env: HashMap::new(),
                    working_dir: None,
                    stdin: None,
                })
                .await
                .unwrap();
            while proc.recv_line().await.is_some() {}
            assert_eq!(proc.wait().await.unwrap(), ExitOutcome::Success);
        }
        assert_eq!(spawner.calls().len(), 3);
    }

    #[tokio::test]
    async fn hanging_mock_only_resolves_after_kill() {
        let spawner = MockAgentSpawner::new();
        spawner.push_script("claude", MockAgentScript::hangs_forever());

        let mut proc = spawner
            .spawn(ProcessCommand {
                program: "claude".into(),
                args: vec![],
                env: HashMap::new(),
                working_dir: None,
                stdin: None,
            })
            .await
            .unwrap();

        proc.kill().await;
        assert_eq!(proc.wait().await.unwrap(), ExitOutcome::Killed);
    }
}
