//! The thin CLI entry point: argument parsing and command dispatch. Each
//! subcommand builds its own [`AppContext`] — this binary is a one-shot
//! client against the durable store, except `serve`, which stays
//! resident until shutdown.

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::app::AppContext;
use crate::domain::TaskRouting;
use crate::error::Result;
use crate::recovery::Recovery;

#[derive(Parser)]
#[command(name = "prodigy-router", version, about = "Autonomous task-routing server")]
pub struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start (or restart) routing for a task and wait for it to reach a
    /// terminal state.
    Trigger { task_id: String },
    /// Re-enter the driver loop for an existing, non-terminal routing.
    Resume { routing_id: String },
    /// Cancel all running executions for a task's routing.
    Cancel { task_id: String },
    /// Print a task's current routing status.
    Status { task_id: String },
    /// Run the startup recovery sweep on demand.
    Recover,
    /// Boot persistence and recovery, then block until a shutdown signal.
    Serve,
}

pub async fn execute_command(command: Commands, _verbose: u8) -> Result<()> {
    match command {
        Commands::Trigger { task_id } => {
            let ctx = AppContext::build(None).await?;
            let routing = ctx.routing.trigger(&task_id).await?;
            print_routing(&routing);
            let routing = wait_for_terminal(&ctx, &task_id).await?;
            print_routing(&routing);
        }
        Commands::Resume { routing_id } => {
            let ctx = AppContext::build(None).await?;
            let routing = ctx.routing.resume(&routing_id).await?;
            print_routing(&routing);
        }
        Commands::Cancel { task_id } => {
            let ctx = AppContext::build(None).await?;
            match ctx.routing.cancel(&task_id).await? {
                Some(routing) => print_routing(&routing),
                None => println!("no routing exists for task {task_id}"),
            }
        }
        Commands::Status { task_id } => {
            let ctx = AppContext::build(None).await?;
            match ctx.routing.get_routing(&task_id).await? {
                Some(routing) => print_routing(&routing),
                None => println!("no routing exists for task {task_id}"),
            }
        }
        Commands::Recover => {
            let ctx = AppContext::build(None).await?;
            let recovery = Recovery::new(ctx.store.clone(), ctx.routing.clone());
            let resumed = recovery.run().await?;
            println!("resumed {resumed} routing(s)");
        }
        Commands::Serve => {
            let ctx = AppContext::build(None).await?;
            let recovery = Recovery::new(ctx.store.clone(), ctx.routing.clone());
            let resumed = recovery.run().await?;
            info!(resumed, "recovery complete; serving");

            tokio::signal::ctrl_c().await?;
            info!("shutdown signal received");
            ctx.lifecycle.shutdown().await;
            println!("shutdown complete");
        }
    }
    Ok(())
}

fn print_routing(routing: &TaskRouting) {
    println!(
        "task={} status={} agent_index={} iteration={} retry_count={}{}",
        routing.task_id,
        routing.status.as_str(),
        routing.current_agent_index,
        routing.iteration,
        routing.retry_count,
        routing
            .error_message
            .as_ref()
            .map(|e| format!(" error={e}"))
            .unwrap_or_default(),
    );
}

/// Polls a task's routing until it reaches a terminal state, for the
/// `trigger` command's synchronous-feeling UX.
async fn wait_for_terminal(ctx: &AppContext, task_id: &str) -> Result<TaskRouting> {
    loop {
        if let Some(routing) = ctx.routing.get_routing(task_id).await? {
            if routing.status.is_terminal() {
                return Ok(routing);
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
