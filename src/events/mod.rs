//! In-process typed publish/subscribe, grounded on the teacher's
//! broadcast-channel event bus. A global channel carries every event;
//! per-execution log subchannels are handed out on demand so a listener
//! streaming one execution's output doesn't have to filter the firehose.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

use crate::domain::{ExecutionResult, ExecutionStatus, RoutingStatus, TaskStatus};

const GLOBAL_CHANNEL_CAPACITY: usize = 1000;
const EXECUTION_LOG_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "task:created")]
    TaskCreated { id: String, workspace_id: String },
    #[serde(rename = "task:updated")]
    TaskUpdated {
        id: String,
        workspace_id: String,
        status: TaskStatus,
    },
    #[serde(rename = "task:deleted")]
    TaskDeleted { id: String, workspace_id: String },
    #[serde(rename = "task:comment:added")]
    TaskCommentAdded {
        task_id: String,
        comment_id: String,
        author: String,
        author_type: String,
    },
    #[serde(rename = "execution:created")]
    ExecutionCreated {
        id: String,
        task_id: String,
        agent_id: String,
        agent_name: String,
        status: ExecutionStatus,
    },
    #[serde(rename = "execution:updated")]
    ExecutionUpdated {
        id: String,
        task_id: String,
        status: ExecutionStatus,
        result: Option<ExecutionResult>,
    },
    #[serde(rename = "execution:log")]
    ExecutionLog {
        execution_id: String,
        content: String,
        timestamp: i64,
    },
    #[serde(rename = "routing:updated")]
    RoutingUpdated {
        task_id: String,
        status: RoutingStatus,
        current_agent_index: i64,
        iteration: i64,
    },
}

/// A published event, stamped with the server's receive time.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: Event,
    pub timestamp: i64,
}

pub struct EventBus {
    global: broadcast::Sender<Envelope>,
    execution_logs: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        let (global, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);
        Arc::new(Self {
            global,
            execution_logs: Mutex::new(HashMap::new()),
        })
    }

    /// Best-effort, non-blocking publish. A channel with no subscribers
    /// (or one whose subscribers have all dropped) is not an error.
    pub async fn emit(&self, event: Event) {
        let envelope = Envelope {
            event: event.clone(),
            timestamp: crate::domain::ids::now_millis(),
        };
        let _ = self.global.send(envelope.clone());

        if let Event::ExecutionLog { execution_id, .. } = &event {
            let logs = self.execution_logs.lock().await;
            if let Some(sender) = logs.get(execution_id) {
                if sender.send(envelope).is_err() {
                    warn!(execution_id, "execution log event had no subscribers");
                }
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.global.subscribe()
    }

    /// Subscribes to one execution's log subchannel, creating it lazily.
    pub async fn subscribe_to_execution_logs(&self, execution_id: &str) -> broadcast::Receiver<Envelope> {
        let mut logs = self.execution_logs.lock().await;
        let sender = logs
            .entry(execution_id.to_string())
            .or_insert_with(|| broadcast::channel(EXECUTION_LOG_CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Drops the per-execution subchannel once an execution has reached a
    /// terminal state and no further log frames will be emitted for it.
    pub async fn close_execution_logs(&self, execution_id: &str) {
        self.execution_logs.lock().await.remove(execution_id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        let (global, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);
        Self {
            global,
            execution_logs: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn global_subscriber_sees_every_event_type() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(Event::TaskCreated {
            id: "t1".into(),
            workspace_id: "w1".into(),
        })
        .await;
        bus.emit(Event::ExecutionLog {
            execution_id: "e1".into(),
            content: "hi".into(),
            timestamp: 1,
        })
        .await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(first.event, Event::TaskCreated { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.event, Event::ExecutionLog { .. }));
    }

    #[tokio::test]
    async fn execution_log_subchannel_is_scoped() {
        let bus = EventBus::new();
        let mut rx_a = bus.subscribe_to_execution_logs("exec-a").await;
        let _rx_b = bus.subscribe_to_execution_logs("exec-b").await;

        bus.emit(Event::ExecutionLog {
            execution_id: "exec-b".into(),
            content: "for b".into(),
            timestamp: 1,
        })
        .await;
        bus.emit(Event::ExecutionLog {
            execution_id: "exec-a".into(),
            content: "for a".into(),
            timestamp: 2,
        })
        .await;

        let received = rx_a.recv().await.unwrap();
        match received.event {
            Event::ExecutionLog { execution_id, content, .. } => {
                assert_eq!(execution_id, "exec-a");
                assert_eq!(content, "for a");
            }
            _ => panic!("unexpected event"),
        }
    }

    #[tokio::test]
    async fn emit_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.emit(Event::TaskDeleted {
            id: "t1".into(),
            workspace_id: "w1".into(),
        })
        .await;
    }
}
