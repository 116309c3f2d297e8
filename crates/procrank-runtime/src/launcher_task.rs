//! Launcher execution context: a single tokio task owns the
//! [`LauncherContext`] and applies requests strictly in arrival order.
//!
//! Other tasks only ever talk to it through a [`LauncherHandle`].

use anyhow::Context;
use procrank_core::launcher::{LauncherCommand, LauncherContext, LauncherSnapshot};
use procrank_core::{InMemoryBindings, LauncherConfig};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 64;

pub enum LauncherRequest {
    /// Advance to `at_ms`, run the command, reply with the resulting state.
    Apply {
        at_ms: u64,
        command: LauncherCommand,
        reply: oneshot::Sender<LauncherSnapshot>,
    },
    /// Reply with the final state and stop.
    Shutdown {
        reply: oneshot::Sender<LauncherSnapshot>,
    },
}

#[derive(Clone)]
pub struct LauncherHandle {
    tx: mpsc::Sender<LauncherRequest>,
}

impl LauncherHandle {
    pub async fn apply(
        &self,
        at_ms: u64,
        command: LauncherCommand,
    ) -> anyhow::Result<LauncherSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LauncherRequest::Apply {
                at_ms,
                command,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("launcher task has stopped"))?;
        rx.await.context("launcher task dropped the request")
    }

    pub async fn shutdown(self) -> anyhow::Result<LauncherSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LauncherRequest::Shutdown { reply })
            .await
            .map_err(|_| anyhow::anyhow!("launcher task has stopped"))?;
        rx.await.context("launcher task dropped the shutdown request")
    }
}

/// Build the launcher context and start the task that owns it.
pub fn spawn(config: LauncherConfig, start_ms: u64) -> (LauncherHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let context = LauncherContext::new(config, InMemoryBindings::new(), start_ms);
    let task = tokio::spawn(run(context, rx));
    (LauncherHandle { tx }, task)
}

async fn run(
    mut context: LauncherContext<InMemoryBindings>,
    mut rx: mpsc::Receiver<LauncherRequest>,
) {
    tracing::info!("launcher task started");
    while let Some(request) = rx.recv().await {
        match request {
            LauncherRequest::Apply {
                at_ms,
                command,
                reply,
            } => {
                if at_ms < context.now_ms() {
                    tracing::warn!(
                        at_ms,
                        now_ms = context.now_ms(),
                        "request is in the past; applying now"
                    );
                }
                context.advance_to(at_ms);
                tracing::debug!(at_ms, ?command, "applying command");
                context.apply(command);
                // The requester may have gone away; the state change stands.
                let _ = reply.send(context.snapshot());
            }
            LauncherRequest::Shutdown { reply } => {
                let _ = reply.send(context.snapshot());
                break;
            }
        }
    }
    tracing::info!("launcher task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use procrank_core::{ConnectionId, PrioritySignals};

    fn config() -> LauncherConfig {
        let mut config = LauncherConfig::default();
        config.timings.metrics_interval_ms = 0;
        config
    }

    #[tokio::test]
    async fn applies_commands_in_order() {
        let (handle, task) = spawn(config(), 0);
        handle
            .apply(
                0,
                LauncherCommand::ConnectionEstablished {
                    id: ConnectionId(1),
                    is_spare_renderer: false,
                },
            )
            .await
            .unwrap();
        handle
            .apply(
                5,
                LauncherCommand::ConnectionEstablished {
                    id: ConnectionId(2),
                    is_spare_renderer: false,
                },
            )
            .await
            .unwrap();
        let snap = handle
            .apply(
                10,
                LauncherCommand::SetPriority {
                    id: ConnectionId(1),
                    signals: PrioritySignals {
                        visible: true,
                        ..Default::default()
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(snap.at_ms, 10);
        assert_eq!(snap.ranking[0].id, ConnectionId(1));
        assert_eq!(snap.waived, Some(ConnectionId(2)));

        let last = handle.shutdown().await.unwrap();
        assert_eq!(last.ranking.len(), 2);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn delayed_tasks_run_when_time_advances() {
        let (handle, task) = spawn(config(), 0);
        handle
            .apply(
                0,
                LauncherCommand::ConnectionEstablished {
                    id: ConnectionId(1),
                    is_spare_renderer: false,
                },
            )
            .await
            .unwrap();
        let snap = handle
            .apply(0, LauncherCommand::AppForeground { foreground: false })
            .await
            .unwrap();
        assert_eq!(snap.tracked, vec![ConnectionId(1)]);
        let snap = handle.apply(10_000, LauncherCommand::Tick).await.unwrap();
        assert!(snap.tracked.is_empty());
        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn panicking_command_surfaces_as_error() {
        let (handle, task) = spawn(config(), 0);
        let err = handle
            .apply(
                0,
                LauncherCommand::ConnectionLost {
                    id: ConnectionId(9),
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dropped"));
        assert!(task.await.unwrap_err().is_panic());
    }
}
