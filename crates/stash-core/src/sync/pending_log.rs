//! Durable log of local mutations awaiting acknowledgement.
//!
//! One task owns the log. Handles send commands over a channel and await the
//! reply, so enqueues from editing and removals from the drain are totally
//! ordered by submission.

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::models::{NewPendingOperation, PendingOperation};
use crate::services::LocalStore;

const COMMAND_BUFFER: usize = 64;

enum Command {
    Enqueue {
        operation: NewPendingOperation,
        reply: oneshot::Sender<Result<PendingOperation>>,
    },
    All {
        reply: oneshot::Sender<Result<Vec<PendingOperation>>>,
    },
    Remove {
        id: i64,
        reply: oneshot::Sender<Result<bool>>,
    },
    Update {
        operation: PendingOperation,
        reply: oneshot::Sender<Result<()>>,
    },
    Count {
        reply: oneshot::Sender<Result<u64>>,
    },
    Clear {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable handle to the pending operation log task.
#[derive(Clone)]
pub struct PendingOperationLog {
    commands: mpsc::Sender<Command>,
}

impl PendingOperationLog {
    /// Start the task owning the log. Must be called within a tokio runtime.
    ///
    /// The task stops once every handle is dropped.
    pub fn spawn(store: LocalStore) -> Self {
        let (commands, receiver) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run(store, receiver));
        Self { commands }
    }

    /// Durably append an operation.
    ///
    /// Returns only after the row is committed. A storage failure is reported
    /// as `Error::Storage` and nothing is recorded.
    pub async fn enqueue(&self, operation: NewPendingOperation) -> Result<PendingOperation> {
        self.request(|reply| Command::Enqueue { operation, reply })
            .await
    }

    /// Every unacknowledged operation, oldest first.
    pub async fn all(&self) -> Result<Vec<PendingOperation>> {
        self.request(|reply| Command::All { reply }).await
    }

    /// Remove an acknowledged or abandoned operation.
    pub async fn remove(&self, id: i64) -> Result<bool> {
        self.request(|reply| Command::Remove { id, reply }).await
    }

    /// Persist the retry counter and last error of an operation.
    pub async fn update(&self, operation: PendingOperation) -> Result<()> {
        self.request(|reply| Command::Update { operation, reply })
            .await
    }

    /// Number of operations awaiting acknowledgement.
    pub async fn count(&self) -> Result<u64> {
        self.request(|reply| Command::Count { reply }).await
    }

    /// Drop every operation.
    pub async fn clear(&self) -> Result<()> {
        self.request(|reply| Command::Clear { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| closed())?;
        response.await.map_err(|_| closed())?
    }
}

fn closed() -> Error {
    Error::Storage("pending operation log is closed".to_string())
}

async fn run(store: LocalStore, mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Enqueue { operation, reply } => {
                let outcome = store.append_pending(&operation).await.map_err(|error| {
                    tracing::error!(
                        "Failed to record {} {} {}: {}",
                        operation.kind,
                        operation.entity,
                        operation.local_id,
                        error
                    );
                    Error::Storage(error.to_string())
                });
                if let Ok(stored) = &outcome {
                    tracing::debug!(
                        "Queued {} {} {} as #{}",
                        stored.kind,
                        stored.entity,
                        stored.local_id,
                        stored.id
                    );
                }
                let _ = reply.send(outcome);
            }
            Command::All { reply } => {
                let _ = reply.send(store.list_pending().await);
            }
            Command::Remove { id, reply } => {
                let _ = reply.send(store.remove_pending(id).await);
            }
            Command::Update { operation, reply } => {
                let _ = reply.send(store.record_pending_failure(&operation).await);
            }
            Command::Count { reply } => {
                let _ = reply.send(store.count_pending().await);
            }
            Command::Clear { reply } => {
                let _ = reply.send(store.clear_pending().await);
            }
        }
    }
    tracing::debug!("Pending operation log stopped");
}
