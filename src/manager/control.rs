use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{CorralError, Result};
use crate::manager::api;
use crate::manager::datastore::DataStore;
use crate::protocol::{Connection, WorkerMessage};
use crate::scheduler::{JobDispatcher, WorkerRegistry};

/// State of the manager's polling cycle.
///
/// Every phase takes its own registry lock windows; nothing is held across a
/// whole iteration.
pub struct ControlLoop {
    registry: Arc<WorkerRegistry>,
    dead_threshold: Duration,
    dispatcher: JobDispatcher,
    datastore: DataStore,
    pending_clients: mpsc::Receiver<Connection>,
    api_clients: Vec<Connection>,
    // Workers whose channel failed; logged once, then left alone.
    lost_workers: HashSet<String>,
}

impl ControlLoop {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        dead_threshold: Duration,
        pending_clients: mpsc::Receiver<Connection>,
    ) -> Self {
        Self {
            dispatcher: JobDispatcher::new(registry.clone(), dead_threshold),
            registry,
            dead_threshold,
            datastore: DataStore::new(),
            pending_clients,
            api_clients: Vec::new(),
            lost_workers: HashSet::new(),
        }
    }

    /// One pass: worker messages, health check, queue drain, API clients.
    pub async fn run_iteration(&mut self) {
        self.check_worker_messages().await;
        self.check_worker_health().await;
        self.dispatcher.process_queue().await;
        self.serve_api_clients().await;
    }

    async fn check_worker_messages(&mut self) {
        let registrations = self.registry.get_all().await;
        for registration in registrations {
            let Some(connection) = registration.connection() else {
                continue;
            };
            let name = registration.name();
            if self.lost_workers.contains(name) {
                continue;
            }

            if let Err(e) = self.drain_worker(name, connection).await {
                if e.is_connection_terminal() {
                    tracing::error!(worker = %name, error = %e, "Lost connection to worker");
                    self.lost_workers.insert(name.to_string());
                } else {
                    tracing::warn!(worker = %name, error = %e, "Bad message from worker");
                }
            }
        }
    }

    async fn drain_worker(&mut self, name: &str, connection: &Connection) -> Result<()> {
        while connection.message_is_available().await? {
            let raw = connection.receive_text().await?;
            match WorkerMessage::parse(&raw)? {
                WorkerMessage::Heartbeat => {
                    tracing::trace!(worker = %name, "Heartbeat");
                    self.registry.record_heartbeat(name).await?;
                }
                WorkerMessage::Transfer => {
                    tracing::debug!(worker = %name, "Ignoring repeated TRANSFER");
                }
                WorkerMessage::Var(command) => {
                    self.datastore.handle(name, command, connection).await?;
                }
                WorkerMessage::TaskFinished { task_id, succeeded } => {
                    self.dispatcher.mark_task_finished(task_id, name, succeeded)?;
                    if succeeded {
                        tracing::info!(worker = %name, task_id, "Task complete");
                    } else {
                        tracing::warn!(worker = %name, task_id, "Task failed");
                    }
                }
            }
        }
        Ok(())
    }

    async fn check_worker_health(&self) {
        for (name, age) in self.registry.dead_workers(self.dead_threshold).await {
            tracing::warn!(
                worker = %name,
                last_heartbeat_secs = age.as_secs(),
                "Worker missed its heartbeat deadline"
            );
        }
    }

    async fn serve_api_clients(&mut self) {
        while let Ok(client) = self.pending_clients.try_recv() {
            self.api_clients.push(client);
        }

        let mut kept = Vec::with_capacity(self.api_clients.len());
        for client in std::mem::take(&mut self.api_clients) {
            match self.serve_api_client(&client).await {
                Ok(()) => kept.push(client),
                Err(CorralError::ConnectionClosed) => {
                    tracing::debug!(peer = %client.peer_addr(), "API client disconnected");
                }
                Err(e) if e.is_connection_terminal() => {
                    tracing::warn!(peer = %client.peer_addr(), error = %e, "Dropping API client");
                }
                Err(e) => {
                    tracing::warn!(peer = %client.peer_addr(), error = %e, "Bad API request");
                    kept.push(client);
                }
            }
        }
        self.api_clients = kept;
    }

    async fn serve_api_client(&mut self, client: &Connection) -> Result<()> {
        while client.message_is_available().await? {
            api::handle_request(client, &self.registry, &mut self.dispatcher).await?;
        }
        Ok(())
    }
}
