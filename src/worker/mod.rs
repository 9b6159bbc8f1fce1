//! Worker side of the cluster.
//!
//! A worker registers on the manager's bootstrap port, moves to the private
//! port it was granted and then loops: heartbeat, then run every task the
//! manager sent since the last iteration.
//!
//! # Components
//!
//! - [`ManagerLink`]: the private channel, with a backlog for commands read
//!   out of order
//! - [`JobExecutor`]: binds behavior to each job kind
//! - [`VariableStore`]: distributed variables, cached locally
//! - [`spawn_local_workers`]: in-process workers for standalone mode

pub mod executor;
pub mod link;
pub mod pool;
pub mod variables;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::error::{CorralError, Result};
use crate::protocol::{Connection, ManagerMessage, RegistrationGrant, WorkerMessage};
use crate::scheduler::Job;

pub use executor::{ExecutionResult, JobExecutor, TaskContext};
pub use link::{Inbound, ManagerLink};
pub use pool::spawn_local_workers;
pub use variables::VariableStore;

/// Request sent on the bootstrap port. The manager only acknowledges it.
const REGISTRATION_REQUEST: &str = "REGISTER";

/// A registered worker, ready to run.
pub struct Worker {
    name: String,
    link: Arc<ManagerLink>,
    variables: VariableStore,
    executor: JobExecutor,
    heartbeat_interval: Duration,
}

impl Worker {
    /// Register with the manager at `config.registration_addr()`.
    pub async fn register(config: &ClusterConfig) -> Result<Self> {
        let bootstrap_addr = config.registration_addr();
        let bootstrap = Connection::connect(bootstrap_addr, config.read_timeout).await?;
        bootstrap.send_text(REGISTRATION_REQUEST).await?;
        let grant = RegistrationGrant::parse(&bootstrap.receive_text().await?)?;
        drop(bootstrap);

        let private_addr = SocketAddr::new(bootstrap_addr.ip(), grant.port);
        let connection = Connection::connect(private_addr, config.read_timeout)
            .await
            .map_err(|e| {
                CorralError::Handshake(format!("{} could not reach {}: {}", grant.name, private_addr, e))
            })?;
        connection.send_text(&WorkerMessage::Transfer.to_string()).await?;
        tracing::info!(worker = %grant.name, port = grant.port, "Registered with manager");

        let link = Arc::new(ManagerLink::new(connection));
        Ok(Self {
            name: grant.name,
            variables: VariableStore::new(link.clone()),
            link,
            executor: JobExecutor::new(),
            heartbeat_interval: config.heartbeat_interval,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handle to this worker's distributed variables.
    pub fn variables(&self) -> VariableStore {
        self.variables.clone()
    }

    /// Heartbeat and execute tasks until `shutdown` fires or the manager
    /// connection fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.heartbeat_interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(worker = %self.name, "Worker stopping");
                    return Ok(());
                }
                _ = interval.tick() => {}
            }

            self.link.send(&WorkerMessage::Heartbeat).await?;

            loop {
                match self.link.next_message().await {
                    Ok(Some(inbound)) => self.handle(inbound).await?,
                    Ok(None) => break,
                    Err(e) if e.is_connection_terminal() => return Err(e),
                    Err(e) => {
                        tracing::warn!(worker = %self.name, error = %e, "Bad message from manager");
                    }
                }
            }
        }
    }

    async fn handle(&self, inbound: Inbound) -> Result<()> {
        match inbound.message {
            ManagerMessage::Execute { task_id, tag } => {
                let job = match Job::decode_payload(&tag, &inbound.payload) {
                    Ok(job) => job,
                    Err(e) => {
                        tracing::error!(worker = %self.name, task_id, error = %e, "Undecodable task");
                        return self.report(task_id, false).await;
                    }
                };
                let context = TaskContext::new(self.name.clone(), task_id);
                let result = self.executor.execute(&context, &job).await;
                if let Some(error) = &result.error {
                    tracing::warn!(worker = %self.name, task_id, error = %error, "Task failed");
                }
                self.report(task_id, result.succeeded).await
            }
            ManagerMessage::VarValue { name } => {
                tracing::warn!(worker = %self.name, variable = %name, "Unrequested variable value");
                Ok(())
            }
        }
    }

    async fn report(&self, task_id: u64, succeeded: bool) -> Result<()> {
        self.link
            .send(&WorkerMessage::TaskFinished { task_id, succeeded })
            .await
    }
}
