//! The coordinating process: registration service, API listener and the
//! control loop that ties the registry to the dispatcher.

pub mod api;
pub mod control;
pub mod datastore;
pub mod registration;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::error::{CorralError, Result};
use crate::scheduler::WorkerRegistry;

pub use control::ControlLoop;
pub use datastore::DataStore;
pub use registration::RegistrationService;

const API_BACKLOG: usize = 64;

/// A bound but not yet running manager.
pub struct Manager {
    config: ClusterConfig,
    registry: Arc<WorkerRegistry>,
    registration_listener: TcpListener,
    api_listener: TcpListener,
}

impl Manager {
    /// Validate `config` and bind the registration and API ports.
    pub async fn bind(config: ClusterConfig) -> Result<Self> {
        config.validate()?;

        let registration_listener = bind_listener(config.registration_addr(), "registration").await?;
        let api_listener = bind_listener(config.api_addr(), "API").await?;
        let registry = Arc::new(WorkerRegistry::new(config.private_port_base()));

        Ok(Self {
            config,
            registry,
            registration_listener,
            api_listener,
        })
    }

    /// Shared handle to the worker pool; stays valid after `run` starts.
    pub fn registry(&self) -> Arc<WorkerRegistry> {
        self.registry.clone()
    }

    pub fn registration_addr(&self) -> Result<SocketAddr> {
        Ok(self.registration_listener.local_addr()?)
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        Ok(self.api_listener.local_addr()?)
    }

    /// Run every manager service until `shutdown` is cancelled.
    ///
    /// Shutdown latency is bounded by the poll interval.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Manager {
            config,
            registry,
            registration_listener,
            api_listener,
        } = self;

        let registration = RegistrationService::new(
            registration_listener,
            registry.clone(),
            config.bind_addr,
            config.read_timeout,
        );
        let registration_task = tokio::spawn(registration.run(shutdown.clone()));

        let (client_tx, client_rx) = mpsc::channel(API_BACKLOG);
        let api_task = tokio::spawn(api::accept_clients(
            api_listener,
            client_tx,
            config.read_timeout,
            shutdown.clone(),
        ));

        tracing::info!(
            registration_port = config.registration_port,
            api_port = config.api_port,
            dead_threshold_secs = config.dead_threshold.as_secs_f64(),
            "Manager started"
        );

        let mut control = ControlLoop::new(registry, config.dead_threshold, client_rx);
        loop {
            control.run_iteration().await;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }

        let (registration_result, api_result) = tokio::join!(registration_task, api_task);
        for result in [registration_result, api_result] {
            if let Err(e) = result {
                tracing::error!(error = %e, "Manager service task failed");
            }
        }
        tracing::info!("Manager stopped");
        Ok(())
    }
}

async fn bind_listener(addr: SocketAddr, purpose: &str) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(%addr, error = %e, "Failed to bind {} listener", purpose);
        CorralError::Io(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let config = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 24200, 24200);
        assert!(matches!(
            Manager::bind(config).await,
            Err(CorralError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn bind_fails_when_a_port_is_taken() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 24209)).await.unwrap();
        let config = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 24210, 24209);
        assert!(matches!(Manager::bind(config).await, Err(CorralError::Io(_))));
        drop(taken);
    }

    #[tokio::test]
    async fn bind_rejects_api_port_among_worker_ports() {
        let config = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 24230, 24232);
        assert!(matches!(
            Manager::bind(config).await,
            Err(CorralError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn registry_hands_out_ports_above_registration_port() {
        let config = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 24220, 24219);
        let manager = Manager::bind(config).await.unwrap();
        assert_eq!(manager.registry().base_port(), 24221);
        assert_eq!(manager.registration_addr().unwrap().port(), 24220);
        assert_eq!(manager.api_addr().unwrap().port(), 24219);
    }
}
