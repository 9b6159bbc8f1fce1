use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::error::{error_chain, CorralError, Result};
use crate::protocol::{Connection, RegistrationGrant, WorkerMessage};
use crate::scheduler::WorkerRegistry;

/// Accepts workers on the bootstrap port and hands each one off to a
/// private port of its own.
pub struct RegistrationService {
    listener: TcpListener,
    registry: Arc<WorkerRegistry>,
    bind_addr: IpAddr,
    read_timeout: Duration,
}

impl RegistrationService {
    pub fn new(
        listener: TcpListener,
        registry: Arc<WorkerRegistry>,
        bind_addr: IpAddr,
        read_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            registry,
            bind_addr,
            read_timeout,
        }
    }

    /// Serve registrations until `shutdown` fires. Every handshake runs on
    /// its own task; a failed handshake only abandons that worker.
    pub async fn run(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!(%addr, "Registration service listening");
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Registration service stopping");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = self.registry.clone();
                        let bind_addr = self.bind_addr;
                        let read_timeout = self.read_timeout;
                        tokio::spawn(async move {
                            match handshake(stream, registry, bind_addr, read_timeout).await {
                                Ok(name) => {
                                    tracing::info!(worker = %name, %peer, "Worker registered");
                                }
                                Err(e) => {
                                    tracing::error!(
                                        %peer,
                                        error = %error_chain(&e),
                                        "Worker registration failed"
                                    );
                                }
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %error_chain(&e), "Failed to accept registration");
                    }
                }
            }
        }
    }
}

/// Run one handshake to completion and return the new worker's name.
///
/// The private listener is bound before the grant goes out, so the worker
/// can connect as soon as it reads its port.
pub async fn handshake(
    stream: TcpStream,
    registry: Arc<WorkerRegistry>,
    bind_addr: IpAddr,
    read_timeout: Duration,
) -> Result<String> {
    let bootstrap = Connection::from_stream(stream, read_timeout)?;
    let request = bootstrap.receive_text().await?;
    tracing::debug!(peer = %bootstrap.peer_addr(), request = %request, "Registration requested");

    let registration = registry.register_new_worker().await?;
    let name = registration.name().to_string();
    let private_addr = SocketAddr::new(bind_addr, registration.assigned_port());

    let private = TcpListener::bind(private_addr).await.map_err(|e| {
        CorralError::Handshake(format!("{} could not bind {}: {}", name, private_addr, e))
    })?;

    let grant = RegistrationGrant {
        port: registration.assigned_port(),
        name: name.clone(),
    };
    bootstrap.send_text(&grant.to_string()).await?;
    drop(bootstrap);

    let (stream, _) = tokio::time::timeout(read_timeout, private.accept())
        .await
        .map_err(|_| CorralError::Timeout(read_timeout))??;
    drop(private);

    let connection = Connection::from_stream(stream, read_timeout)?;
    match WorkerMessage::parse(&connection.receive_text().await?)? {
        WorkerMessage::Transfer => {}
        other => {
            return Err(CorralError::Handshake(format!(
                "{} sent {} instead of TRANSFER",
                name, other
            )));
        }
    }

    registry.attach_connection(&name, Arc::new(connection)).await?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const TIMEOUT: Duration = Duration::from_secs(2);
    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn start_service(base_port: u16) -> (SocketAddr, Arc<WorkerRegistry>, CancellationToken) {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = Arc::new(WorkerRegistry::new(base_port));
        let shutdown = CancellationToken::new();
        let service = RegistrationService::new(listener, registry.clone(), LOCALHOST, TIMEOUT);
        tokio::spawn(service.run(shutdown.clone()));
        (addr, registry, shutdown)
    }

    #[tokio::test]
    async fn handshake_hands_off_to_private_port() {
        let (addr, registry, shutdown) = start_service(24101).await;

        let bootstrap = Connection::connect(addr, TIMEOUT).await.unwrap();
        bootstrap.send_text("REGISTER").await.unwrap();
        let grant = RegistrationGrant::parse(&bootstrap.receive_text().await.unwrap()).unwrap();
        assert_eq!(grant.port, 24101);
        assert_eq!(grant.name, "worker-1");

        let private = Connection::connect(SocketAddr::new(LOCALHOST, grant.port), TIMEOUT)
            .await
            .unwrap();
        private.send_text("TRANSFER").await.unwrap();

        let mut connected = false;
        for _ in 0..100 {
            if registry.get("worker-1").await.is_some_and(|r| r.is_connected()) {
                connected = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(connected);
        shutdown.cancel();
    }

    #[tokio::test]
    async fn wrong_transfer_frame_abandons_only_that_worker() {
        let (addr, registry, shutdown) = start_service(24111).await;

        let bootstrap = Connection::connect(addr, TIMEOUT).await.unwrap();
        bootstrap.send_text("REGISTER").await.unwrap();
        let grant = RegistrationGrant::parse(&bootstrap.receive_text().await.unwrap()).unwrap();
        let private = Connection::connect(SocketAddr::new(LOCALHOST, grant.port), TIMEOUT)
            .await
            .unwrap();
        private.send_text("HEARTBEAT").await.unwrap();

        // The service keeps accepting after the failed handshake.
        let second = Connection::connect(addr, TIMEOUT).await.unwrap();
        second.send_text("REGISTER").await.unwrap();
        let grant = RegistrationGrant::parse(&second.receive_text().await.unwrap()).unwrap();
        assert_eq!(grant.name, "worker-2");
        assert_eq!(grant.port, 24112);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!registry.get("worker-1").await.unwrap().is_connected());
        shutdown.cancel();
    }
}
