use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{error_chain, Result};
use crate::protocol::{ApiRequest, Connection, JobDetail, WorkerDetail};
use crate::scheduler::{Job, JobDispatcher, WorkerRegistry};

/// Accept API clients and hand them to the control loop.
pub async fn accept_clients(
    listener: TcpListener,
    clients: mpsc::Sender<Connection>,
    read_timeout: Duration,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "API listening");
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!(error = %error_chain(&e), "Failed to accept API client");
                        continue;
                    }
                };
                match Connection::from_stream(stream, read_timeout) {
                    Ok(connection) => {
                        tracing::debug!(%peer, "API client connected");
                        if clients.send(connection).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(%peer, error = %e, "Dropping API client"),
                }
            }
        }
    }
}

/// Serve one request frame from an API client, reading the job frame that
/// follows `EXECUTE`/`QUEUEJOB` and writing the reply if the request has one.
pub async fn handle_request(
    client: &Connection,
    registry: &WorkerRegistry,
    dispatcher: &mut JobDispatcher,
) -> Result<()> {
    let raw = client.receive_text().await?;
    let request = ApiRequest::parse(&raw)?;
    tracing::debug!(peer = %client.peer_addr(), request = %request, "API request");

    match request {
        ApiRequest::ListWorker(name) => {
            let detail: Option<WorkerDetail> = registry.get(&name).await.map(|r| r.detail());
            client.send_object(&detail).await
        }
        ApiRequest::ListAllWorkers => {
            let details: Vec<WorkerDetail> = registry.get_all().await.iter().map(|r| r.detail()).collect();
            client.send_object(&details).await
        }
        ApiRequest::JobStatus(job_id) => client.send_object(&dispatcher.job_detail(job_id)).await,
        ApiRequest::Execute => {
            let detail: Option<JobDetail> = match client.receive_object::<Job>().await {
                Ok(job) => dispatcher.dispatch_job(job).await.detail(),
                Err(e) if !e.is_connection_terminal() => {
                    tracing::warn!(peer = %client.peer_addr(), error = %e, "Rejected job from API client");
                    None
                }
                Err(e) => return Err(e),
            };
            client.send_object(&detail).await
        }
        ApiRequest::QueueJob => {
            let job = client.receive_object::<Job>().await?;
            tracing::info!(job = job.tag(), strategy = %job.strategy(), "Job queued by API client");
            dispatcher.queue_job(job).await;
            Ok(())
        }
    }
}
