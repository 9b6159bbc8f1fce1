use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ClusterConfig;
use crate::error::error_chain;
use crate::worker::Worker;

/// Start `config.worker_count` workers in this process, each registering with
/// the manager at `config.registration_addr()`.
///
/// Registrations run one after another so names follow start order. A worker
/// that fails to register or loses its manager is logged and not restarted.
pub fn spawn_local_workers(config: &ClusterConfig, shutdown: CancellationToken) -> JoinHandle<()> {
    let config = config.clone();
    tokio::spawn(async move {
        let mut running = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            if shutdown.is_cancelled() {
                break;
            }
            let worker = match Worker::register(&config).await {
                Ok(worker) => worker,
                Err(e) => {
                    tracing::error!(index, error = %error_chain(&e), "Local worker failed to register");
                    continue;
                }
            };
            let shutdown = shutdown.clone();
            running.push(tokio::spawn(async move {
                let name = worker.name().to_string();
                if let Err(e) = worker.run(shutdown).await {
                    tracing::error!(worker = %name, error = %error_chain(&e), "Worker stopped");
                }
            }));
        }

        join_workers(running).await;
    })
}

/// Wait for every worker task; returns how many ended abnormally.
async fn join_workers(handles: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Local worker task failed");
            failed += 1;
        }
    }
    failed
}
