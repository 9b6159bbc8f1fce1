use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Result;
use crate::protocol::{ApiRequest, Connection, JobDetail, WorkerDetail};
use crate::scheduler::Job;

/// Client for the manager's API port.
///
/// Replies are produced by the manager's control loop, so a request may take
/// up to one poll interval to be answered.
#[derive(Debug)]
pub struct ManagerClient {
    connection: Connection,
}

impl ManagerClient {
    pub async fn connect(addr: SocketAddr, read_timeout: Duration) -> Result<Self> {
        let connection = Connection::connect(addr, read_timeout).await?;
        Ok(Self { connection })
    }

    /// Details of one worker, `None` if the manager does not know it.
    pub async fn worker_detail(&self, name: &str) -> Result<Option<WorkerDetail>> {
        self.request(&ApiRequest::ListWorker(name.to_string())).await?;
        self.connection.receive_object().await
    }

    /// Every registration, in registration order.
    pub async fn all_worker_details(&self) -> Result<Vec<WorkerDetail>> {
        self.request(&ApiRequest::ListAllWorkers).await?;
        self.connection.receive_object().await
    }

    /// Status of a dispatched job, `None` for unknown ids.
    pub async fn job_status(&self, job_id: u64) -> Result<Option<JobDetail>> {
        self.request(&ApiRequest::JobStatus(job_id)).await?;
        self.connection.receive_object().await
    }

    /// Dispatch `job` right away. `None` if it reached no worker.
    pub async fn execute_job(&self, job: &Job) -> Result<Option<JobDetail>> {
        self.send_job(&ApiRequest::Execute, job).await?;
        self.connection.receive_object().await
    }

    /// Queue `job` for the manager's next drain pass. No reply.
    pub async fn queue_job(&self, job: &Job) -> Result<()> {
        self.send_job(&ApiRequest::QueueJob, job).await
    }

    async fn request(&self, request: &ApiRequest) -> Result<()> {
        self.connection.send_text(&request.to_string()).await
    }

    async fn send_job(&self, request: &ApiRequest, job: &Job) -> Result<()> {
        let command = request.to_string();
        let body = crate::protocol::codec::encode(job)?;
        self.connection
            .send_frames(&[command.as_bytes(), body.as_slice()])
            .await
    }
}
