use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of one worker registration, as reported over the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDetail {
    pub name: String,
    pub assigned_port: u16,
    pub last_heartbeat: DateTime<Utc>,
}

/// Snapshot of a dispatched job, as reported over the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetail {
    pub job_id: u64,
    pub is_complete: bool,
}
