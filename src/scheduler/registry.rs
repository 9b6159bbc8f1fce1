use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{CorralError, Result};
use crate::protocol::{Connection, WorkerDetail};

/// Manager-side record of one worker.
///
/// `name` and `assigned_port` never change. The connection is absent while the
/// worker is still registering and is set exactly once by the hand-off.
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    name: String,
    assigned_port: u16,
    last_heartbeat: DateTime<Utc>,
    connection: Option<Arc<Connection>>,
}

impl WorkerRegistration {
    pub fn new(
        name: impl Into<String>,
        assigned_port: u16,
        last_heartbeat: DateTime<Utc>,
        connection: Option<Arc<Connection>>,
    ) -> Self {
        Self {
            name: name.into(),
            assigned_port,
            last_heartbeat,
            connection,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn assigned_port(&self) -> u16 {
        self.assigned_port
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.last_heartbeat
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.connection.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Time since the last heartbeat; zero if the heartbeat lies in the future.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_dead(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.heartbeat_age(now) > threshold
    }

    pub fn detail(&self) -> WorkerDetail {
        WorkerDetail {
            name: self.name.clone(),
            assigned_port: self.assigned_port,
            last_heartbeat: self.last_heartbeat,
        }
    }

    fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        if at > self.last_heartbeat {
            self.last_heartbeat = at;
        }
    }
}

/// Pool of every worker registration seen by this manager.
///
/// All access goes through one lock and every accessor returns an owned
/// snapshot, so no caller can hold on to the pool between lock windows.
/// Registrations are never removed; dead workers stay listed but are
/// filtered out of [`WorkerRegistry::get_non_dead`].
#[derive(Debug)]
pub struct WorkerRegistry {
    base_port: u16,
    pool: RwLock<Vec<WorkerRegistration>>,
}

impl WorkerRegistry {
    /// `base_port` is the private port given to the first registered worker.
    pub fn new(base_port: u16) -> Self {
        Self {
            base_port,
            pool: RwLock::new(Vec::new()),
        }
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Mint a registration for a worker that is about to hand off.
    ///
    /// The N-th registration (0-based) gets `base_port + N` and `worker-(N+1)`.
    /// Names and ports already taken by manually added registrations are
    /// skipped so both stay unique.
    pub async fn register_new_worker(&self) -> Result<WorkerRegistration> {
        let mut pool = self.pool.write().await;

        let mut ordinal = pool.len();
        let registration = loop {
            let port = u16::try_from(ordinal)
                .ok()
                .and_then(|offset| self.base_port.checked_add(offset))
                .ok_or(CorralError::PortsExhausted(self.base_port))?;
            let name = format!("worker-{}", ordinal + 1);
            let taken = pool
                .iter()
                .any(|r| r.name == name || r.assigned_port == port);
            if !taken {
                break WorkerRegistration::new(name, port, Utc::now(), None);
            }
            ordinal += 1;
        };

        pool.push(registration.clone());
        tracing::info!(
            worker = %registration.name,
            port = registration.assigned_port,
            "New worker registration"
        );
        Ok(registration)
    }

    /// Insert an externally built registration.
    pub async fn add_to_pool(&self, registration: WorkerRegistration) -> Result<()> {
        let mut pool = self.pool.write().await;
        if let Some(existing) = pool
            .iter()
            .find(|r| r.name == registration.name || r.assigned_port == registration.assigned_port)
        {
            return Err(CorralError::Protocol(format!(
                "registration {} (port {}) collides with {} (port {})",
                registration.name,
                registration.assigned_port,
                existing.name,
                existing.assigned_port
            )));
        }
        pool.push(registration);
        Ok(())
    }

    /// Complete the hand-off of `name` by storing its private connection.
    pub async fn attach_connection(&self, name: &str, connection: Arc<Connection>) -> Result<()> {
        let mut pool = self.pool.write().await;
        let registration = pool
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| CorralError::WorkerNotFound(name.to_string()))?;
        if registration.connection.is_some() {
            return Err(CorralError::Handshake(format!(
                "{} already has a connection",
                name
            )));
        }
        registration.connection = Some(connection);
        Ok(())
    }

    pub async fn record_heartbeat(&self, name: &str) -> Result<()> {
        let mut pool = self.pool.write().await;
        let registration = pool
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| CorralError::WorkerNotFound(name.to_string()))?;
        registration.record_heartbeat(Utc::now());
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<WorkerRegistration> {
        self.pool.read().await.iter().find(|r| r.name == name).cloned()
    }

    pub async fn get_all(&self) -> Vec<WorkerRegistration> {
        self.pool.read().await.clone()
    }

    /// Registrations whose heartbeat is at most `threshold` old.
    pub async fn get_non_dead(&self, threshold: Duration) -> Vec<WorkerRegistration> {
        let now = Utc::now();
        self.pool
            .read()
            .await
            .iter()
            .filter(|r| !r.is_dead(threshold, now))
            .cloned()
            .collect()
    }

    /// Names and heartbeat ages of registrations older than `threshold`.
    pub async fn dead_workers(&self, threshold: Duration) -> Vec<(String, Duration)> {
        let now = Utc::now();
        self.pool
            .read()
            .await
            .iter()
            .filter(|r| r.is_dead(threshold, now))
            .map(|r| (r.name.clone(), r.heartbeat_age(now)))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.pool.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pool.read().await.is_empty()
    }
}
