use std::collections::VecDeque;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::{CorralError, Result};
use crate::protocol::{codec, Connection, ManagerMessage, WorkerMessage};

/// A manager command together with the frame that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub message: ManagerMessage,
    pub payload: Vec<u8>,
}

/// A worker's private channel to the manager.
///
/// Manager commands always travel as a command frame plus one follow-up
/// frame; both are read under the backlog lock so concurrent readers never
/// split a pair. Commands read while waiting for a specific reply are parked
/// in the backlog and handed out first by [`ManagerLink::next_message`].
#[derive(Debug)]
pub struct ManagerLink {
    connection: Connection,
    backlog: Mutex<VecDeque<Inbound>>,
}

impl ManagerLink {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn send(&self, message: &WorkerMessage) -> Result<()> {
        self.connection.send_text(&message.to_string()).await
    }

    /// Send a command followed by an encoded value frame.
    pub async fn send_with_value<T>(&self, message: &WorkerMessage, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let command = message.to_string();
        let body = codec::encode(value)?;
        self.connection.send_frames(&[command.as_bytes(), body.as_slice()]).await
    }

    /// The next manager command: parked ones first, then whatever is already
    /// waiting on the socket. Never waits for new data.
    pub async fn next_message(&self) -> Result<Option<Inbound>> {
        let mut backlog = self.backlog.lock().await;
        if let Some(inbound) = backlog.pop_front() {
            return Ok(Some(inbound));
        }
        if !self.connection.message_is_available().await? {
            return Ok(None);
        }
        self.read_inbound().await.map(Some)
    }

    /// Send `message` and read manager commands until one satisfies
    /// `accept`, parking the rest.
    ///
    /// The backlog lock is taken before sending so no other reader can
    /// consume the reply.
    pub async fn request<F>(&self, message: &WorkerMessage, mut accept: F) -> Result<Inbound>
    where
        F: FnMut(&ManagerMessage) -> bool,
    {
        let mut backlog = self.backlog.lock().await;
        self.send(message).await?;
        loop {
            let inbound = self.read_inbound().await?;
            if accept(&inbound.message) {
                return Ok(inbound);
            }
            tracing::debug!(message = %inbound.message, "Parking manager command");
            backlog.push_back(inbound);
        }
    }

    pub async fn backlog_len(&self) -> usize {
        self.backlog.lock().await.len()
    }

    // Callers hold the backlog lock.
    async fn read_inbound(&self) -> Result<Inbound> {
        let raw = self.connection.receive_text().await?;
        let message = ManagerMessage::parse(&raw)?;
        let payload = self.connection.receive_frame().await.map_err(|e| match e {
            CorralError::Timeout(_) => {
                CorralError::MalformedMessage(format!("{} arrived without its payload", message))
            }
            other => other,
        })?;
        Ok(Inbound { message, payload })
    }
}
