use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::protocol::{codec, ManagerMessage, VarCommand, WorkerMessage};
use crate::worker::link::ManagerLink;

/// Worker-side view of the distributed variables.
///
/// Reads hit the local map first and fall back to the manager. Writes update
/// the local map and are forwarded to the manager.
#[derive(Debug, Clone)]
pub struct VariableStore {
    link: Arc<ManagerLink>,
    local: Arc<Mutex<HashMap<String, Value>>>,
}

impl VariableStore {
    pub fn new(link: Arc<ManagerLink>) -> Self {
        Self {
            link,
            local: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn register(&self, name: &str, value: Value) -> Result<()> {
        let command = WorkerMessage::Var(VarCommand::Register(name.to_string()));
        self.link.send_with_value(&command, &value).await?;
        self.local.lock().await.insert(name.to_string(), value);
        Ok(())
    }

    pub async fn deregister(&self, name: &str) -> Result<()> {
        self.local.lock().await.remove(name);
        let command = WorkerMessage::Var(VarCommand::Deregister(name.to_string()));
        self.link.send(&command).await
    }

    /// Look `name` up locally, then ask the manager. `None` if neither knows it.
    pub async fn retrieve(&self, name: &str) -> Result<Option<Value>> {
        if let Some(value) = self.local.lock().await.get(name) {
            return Ok(Some(value.clone()));
        }

        let command = WorkerMessage::Var(VarCommand::Retrieve(name.to_string()));
        let reply = self
            .link
            .request(&command, |m| matches!(m, ManagerMessage::VarValue { name: n } if n == name))
            .await?;
        codec::decode(&reply.payload)
    }
}
