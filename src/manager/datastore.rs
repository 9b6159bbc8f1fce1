use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;
use crate::protocol::{codec, Connection, ManagerMessage, VarCommand};

#[derive(Debug, Clone, PartialEq)]
struct StoredVariable {
    owner: String,
    value: Value,
}

/// Manager-side table of distributed variables, keyed by name.
///
/// A variable belongs to the worker that registered it last; only the owner
/// may remove it.
#[derive(Debug, Default)]
pub struct DataStore {
    variables: HashMap<String, StoredVariable>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, owner: &str, name: &str, value: Value) {
        let previous = self.variables.insert(
            name.to_string(),
            StoredVariable {
                owner: owner.to_string(),
                value,
            },
        );
        if let Some(previous) = previous.filter(|p| p.owner != owner) {
            tracing::debug!(variable = name, from = %previous.owner, to = owner, "Variable changed owner");
        }
    }

    /// Remove `name` if `requester` owns it. Returns whether it was removed.
    pub fn deregister(&mut self, requester: &str, name: &str) -> bool {
        match self.variables.get(name) {
            Some(stored) if stored.owner == requester => {
                self.variables.remove(name);
                true
            }
            Some(stored) => {
                tracing::warn!(
                    variable = name,
                    owner = %stored.owner,
                    requester,
                    "Refusing to deregister a variable owned by another worker"
                );
                false
            }
            None => {
                tracing::warn!(variable = name, requester, "Deregister of unknown variable");
                false
            }
        }
    }

    pub fn retrieve(&self, name: &str) -> Option<&Value> {
        self.variables.get(name).map(|stored| &stored.value)
    }

    pub fn owner(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(|stored| stored.owner.as_str())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Apply one `VAR ...` command from `worker`, reading or answering the
    /// value frame that belongs to it.
    pub async fn handle(&mut self, worker: &str, command: VarCommand, connection: &Connection) -> Result<()> {
        match command {
            VarCommand::Register(name) => {
                let value: Value = connection.receive_object().await?;
                tracing::debug!(worker, variable = %name, "Variable registered");
                self.register(worker, &name, value);
            }
            VarCommand::Deregister(name) => {
                if self.deregister(worker, &name) {
                    tracing::debug!(worker, variable = %name, "Variable deregistered");
                }
            }
            VarCommand::Retrieve(name) => {
                let reply = ManagerMessage::VarValue { name: name.clone() }.to_string();
                let value = codec::encode(&self.retrieve(&name))?;
                connection.send_frames(&[reply.as_bytes(), value.as_slice()]).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_overwrites_and_takes_ownership() {
        let mut store = DataStore::new();
        store.register("worker-1", "counter", json!(1));
        store.register("worker-2", "counter", json!(2));
        assert_eq!(store.retrieve("counter"), Some(&json!(2)));
        assert_eq!(store.owner("counter"), Some("worker-2"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn only_the_owner_can_deregister() {
        let mut store = DataStore::new();
        store.register("worker-1", "path", json!("/tmp/out"));

        assert!(!store.deregister("worker-2", "path"));
        assert!(store.retrieve("path").is_some());

        assert!(store.deregister("worker-1", "path"));
        assert!(store.retrieve("path").is_none());
        assert!(!store.deregister("worker-1", "path"));
        assert!(store.is_empty());
    }
}
