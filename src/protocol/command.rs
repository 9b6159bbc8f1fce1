//! Text command frames exchanged between manager, workers and API clients.

use std::fmt;

use crate::error::{CorralError, Result};

fn protocol_error(kind: &str, raw: &str) -> CorralError {
    CorralError::Protocol(format!("unrecognized {} {:?}", kind, raw))
}

/// Parse `<PREFIX>[<id>]<rest>` and return the id and whatever follows `]`.
fn bracketed_id<'a>(raw: &'a str, prefix: &str) -> Option<(u64, &'a str)> {
    let rest = raw.strip_prefix(prefix)?.strip_prefix('[')?;
    let (id, rest) = rest.split_once(']')?;
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((id.parse().ok()?, rest))
}

fn non_empty_argument(arg: &str) -> Option<&str> {
    let arg = arg.trim();
    if arg.is_empty() {
        None
    } else {
        Some(arg)
    }
}

/// Reply on the bootstrap port: `<privatePort>|<workerName>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationGrant {
    pub port: u16,
    pub name: String,
}

impl RegistrationGrant {
    pub fn parse(raw: &str) -> Result<Self> {
        let (port, name) = raw
            .split_once('|')
            .ok_or_else(|| protocol_error("registration grant", raw))?;
        let port = port
            .parse()
            .map_err(|_| protocol_error("registration grant", raw))?;
        let name = non_empty_argument(name).ok_or_else(|| protocol_error("registration grant", raw))?;
        Ok(Self {
            port,
            name: name.to_string(),
        })
    }
}

impl fmt::Display for RegistrationGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.port, self.name)
    }
}

/// Distributed variable operations a worker sends to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarCommand {
    /// Followed by a value frame.
    Register(String),
    Deregister(String),
    /// Answered with `VALUE <name>` and a value frame.
    Retrieve(String),
}

/// Frames a worker sends over its private channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    Heartbeat,
    Transfer,
    Var(VarCommand),
    TaskFinished { task_id: u64, succeeded: bool },
}

impl WorkerMessage {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "HEARTBEAT" => return Ok(WorkerMessage::Heartbeat),
            "TRANSFER" => return Ok(WorkerMessage::Transfer),
            _ => {}
        }

        if let Some(var) = raw.strip_prefix("VAR ") {
            let (sub, name) = var.split_once(' ').unwrap_or((var, ""));
            let name = non_empty_argument(name)
                .ok_or_else(|| protocol_error("variable command", raw))?
                .to_string();
            let command = match sub {
                "REGISTER" => VarCommand::Register(name),
                "DEREGISTER" => VarCommand::Deregister(name),
                "RETRIEVE" => VarCommand::Retrieve(name),
                _ => return Err(protocol_error("variable command", raw)),
            };
            return Ok(WorkerMessage::Var(command));
        }

        for (prefix, succeeded) in [("COMPLETE", true), ("FAILED", false)] {
            if let Some((task_id, "")) = bracketed_id(raw, prefix) {
                return Ok(WorkerMessage::TaskFinished { task_id, succeeded });
            }
        }

        Err(protocol_error("worker message", raw))
    }
}

impl fmt::Display for WorkerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerMessage::Heartbeat => write!(f, "HEARTBEAT"),
            WorkerMessage::Transfer => write!(f, "TRANSFER"),
            WorkerMessage::Var(VarCommand::Register(name)) => write!(f, "VAR REGISTER {}", name),
            WorkerMessage::Var(VarCommand::Deregister(name)) => write!(f, "VAR DEREGISTER {}", name),
            WorkerMessage::Var(VarCommand::Retrieve(name)) => write!(f, "VAR RETRIEVE {}", name),
            WorkerMessage::TaskFinished {
                task_id,
                succeeded: true,
            } => write!(f, "COMPLETE[{}]", task_id),
            WorkerMessage::TaskFinished {
                task_id,
                succeeded: false,
            } => write!(f, "FAILED[{}]", task_id),
        }
    }
}

/// Frames the manager sends to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerMessage {
    /// Followed by the job payload frame for `tag`.
    Execute { task_id: u64, tag: String },
    /// Followed by an `Option<serde_json::Value>` frame.
    VarValue { name: String },
}

impl ManagerMessage {
    pub fn parse(raw: &str) -> Result<Self> {
        if let Some((task_id, rest)) = bracketed_id(raw, "EXECUTE") {
            let tag = rest
                .strip_prefix(' ')
                .and_then(non_empty_argument)
                .ok_or_else(|| protocol_error("manager message", raw))?;
            return Ok(ManagerMessage::Execute {
                task_id,
                tag: tag.to_string(),
            });
        }
        if let Some(name) = raw.strip_prefix("VALUE ").and_then(non_empty_argument) {
            return Ok(ManagerMessage::VarValue {
                name: name.to_string(),
            });
        }
        Err(protocol_error("manager message", raw))
    }
}

impl fmt::Display for ManagerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerMessage::Execute { task_id, tag } => write!(f, "EXECUTE[{}] {}", task_id, tag),
            ManagerMessage::VarValue { name } => write!(f, "VALUE {}", name),
        }
    }
}

/// Requests accepted on the API port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    ListWorker(String),
    ListAllWorkers,
    JobStatus(u64),
    /// Followed by a job frame; answered with `Option<JobDetail>`.
    Execute,
    /// Followed by a job frame; no reply.
    QueueJob,
}

impl ApiRequest {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "EXECUTE" => return Ok(ApiRequest::Execute),
            "QUEUEJOB" => return Ok(ApiRequest::QueueJob),
            "REPORT LISTALLWORKERS" => return Ok(ApiRequest::ListAllWorkers),
            _ => {}
        }

        let report = raw
            .strip_prefix("REPORT ")
            .ok_or_else(|| protocol_error("API request", raw))?;
        if let Some(name) = report.strip_prefix("LISTWORKER ").and_then(non_empty_argument) {
            return Ok(ApiRequest::ListWorker(name.to_string()));
        }
        if let Some(id) = report.strip_prefix("JOBSTATUS ").and_then(non_empty_argument) {
            let id = id.parse().map_err(|_| protocol_error("API request", raw))?;
            return Ok(ApiRequest::JobStatus(id));
        }
        Err(protocol_error("API request", raw))
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiRequest::ListWorker(name) => write!(f, "REPORT LISTWORKER {}", name),
            ApiRequest::ListAllWorkers => write!(f, "REPORT LISTALLWORKERS"),
            ApiRequest::JobStatus(id) => write!(f, "REPORT JOBSTATUS {}", id),
            ApiRequest::Execute => write!(f, "EXECUTE"),
            ApiRequest::QueueJob => write!(f, "QUEUEJOB"),
        }
    }
}
