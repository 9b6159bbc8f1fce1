//! Wire protocol shared by the manager, workers and API clients.
//!
//! Every exchange is a sequence of frames (`MSG|<len>\n<body>`). A body is
//! either a text command (see [`command`]) or an encoded object (see
//! [`codec`]); the receiver always knows which one it expects next.
//!
//! # Channels
//!
//! - **Bootstrap**: worker sends an opaque request, manager answers
//!   `<port>|<name>`; the worker then connects to `<port>` and sends `TRANSFER`.
//! - **Private worker channel**: `HEARTBEAT`, `VAR ...`, `COMPLETE[id]` /
//!   `FAILED[id]` from the worker; `EXECUTE[id] <tag>` + job frame and
//!   `VALUE <name>` + value frame from the manager.
//! - **API**: `REPORT ...`, `EXECUTE` + job frame, `QUEUEJOB` + job frame.

pub mod codec;
pub mod command;
pub mod connection;
pub mod frame;
pub mod reports;

pub use command::{ApiRequest, ManagerMessage, RegistrationGrant, VarCommand, WorkerMessage};
pub use connection::Connection;
pub use reports::{JobDetail, WorkerDetail};
