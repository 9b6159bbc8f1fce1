pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use client::ManagerClient;
pub use config::ClusterConfig;
pub use error::{CorralError, Result};
pub use manager::Manager;
pub use worker::Worker;
