use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::error::{CorralError, Result};

/// Highest accepted log verbosity (debug).
pub const MAX_LOG_LEVEL: u8 = 3;

/// Runtime settings shared by the manager, its workers and API clients.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Address the manager binds its listeners to and workers connect to.
    pub bind_addr: IpAddr,
    /// Well-known bootstrap port for worker registration.
    /// Private worker ports are allocated from `registration_port + 1` upwards.
    pub registration_port: u16,
    /// Port of the external API listener.
    pub api_port: u16,
    /// Number of in-process workers started in standalone mode.
    pub worker_count: usize,
    /// Heartbeat age after which a worker is considered dead.
    pub dead_threshold: Duration,
    /// Verbosity 0-3; errors are always shown.
    pub log_level: u8,
    /// Maximum wait for a frame before a read fails with a timeout.
    pub read_timeout: Duration,
    /// Delay between two manager control loop iterations.
    pub poll_interval: Duration,
    /// Delay between two worker control loop iterations (one heartbeat each).
    pub heartbeat_interval: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            registration_port: 4000,
            api_port: 3999,
            worker_count: 4,
            dead_threshold: Duration::from_secs(5),
            log_level: 3,
            read_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

impl ClusterConfig {
    pub fn new(bind_addr: IpAddr, registration_port: u16, api_port: u16) -> Self {
        Self {
            bind_addr,
            registration_port,
            api_port,
            ..Default::default()
        }
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_dead_threshold(mut self, dead_threshold: Duration) -> Self {
        self.dead_threshold = dead_threshold;
        self
    }

    pub fn with_log_level(mut self, log_level: u8) -> Self {
        self.log_level = log_level;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// First port handed out to a registering worker.
    pub fn private_port_base(&self) -> u16 {
        self.registration_port.saturating_add(1)
    }

    pub fn registration_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.registration_port)
    }

    pub fn api_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.api_port)
    }

    /// Reject settings the manager cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.registration_port == 0 {
            return Err(CorralError::InvalidConfig(
                "registration port must be non-zero".to_string(),
            ));
        }
        if self.registration_port == u16::MAX {
            return Err(CorralError::InvalidConfig(format!(
                "registration port {} leaves no room for worker ports",
                self.registration_port
            )));
        }
        if self.api_port == 0 {
            return Err(CorralError::InvalidConfig(
                "API port must be non-zero".to_string(),
            ));
        }
        if self.api_port == self.registration_port {
            return Err(CorralError::InvalidConfig(format!(
                "API port and registration port are both {}",
                self.api_port
            )));
        }
        if self.api_port > self.registration_port {
            return Err(CorralError::InvalidConfig(format!(
                "API port {} falls in the worker port range above {}",
                self.api_port, self.registration_port
            )));
        }
        if self.dead_threshold.is_zero() {
            return Err(CorralError::InvalidConfig(
                "dead heartbeat threshold must be positive".to_string(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(CorralError::InvalidConfig(
                "read timeout must be positive".to_string(),
            ));
        }
        if self.log_level > MAX_LOG_LEVEL {
            return Err(CorralError::InvalidConfig(format!(
                "log level {} is out of range 0-{}",
                self.log_level, MAX_LOG_LEVEL
            )));
        }
        Ok(())
    }

    /// Tracing directive for the configured verbosity.
    pub fn log_directive(&self) -> &'static str {
        match self.log_level {
            0 => "error",
            1 => "warn",
            2 => "info",
            _ => "debug",
        }
    }

    /// Filter used by the binary: `RUST_LOG` wins over the configured level.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_directive()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_config_default() {
        let cfg = ClusterConfig::default();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1");
        assert_eq!(cfg.registration_port, 4000);
        assert_eq!(cfg.api_port, 3999);
        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.dead_threshold, Duration::from_secs(5));
        assert_eq!(cfg.log_level, 3);
        assert_eq!(cfg.read_timeout, Duration::from_secs(10));
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn private_ports_start_above_registration_port() {
        let cfg = ClusterConfig::default();
        assert_eq!(cfg.private_port_base(), 4001);
        assert_eq!(cfg.registration_addr().to_string(), "127.0.0.1:4000");
        assert_eq!(cfg.api_addr().to_string(), "127.0.0.1:3999");
    }

    #[test]
    fn builder_methods_override_defaults() {
        let cfg = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000, 4999)
            .with_worker_count(2)
            .with_dead_threshold(Duration::from_secs(1))
            .with_log_level(1)
            .with_poll_interval(Duration::from_millis(50));
        assert_eq!(cfg.registration_port, 5000);
        assert_eq!(cfg.api_port, 4999);
        assert_eq!(cfg.worker_count, 2);
        assert_eq!(cfg.dead_threshold, Duration::from_secs(1));
        assert_eq!(cfg.log_directive(), "warn");
        assert_eq!(cfg.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn validate_rejects_colliding_ports() {
        let cfg = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000, 4000);
        assert!(matches!(cfg.validate(), Err(CorralError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_api_port_in_private_range() {
        let cfg = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 26000, 26002);
        assert!(matches!(cfg.validate(), Err(CorralError::InvalidConfig(_))));

        let next = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 26000, 26001);
        assert!(next.validate().is_err());

        let below = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 26000, 1);
        assert!(below.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_and_max_ports() {
        let zero = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 3999);
        assert!(zero.validate().is_err());

        let no_room = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), u16::MAX, 3999);
        assert!(no_room.validate().is_err());

        let zero_api = ClusterConfig::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000, 0);
        assert!(zero_api.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_levels_and_thresholds() {
        let cfg = ClusterConfig::default().with_log_level(4);
        assert!(cfg.validate().is_err());

        let cfg = ClusterConfig::default().with_dead_threshold(Duration::ZERO);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn log_levels_map_to_directives() {
        let levels: Vec<&str> = (0..=3)
            .map(|l| ClusterConfig::default().with_log_level(l).log_directive())
            .collect();
        assert_eq!(levels, vec!["error", "warn", "info", "debug"]);
    }
}
