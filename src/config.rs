//! Queue and server configuration

use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Default ceiling on concurrent page loads
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Default HTTP port of the service
pub const DEFAULT_PORT: u16 = 3491;

/// Configuration of the render queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of page-load pipelines running at once
    pub max_workers: usize,
    /// Pause between two open attempts for the same URL
    pub retry_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            retry_delay: Duration::ZERO,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::ConfigError("max_workers must be at least 1".into()));
        }
        if u32::try_from(self.max_workers).is_err() {
            return Err(Error::ConfigError(format!(
                "max_workers must not exceed {}",
                u32::MAX
            )));
        }
        Ok(())
    }
}

/// How successful renders are written into HTTP response bodies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyEncoding {
    /// Base64 text with `Content-Transfer-Encoding: Base64`
    #[default]
    Base64,
    /// Raw PNG bytes
    Binary,
}

/// Configuration of the HTTP front end
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on; port 0 picks a free port
    pub addr: SocketAddr,
    pub body_encoding: BodyEncoding,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            body_encoding: BodyEncoding::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let q = QueueConfig::default();
        assert_eq!(q.max_workers, 10);
        assert_eq!(q.retry_delay, Duration::ZERO);
        assert!(q.validate().is_ok());

        let s = ServerConfig::default();
        assert_eq!(s.addr.port(), 3491);
        assert_eq!(s.body_encoding, BodyEncoding::Base64);
    }

    #[test]
    fn zero_workers_is_rejected() {
        let q = QueueConfig {
            max_workers: 0,
            ..Default::default()
        };
        assert!(matches!(q.validate(), Err(Error::ConfigError(_))));
    }
}
