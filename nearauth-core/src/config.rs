//! Authenticator configuration. Hosts embed this in their own config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::availability::DEFAULT_AVAILABILITY_TIMEOUT;
use crate::channel::DEFAULT_PROXY_TIMEOUT;
use crate::offer::DEFAULT_MAX_OFFER_BYTES;
use crate::policy::Mode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// manual (default), notification or automatic.
    #[serde(default)]
    pub mode: Mode,
    /// How long an available login survives without a fresh offer (default 6000).
    #[serde(default = "default_availability_timeout_ms")]
    pub availability_timeout_ms: u64,
    /// Bound on one proxy request/response round trip (default 20000).
    #[serde(default = "default_proxy_timeout_ms")]
    pub proxy_timeout_ms: u64,
    /// Cap on bytes read from one offer connection, length prefix included (default 4096).
    #[serde(default = "default_max_offer_bytes")]
    pub max_offer_bytes: usize,
}

fn default_availability_timeout_ms() -> u64 {
    DEFAULT_AVAILABILITY_TIMEOUT.as_millis() as u64
}
fn default_proxy_timeout_ms() -> u64 {
    DEFAULT_PROXY_TIMEOUT.as_millis() as u64
}
fn default_max_offer_bytes() -> usize {
    DEFAULT_MAX_OFFER_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            availability_timeout_ms: default_availability_timeout_ms(),
            proxy_timeout_ms: default_proxy_timeout_ms(),
            max_offer_bytes: default_max_offer_bytes(),
        }
    }
}

impl Config {
    pub fn availability_timeout(&self) -> Duration {
        Duration::from_millis(self.availability_timeout_ms)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms)
    }

    /// Reject values that would make the authenticator unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.availability_timeout_ms == 0 {
            return Err(ConfigError::Zero("availability_timeout_ms"));
        }
        if self.proxy_timeout_ms == 0 {
            return Err(ConfigError::Zero("proxy_timeout_ms"));
        }
        if self.max_offer_bytes <= crate::wire::LEN_SIZE {
            return Err(ConfigError::OfferCapTooSmall(self.max_offer_bytes));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("max_offer_bytes {0} leaves no room for a payload")]
    OfferCapTooSmall(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.mode, Mode::Manual);
        assert_eq!(c.availability_timeout(), Duration::from_millis(6_000));
        assert_eq!(c.proxy_timeout(), Duration::from_millis(20_000));
        assert_eq!(c.max_offer_bytes, 4096);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let c = Config {
            proxy_timeout_ms: 0,
            ..Config::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::Zero("proxy_timeout_ms")));
    }

    #[test]
    fn tiny_offer_cap_is_invalid() {
        let c = Config {
            max_offer_bytes: 4,
            ..Config::default()
        };
        assert_eq!(c.validate(), Err(ConfigError::OfferCapTooSmall(4)));
    }
}
