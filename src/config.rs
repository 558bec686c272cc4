// src/config.rs

//! User configuration recognized by the core
//!
//! Only the shape and defaults live here; loading the TOML file is the
//! caller's concern.

use crate::feed::Stability;
use serde::Deserialize;
use std::time::Duration;

/// How freely the network may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkUse {
    /// Download whatever is useful
    #[default]
    Full,
    /// Prefer cached data; download only when there is no alternative
    Minimal,
    /// Never touch the network
    Offline,
}

/// Core configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network_use: NetworkUse,

    /// Age after which a cached feed is flagged stale
    #[serde(default = "default_freshness_secs")]
    pub freshness_secs: u64,

    /// Accept testing-quality implementations to help upstream
    #[serde(default)]
    pub help_with_testing: bool,
}

fn default_freshness_secs() -> u64 {
    // One week
    60 * 60 * 24 * 7
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network_use: NetworkUse::default(),
            freshness_secs: default_freshness_secs(),
            help_with_testing: false,
        }
    }
}

impl Config {
    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.freshness_secs)
    }

    /// The lowest stability a candidate may have and still be suitable,
    /// before per-interface policy overrides
    pub fn stability_floor(&self) -> Stability {
        if self.help_with_testing {
            Stability::Testing
        } else {
            Stability::Stable
        }
    }

    /// Whether uncached implementations can be considered at all
    pub fn may_download(&self) -> bool {
        !matches!(self.network_use, NetworkUse::Offline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network_use, NetworkUse::Full);
        assert_eq!(config.freshness(), Duration::from_secs(604_800));
        assert!(!config.help_with_testing);
        assert_eq!(config.stability_floor(), Stability::Stable);
        assert!(config.may_download());
    }

    #[test]
    fn test_help_with_testing_lowers_floor() {
        let config = Config {
            help_with_testing: true,
            ..Default::default()
        };
        assert_eq!(config.stability_floor(), Stability::Testing);
    }

    #[test]
    fn test_offline_blocks_downloads() {
        let config = Config {
            network_use: NetworkUse::Offline,
            ..Default::default()
        };
        assert!(!config.may_download());
    }
}
