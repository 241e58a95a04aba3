//! Host configuration.

use std::net::SocketAddr;
use std::time::Duration;

use crate::network::protocol::WireFormat;

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Address clients connect to.
    pub bind_addr: SocketAddr,
    /// Session tick period.
    pub tick_period: Duration,
    /// Length of one match.
    pub match_duration: Duration,
    /// Maximum concurrent players.
    pub max_players: u32,
    /// Outbound queue length per client.
    pub outbound_queue: usize,
    /// Frame encoding sent to clients.
    pub wire_format: WireFormat,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7777)),
            tick_period: Duration::from_millis(100),
            match_duration: Duration::from_secs(180),
            max_players: 4,
            outbound_queue: 64,
            wire_format: WireFormat::Json,
        }
    }
}

impl HostConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_period.is_zero() {
            return Err(ConfigError::ZeroTickPeriod);
        }
        if self.max_players == 0 {
            return Err(ConfigError::NoPlayerSlots);
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::ZeroOutboundQueue);
        }
        Ok(())
    }

    /// Match length in ticks, rounded up to a whole tick.
    pub fn match_duration_ticks(&self) -> u32 {
        let period = self.tick_period.as_nanos().max(1);
        let ticks = self.match_duration.as_nanos().div_ceil(period);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Tick period of zero.
    #[error("Tick period must be greater than zero")]
    ZeroTickPeriod,

    /// No room for any player.
    #[error("Max players must be at least 1")]
    NoPlayerSlots,

    /// Outbound queue of zero.
    #[error("Outbound queue must hold at least one message")]
    ZeroOutboundQueue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_config_default() {
        let config = HostConfig::default();
        assert_eq!(config.bind_addr.port(), 7777);
        assert_eq!(config.tick_period, Duration::from_millis(100));
        assert_eq!(config.max_players, 4);
        assert_eq!(config.wire_format, WireFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_match_duration_ticks() {
        let config = HostConfig::default();
        assert_eq!(config.match_duration_ticks(), 1800);

        let config = HostConfig {
            match_duration: Duration::from_millis(250),
            ..Default::default()
        };
        // Partial ticks round up
        assert_eq!(config.match_duration_ticks(), 3);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let config = HostConfig {
            tick_period: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroTickPeriod));

        let config = HostConfig {
            max_players: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoPlayerSlots));

        let config = HostConfig {
            outbound_queue: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroOutboundQueue));
    }
}
