use psn_protocol::{
    PsnError, Result, DEFAULT_MTU, DEFAULT_MULTICAST_GROUP, DEFAULT_PORT, TRANSPORT_HEADER_LEN,
};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_INFO_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SYSTEM_NAME: &str = "PSN Sender";

/// How often DATA packets go out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendRate {
    Hz30,
    #[default]
    Hz60,
    Hz120,
    /// One DATA packet per call to `tick`.
    EveryTick,
    Interval(Duration),
}

impl SendRate {
    /// Time between DATA packets, or `None` when every tick sends.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            SendRate::Hz30 => Some(Duration::from_secs(1) / 30),
            SendRate::Hz60 => Some(Duration::from_secs(1) / 60),
            SendRate::Hz120 => Some(Duration::from_secs(1) / 120),
            SendRate::EveryTick => None,
            SendRate::Interval(interval) => Some(*interval),
        }
    }

    /// Maps a frequency in Hz onto a named rate when one matches.
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            0 => None,
            30 => Some(SendRate::Hz30),
            60 => Some(SendRate::Hz60),
            120 => Some(SendRate::Hz120),
            other => Some(SendRate::Interval(Duration::from_secs(1) / other)),
        }
    }
}

impl From<Duration> for SendRate {
    fn from(interval: Duration) -> Self {
        SendRate::Interval(interval)
    }
}

/// Sender settings. The defaults send to the published PSN group and port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Outgoing interface for multicast. `0.0.0.0` lets the OS choose.
    pub interface: Ipv4Addr,
    /// Announced in every INFO packet.
    pub system_name: String,
    pub info_interval: Duration,
    pub data_rate: SendRate,
    /// Largest datagram emitted, transport header included.
    pub mtu: usize,
    pub multicast_ttl: u32,
    pub multicast_loopback: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            system_name: DEFAULT_SYSTEM_NAME.to_string(),
            info_interval: DEFAULT_INFO_INTERVAL,
            data_rate: SendRate::default(),
            mtu: DEFAULT_MTU,
            multicast_ttl: 1,
            multicast_loopback: true,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mtu <= TRANSPORT_HEADER_LEN {
            return Err(PsnError::invalid_config(format!(
                "mtu {} must exceed the {}-byte transport header",
                self.mtu, TRANSPORT_HEADER_LEN
            )));
        }
        if self.info_interval.is_zero() {
            return Err(PsnError::invalid_config("info_interval must be non-zero"));
        }
        if self.data_rate.interval() == Some(Duration::ZERO) {
            return Err(PsnError::invalid_config("data interval must be non-zero"));
        }
        if self.port == 0 {
            return Err(PsnError::invalid_config("destination port must be non-zero"));
        }
        if self.group.is_unspecified() {
            return Err(PsnError::invalid_config("group must not be 0.0.0.0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_rates() {
        assert_eq!(SendRate::Hz30.interval(), Some(Duration::from_nanos(33_333_333)));
        assert_eq!(SendRate::Hz60.interval(), Some(Duration::from_nanos(16_666_666)));
        assert_eq!(SendRate::Hz120.interval(), Some(Duration::from_nanos(8_333_333)));
        assert_eq!(SendRate::EveryTick.interval(), None);
        assert_eq!(
            SendRate::from(Duration::from_millis(5)).interval(),
            Some(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_rate_from_hz() {
        assert_eq!(SendRate::from_hz(60), Some(SendRate::Hz60));
        assert_eq!(
            SendRate::from_hz(10),
            Some(SendRate::Interval(Duration::from_millis(100)))
        );
        assert_eq!(SendRate::from_hz(0), None);
    }

    #[test]
    fn test_default_config() {
        let config = SenderConfig::default();
        assert_eq!(config.group, Ipv4Addr::new(236, 10, 10, 10));
        assert_eq!(config.port, 56565);
        assert_eq!(config.info_interval, Duration::from_secs(1));
        assert_eq!(config.data_rate, SendRate::Hz60);
        assert_eq!(config.multicast_ttl, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs() {
        let tiny_mtu = SenderConfig {
            mtu: TRANSPORT_HEADER_LEN,
            ..Default::default()
        };
        assert!(matches!(
            tiny_mtu.validate(),
            Err(PsnError::InvalidConfig { .. })
        ));

        let zero_info = SenderConfig {
            info_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_info.validate().is_err());

        let zero_data = SenderConfig {
            data_rate: SendRate::Interval(Duration::ZERO),
            ..Default::default()
        };
        assert!(zero_data.validate().is_err());

        let no_port = SenderConfig {
            port: 0,
            ..Default::default()
        };
        assert!(no_port.validate().is_err());
    }
}
