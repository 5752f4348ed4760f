//! Provisioning runtime configuration.
//!
//! Defaults mirror the device's documented behaviour: advertise every 500 ms,
//! poll for BLE-provisioned credentials once a second, join with a 5 second
//! timeout and retry every 5 seconds forever.

use crate::ble::{
    AdvertisementError, AdvertisementPayload, AdvertisingKind, AdvertisingParameters,
    SERVICE_UUID16,
};
use crate::wifi::SECTOR_SIZE;
use std::fmt;
use std::time::Duration;

/// Default BLE device name.
pub const DEFAULT_DEVICE_NAME: &str = "WiFi-Prov";

/// Advertising interval (units of 0.625 ms, 800 = 500 ms).
pub const DEFAULT_ADV_INTERVAL: u16 = 800;

/// Flash offset of the credential block: last 4 KiB sector of a 4 MiB part.
pub const DEFAULT_CREDENTIAL_OFFSET: u32 = 0x3F_F000;

/// Interval between polls of the pending BLE credentials.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Documented provisioning timeout. Only enforced when set on the config.
pub const DEFAULT_PROVISIONING_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Timeout for a single join attempt.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_millis(5000);

/// Sleep between failed join attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(5000);

/// Heartbeat LED toggle period.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_millis(1000);

/// Bluetooth Core limits for the advertising interval (20 ms .. 10.24 s).
const ADV_INTERVAL_RANGE: std::ops::RangeInclusive<u16> = 0x0020..=0x4000;

/// Configuration shared by the BLE session, the supervisor and the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningConfig {
    /// Advertised device name.
    pub device_name: String,
    /// Advertising parameters.
    pub advertising: AdvertisingParameters,
    /// Restart advertising after the peer disconnects.
    pub readvertise_on_disconnect: bool,
    /// Flash offset of the credential block (sector aligned).
    pub credential_offset: u32,
    /// Poll interval while waiting for BLE credentials.
    pub poll_interval: Duration,
    /// Give up waiting for BLE credentials after this long (`None` waits forever).
    pub provisioning_timeout: Option<Duration>,
    /// Timeout handed to each join attempt.
    pub join_timeout: Duration,
    /// Sleep between failed join attempts.
    pub retry_backoff: Duration,
    /// Save BLE-provisioned credentials after the first successful join.
    pub persist_provisioned: bool,
    /// Heartbeat LED period.
    pub heartbeat_period: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            advertising: AdvertisingParameters {
                interval_min: DEFAULT_ADV_INTERVAL,
                interval_max: DEFAULT_ADV_INTERVAL,
                kind: AdvertisingKind::ConnectableUndirected,
            },
            readvertise_on_disconnect: true,
            credential_offset: DEFAULT_CREDENTIAL_OFFSET,
            poll_interval: DEFAULT_POLL_INTERVAL,
            provisioning_timeout: None,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            persist_provisioned: true,
            heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
        }
    }
}

impl ProvisioningConfig {
    /// Set the advertised device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Enforce a limit on the wait for BLE credentials.
    pub fn with_provisioning_timeout(mut self, timeout: Duration) -> Self {
        self.provisioning_timeout = Some(timeout);
        self
    }

    /// Set the flash offset of the credential block.
    pub fn with_credential_offset(mut self, offset: u32) -> Self {
        self.credential_offset = offset;
        self
    }

    /// Build the advertisement payload for this configuration. The service
    /// UUID is fixed by the GATT table.
    pub fn advertisement(&self) -> Result<AdvertisementPayload, AdvertisementError> {
        AdvertisementPayload::build(&self.device_name, SERVICE_UUID16)
    }

    /// Check the configuration once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.advertisement().map_err(ConfigError::Advertisement)?;

        let adv = &self.advertising;
        if !ADV_INTERVAL_RANGE.contains(&adv.interval_min)
            || !ADV_INTERVAL_RANGE.contains(&adv.interval_max)
            || adv.interval_min > adv.interval_max
        {
            return Err(ConfigError::AdvertisingInterval {
                min: adv.interval_min,
                max: adv.interval_max,
            });
        }

        if self.credential_offset % SECTOR_SIZE != 0 {
            return Err(ConfigError::UnalignedOffset(self.credential_offset));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroInterval("poll_interval"));
        }
        if self.join_timeout.is_zero() {
            return Err(ConfigError::ZeroInterval("join_timeout"));
        }

        Ok(())
    }
}

/// Invalid provisioning configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Advertisement payload cannot be built.
    Advertisement(AdvertisementError),
    /// Advertising interval out of range or min > max.
    AdvertisingInterval { min: u16, max: u16 },
    /// Credential offset is not sector aligned.
    UnalignedOffset(u32),
    /// A duration that must be non-zero is zero.
    ZeroInterval(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Advertisement(e) => write!(f, "invalid advertisement: {}", e),
            Self::AdvertisingInterval { min, max } => {
                write!(f, "invalid advertising interval: min {} max {}", min, max)
            }
            Self::UnalignedOffset(offset) => {
                write!(f, "credential offset 0x{:X} is not sector aligned", offset)
            }
            Self::ZeroInterval(name) => write!(f, "{} must be non-zero", name),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Advertisement(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ProvisioningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.provisioning_timeout, None);
        assert_eq!(config.join_timeout, Duration::from_millis(5000));
        assert_eq!(config.retry_backoff, Duration::from_millis(5000));
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_name_too_long_for_advertisement() {
        let config = ProvisioningConfig::default().with_device_name("a-very-long-device-name-x");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Advertisement(AdvertisementError::TooLong { .. }))
        ));
    }

    #[test]
    fn test_advertises_gatt_service() {
        let payload = ProvisioningConfig::default().advertisement().unwrap();
        assert_eq!(payload.service_uuid16(), SERVICE_UUID16);
        assert_eq!(payload.name(), DEFAULT_DEVICE_NAME);
    }

    #[test]
    fn test_unaligned_offset() {
        let config = ProvisioningConfig::default().with_credential_offset(0x3F_F100);
        assert_eq!(config.validate(), Err(ConfigError::UnalignedOffset(0x3F_F100)));
    }

    #[test]
    fn test_bad_advertising_interval() {
        let mut config = ProvisioningConfig::default();
        config.advertising.interval_min = 900;
        config.advertising.interval_max = 800;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::AdvertisingInterval { min: 900, max: 800 })
        ));

        config.advertising.interval_min = 0x10;
        config.advertising.interval_max = 0x10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provisioning_timeout_builder() {
        let config = ProvisioningConfig::default().with_provisioning_timeout(DEFAULT_PROVISIONING_TIMEOUT);
        assert_eq!(config.provisioning_timeout, Some(Duration::from_millis(20_000)));
    }

    #[test]
    fn test_zero_poll_interval() {
        let mut config = ProvisioningConfig::default();
        config.poll_interval = Duration::ZERO;
        assert_eq!(config.validate(), Err(ConfigError::ZeroInterval("poll_interval")));
    }
}
