//! Device configuration.
//!
//! # Components
//!
//! - [`Credential`] - WiFi SSID/password pair (host-testable)
//! - [`ProvisioningConfig`] - timing, advertising and flash layout settings

mod credential;
mod provisioning;

pub use credential::{Credential, CredentialError, MAX_PASSWORD_LEN, MAX_SSID_LEN};
pub use provisioning::{
    ConfigError, ProvisioningConfig, DEFAULT_ADV_INTERVAL, DEFAULT_CREDENTIAL_OFFSET,
    DEFAULT_DEVICE_NAME, DEFAULT_HEARTBEAT_PERIOD, DEFAULT_JOIN_TIMEOUT, DEFAULT_POLL_INTERVAL,
    DEFAULT_PROVISIONING_TIMEOUT, DEFAULT_RETRY_BACKOFF,
};
