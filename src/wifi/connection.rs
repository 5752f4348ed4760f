//! Network join interface.
//!
//! The supervisor drives any [`NetworkJoin`] implementation; on ESP32 that is
//! [`WifiManager`](super::WifiManager), in tests a scripted fake.

use crate::config::Credential;
use std::fmt;
use std::time::Duration;

/// Access point authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// No password.
    Open,
    /// WPA2 personal (AES/CCMP PSK).
    Wpa2Personal,
}

impl AuthMode {
    /// Mode to use for `credential`.
    pub fn for_credential(credential: &Credential) -> Self {
        if credential.password().is_empty() {
            Self::Open
        } else {
            Self::Wpa2Personal
        }
    }
}

/// Station-mode join primitive.
pub trait NetworkJoin {
    /// Put the interface into station mode.
    fn enable_station_mode(&mut self) -> Result<(), JoinError>;

    /// Associate with the access point, blocking for at most `timeout`.
    fn join_with_timeout(
        &mut self,
        credential: &Credential,
        auth: AuthMode,
        timeout: Duration,
    ) -> Result<(), JoinError>;
}

/// Network association failure. Always recoverable by retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// No association within the timeout.
    Timeout,
    /// Credential cannot be handed to the driver (length limits).
    InvalidCredential,
    /// Access point rejected the association or DHCP failed.
    Rejected(String),
    /// Driver error.
    Driver(String),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "join timed out"),
            Self::InvalidCredential => write!(f, "credential rejected by driver"),
            Self::Rejected(e) => write!(f, "association failed: {}", e),
            Self::Driver(e) => write!(f, "driver error: {}", e),
        }
    }
}

impl std::error::Error for JoinError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_mode_for_credential() {
        let secured = Credential::new("Net", "password").unwrap();
        let open = Credential::new("Net", "").unwrap();
        assert_eq!(AuthMode::for_credential(&secured), AuthMode::Wpa2Personal);
        assert_eq!(AuthMode::for_credential(&open), AuthMode::Open);
    }

    #[test]
    fn test_join_error_display() {
        assert_eq!(JoinError::Timeout.to_string(), "join timed out");
        assert_eq!(
            JoinError::Rejected("auth".into()).to_string(),
            "association failed: auth"
        );
    }
}
