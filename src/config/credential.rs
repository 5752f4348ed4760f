//! WiFi credential type.
//!
//! Platform-independent, host-testable. A [`Credential`] never contains a NUL
//! byte, which is what lets the flash codec use NUL as its field separator.
//!
//! # Example
//!
//! ```
//! use ble_wifi_prov::config::Credential;
//!
//! let credential = Credential::new("Home-WiFi", "s3cr3t!").unwrap();
//! assert!(credential.is_complete());
//! assert_eq!(credential.ssid(), "Home-WiFi");
//! ```

use std::fmt;
use zeroize::Zeroize;

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum WPA2 passphrase length.
pub const MAX_PASSWORD_LEN: usize = 63;

/// SSID and password pair used to join an access point.
///
/// Either field may be empty at the type level (an empty SSID is
/// representable in flash); only a [complete](Credential::is_complete)
/// credential is ever used for a join. The password is zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    ssid: String,
    password: String,
}

impl Credential {
    /// Create a credential, checking lengths and the no-NUL invariant.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, CredentialError> {
        let credential = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        credential.validate()?;
        Ok(credential)
    }

    /// Create a credential from raw bytes received over the air or read from flash.
    pub fn from_bytes(ssid: &[u8], password: &[u8]) -> Result<Self, CredentialError> {
        let ssid = std::str::from_utf8(ssid).map_err(|_| CredentialError::InvalidUtf8)?;
        let password = std::str::from_utf8(password).map_err(|_| CredentialError::InvalidUtf8)?;
        Self::new(ssid, password)
    }

    /// Validate field lengths and the absence of NUL bytes.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(CredentialError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(CredentialError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }
        if self.ssid.contains('\0') || self.password.contains('\0') {
            return Err(CredentialError::ContainsNul);
        }
        Ok(())
    }

    /// Network SSID.
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Network password.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Both SSID and password are non-empty.
    pub fn is_complete(&self) -> bool {
        !self.ssid.is_empty() && !self.password.is_empty()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

// Never print the password, only its length.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("ssid", &self.ssid)
            .field("password_len", &self.password.len())
            .finish()
    }
}

/// Errors raised while building a [`Credential`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
    /// A field contains the NUL separator byte.
    ContainsNul,
    /// A field is not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
            Self::ContainsNul => write!(f, "credential contains a NUL byte"),
            Self::InvalidUtf8 => write!(f, "credential is not valid UTF-8"),
        }
    }
}

impl std::error::Error for CredentialError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_credential() {
        let credential = Credential::new("TestNetwork", "password123").unwrap();
        assert_eq!(credential.ssid(), "TestNetwork");
        assert_eq!(credential.password(), "password123");
        assert!(credential.is_complete());
    }

    #[test]
    fn test_empty_fields_are_incomplete() {
        assert!(!Credential::new("", "password").unwrap().is_complete());
        assert!(!Credential::new("Net", "").unwrap().is_complete());
    }

    #[test]
    fn test_ssid_max_length() {
        assert!(Credential::new("a".repeat(32), "pw").is_ok());
        assert_eq!(
            Credential::new("a".repeat(33), "pw"),
            Err(CredentialError::SsidTooLong { len: 33, max: 32 })
        );
    }

    #[test]
    fn test_password_max_length() {
        assert!(Credential::new("Net", "p".repeat(63)).is_ok());
        assert!(matches!(
            Credential::new("Net", "p".repeat(64)),
            Err(CredentialError::PasswordTooLong { len: 64, .. })
        ));
    }

    #[test]
    fn test_nul_rejected() {
        assert_eq!(
            Credential::new("Ne\0t", "pw"),
            Err(CredentialError::ContainsNul)
        );
        assert_eq!(
            Credential::new("Net", "p\0w"),
            Err(CredentialError::ContainsNul)
        );
    }

    #[test]
    fn test_from_bytes_invalid_utf8() {
        let result = Credential::from_bytes(&[0xC3, 0x28], b"pw");
        assert_eq!(result, Err(CredentialError::InvalidUtf8));
    }

    #[test]
    fn test_debug_hides_password() {
        let credential = Credential::new("Home-WiFi", "s3cr3t!").unwrap();
        let debug_str = format!("{:?}", credential);
        assert!(debug_str.contains("Home-WiFi"));
        assert!(!debug_str.contains("s3cr3t!"));
        assert!(debug_str.contains("password_len: 7"));
    }
}
