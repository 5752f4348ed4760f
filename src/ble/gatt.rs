//! GATT layout of the provisioning service.
//!
//! ```text
//! Service 0xFF10: WiFi Provisioning
//! ├── SSID     (Read, Write, Notify) b1829813-e8ec-4621-b9b5-6c1be43fe223
//! └── Password (Read, Write, Notify) 410f5077-9e81-4f3b-b888-bf435174fa58
//! ```
//!
//! Writes carry the raw UTF-8 bytes of the field. Reads and notifications
//! carry a one-byte diagnostic: the length of the pending buffer.

use crate::config::{MAX_PASSWORD_LEN, MAX_SSID_LEN};

/// 16-bit UUID of the provisioning service.
pub const SERVICE_UUID16: u16 = 0xFF10;

/// UUID of the SSID characteristic.
pub const SSID_CHAR_UUID: &str = "b1829813-e8ec-4621-b9b5-6c1be43fe223";

/// UUID of the password characteristic.
pub const PASSWORD_CHAR_UUID: &str = "410f5077-9e81-4f3b-b888-bf435174fa58";

/// Client characteristic configuration value enabling notifications.
pub const CCCD_NOTIFY: u16 = 0x0001;

/// Client characteristic configuration value disabling notifications.
pub const CCCD_DISABLED: u16 = 0x0000;

/// Writable characteristics of the provisioning service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Characteristic {
    Ssid,
    Password,
}

impl Characteristic {
    /// Both characteristics, in notification order.
    pub const ALL: [Characteristic; 2] = [Characteristic::Ssid, Characteristic::Password];

    /// 128-bit UUID string.
    pub fn uuid(self) -> &'static str {
        match self {
            Self::Ssid => SSID_CHAR_UUID,
            Self::Password => PASSWORD_CHAR_UUID,
        }
    }

    /// Maximum accepted value length in bytes.
    pub fn max_len(self) -> usize {
        match self {
            Self::Ssid => MAX_SSID_LEN,
            Self::Password => MAX_PASSWORD_LEN,
        }
    }

    /// Human-readable name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ssid => "SSID",
            Self::Password => "password",
        }
    }

    /// Look up a characteristic by UUID string (case-insensitive).
    pub fn from_uuid(uuid: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.uuid().eq_ignore_ascii_case(uuid))
    }
}

/// Copy `value[offset..]` into `buf`, truncated to `buf.len()`.
///
/// Returns the number of bytes copied; an offset at or past the end copies
/// nothing.
pub fn read_blob(value: &[u8], offset: usize, buf: &mut [u8]) -> usize {
    let Some(rest) = value.get(offset..) else {
        return 0;
    };
    let n = rest.len().min(buf.len());
    buf[..n].copy_from_slice(&rest[..n]);
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_lookup() {
        assert_eq!(
            Characteristic::from_uuid("B1829813-E8EC-4621-B9B5-6C1BE43FE223"),
            Some(Characteristic::Ssid)
        );
        assert_eq!(
            Characteristic::from_uuid(PASSWORD_CHAR_UUID),
            Some(Characteristic::Password)
        );
        // Hyphenated lowercase, as host BLE stacks print discovered UUIDs.
        assert_eq!(
            Characteristic::from_uuid("410f5077-9e81-4f3b-b888-bf435174fa58"),
            Some(Characteristic::Password)
        );
        assert_eq!(Characteristic::from_uuid("0000ff10-0000-1000-8000-00805f9b34fb"), None);
    }

    #[test]
    fn test_max_len() {
        assert_eq!(Characteristic::Ssid.max_len(), 32);
        assert_eq!(Characteristic::Password.max_len(), 63);
    }

    #[test]
    fn test_read_blob() {
        let value = b"hello world";
        let mut buf = [0u8; 5];

        assert_eq!(read_blob(value, 0, &mut buf), 5);
        assert_eq!(&buf, b"hello");

        assert_eq!(read_blob(value, 6, &mut buf), 5);
        assert_eq!(&buf, b"world");

        assert_eq!(read_blob(value, 9, &mut buf), 2);
        assert_eq!(&buf[..2], b"ld");

        assert_eq!(read_blob(value, 11, &mut buf), 0);
        assert_eq!(read_blob(value, 50, &mut buf), 0);
    }
}
