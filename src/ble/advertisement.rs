//! BLE advertisement payload and parameters.
//!
//! The payload is a sequence of AD structures (`[len][type][data...]`):
//!
//! ```text
//! [0x02][0x01 Flags][0x06]
//! [n+1 ][0x09 Complete Local Name][name bytes...]
//! [0x03][0x03 Complete 16-bit Service UUIDs][uuid lo][uuid hi]
//! ```
//!
//! Legacy advertising carries at most 31 bytes, checked once at startup.

use std::fmt;

/// Maximum legacy advertising payload length.
pub const MAX_ADVERTISEMENT_LEN: usize = 31;

/// LE General Discoverable, BR/EDR not supported.
pub const FLAGS_GENERAL_DISCOVERABLE: u8 = 0x06;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_COMPLETE_16BIT_UUIDS: u8 = 0x03;
const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;

/// Advertising PDU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingKind {
    /// ADV_IND: connectable, scannable, undirected.
    ConnectableUndirected,
    /// ADV_SCAN_IND: scannable, not connectable.
    ScannableUndirected,
    /// ADV_NONCONN_IND: beacon only.
    NonConnectable,
}

/// Advertising interval and type, intervals in units of 0.625 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingParameters {
    pub interval_min: u16,
    pub interval_max: u16,
    pub kind: AdvertisingKind,
}

/// Encoded advertisement payload, guaranteed to fit in one legacy PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementPayload {
    bytes: Vec<u8>,
    name: String,
    service_uuid16: u16,
}

impl AdvertisementPayload {
    /// Encode flags, device name and the 16-bit service UUID.
    pub fn build(name: &str, service_uuid16: u16) -> Result<Self, AdvertisementError> {
        if name.is_empty() {
            return Err(AdvertisementError::EmptyName);
        }

        let len = 3 + (2 + name.len()) + 4;
        if len > MAX_ADVERTISEMENT_LEN {
            return Err(AdvertisementError::TooLong {
                len,
                max: MAX_ADVERTISEMENT_LEN,
            });
        }

        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(&[0x02, AD_TYPE_FLAGS, FLAGS_GENERAL_DISCOVERABLE]);
        bytes.push((name.len() + 1) as u8);
        bytes.push(AD_TYPE_COMPLETE_LOCAL_NAME);
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(&[0x03, AD_TYPE_COMPLETE_16BIT_UUIDS]);
        bytes.extend_from_slice(&service_uuid16.to_le_bytes());

        Ok(Self {
            bytes,
            name: name.to_string(),
            service_uuid16,
        })
    }

    /// Raw AD structures.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Advertised device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advertised 16-bit service UUID.
    pub fn service_uuid16(&self) -> u16 {
        self.service_uuid16
    }
}

/// Errors building an advertisement payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertisementError {
    /// Device name is empty.
    EmptyName,
    /// Encoded payload does not fit in a legacy advertising PDU.
    TooLong { len: usize, max: usize },
}

impl fmt::Display for AdvertisementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "device name cannot be empty"),
            Self::TooLong { len, max } => {
                write!(f, "advertisement too long: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for AdvertisementError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_layout() {
        let payload = AdvertisementPayload::build("Prov", 0xFF10).unwrap();
        assert_eq!(
            payload.as_bytes(),
            &[0x02, 0x01, 0x06, 0x05, 0x09, b'P', b'r', b'o', b'v', 0x03, 0x03, 0x10, 0xFF]
        );
        assert_eq!(payload.name(), "Prov");
        assert_eq!(payload.service_uuid16(), 0xFF10);
    }

    #[test]
    fn test_longest_name_fits() {
        // 3 (flags) + 2 + 22 (name) + 4 (uuid) = 31
        let name = "Pico 00:00:00:00:00:00";
        let payload = AdvertisementPayload::build(name, 0xFF10).unwrap();
        assert_eq!(payload.as_bytes().len(), MAX_ADVERTISEMENT_LEN);
    }

    #[test]
    fn test_name_too_long() {
        let name = "a".repeat(23);
        assert_eq!(
            AdvertisementPayload::build(&name, 0xFF10),
            Err(AdvertisementError::TooLong { len: 32, max: 31 })
        );
    }

    #[test]
    fn test_empty_name() {
        assert_eq!(
            AdvertisementPayload::build("", 0xFF10),
            Err(AdvertisementError::EmptyName)
        );
    }
}
