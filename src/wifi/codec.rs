//! Flash block encoding for WiFi credentials.
//!
//! # Block Format
//!
//! ```text
//! [ssid: N][0x00][password: M][0x00][0x00 padding...]   (BLOCK_SIZE bytes)
//! ```
//!
//! No header, checksum or version. A freshly erased block (all `0xFF`) has no
//! separator and decodes as unprovisioned, as does an all-zero block.

use crate::config::Credential;
use std::fmt;

/// Size of one encoded block (one flash program page).
pub const BLOCK_SIZE: usize = 256;

/// Field separator.
pub const SEPARATOR: u8 = 0x00;

/// One encoded credential block.
pub type StorageBlock = [u8; BLOCK_SIZE];

/// Encode an SSID and password into a storage block.
///
/// Fails with [`EncodingError::TooLarge`] exactly when
/// `ssid.len() + password.len() + 2 > BLOCK_SIZE`.
pub fn encode(ssid: &[u8], password: &[u8]) -> Result<StorageBlock, EncodingError> {
    let len = ssid.len() + password.len() + 2;
    if len > BLOCK_SIZE {
        return Err(EncodingError::TooLarge {
            len,
            max: BLOCK_SIZE,
        });
    }
    if ssid.contains(&SEPARATOR) || password.contains(&SEPARATOR) {
        return Err(EncodingError::ContainsSeparator);
    }

    let mut block = [SEPARATOR; BLOCK_SIZE];
    block[..ssid.len()].copy_from_slice(ssid);
    let password_start = ssid.len() + 1;
    block[password_start..password_start + password.len()].copy_from_slice(password);
    Ok(block)
}

/// Encode a credential into a storage block.
pub fn encode_credential(credential: &Credential) -> Result<StorageBlock, EncodingError> {
    encode(credential.ssid().as_bytes(), credential.password().as_bytes())
}

/// Decode a storage block.
///
/// Returns `None` for unprovisioned or malformed content: no first separator,
/// no second separator, both fields empty, or fields that are not UTF-8.
pub fn decode(block: &[u8]) -> Option<Credential> {
    let ssid_end = block.iter().position(|&b| b == SEPARATOR)?;
    let rest = &block[ssid_end + 1..];
    let password_end = rest.iter().position(|&b| b == SEPARATOR)?;

    let ssid = &block[..ssid_end];
    let password = &rest[..password_end];
    if ssid.is_empty() && password.is_empty() {
        return None;
    }

    Credential::from_bytes(ssid, password).ok()
}

/// Errors encoding a credential block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Fields plus two separators do not fit in one block.
    TooLarge { len: usize, max: usize },
    /// A field contains the separator byte.
    ContainsSeparator,
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { len, max } => {
                write!(f, "credential block too large: {} bytes (max {})", len, max)
            }
            Self::ContainsSeparator => write!(f, "credential contains the separator byte"),
        }
    }
}

impl std::error::Error for EncodingError {}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic NUL-free field of the given length.
    fn field(len: usize, seed: u8) -> Vec<u8> {
        (0..len)
            .map(|i| b'!' + ((i as u8).wrapping_mul(7).wrapping_add(seed)) % 90)
            .collect()
    }

    #[test]
    fn test_roundtrip_all_lengths() {
        for ssid_len in 1..=32 {
            for password_len in 1..=63 {
                let ssid = field(ssid_len, 3);
                let password = field(password_len, 11);
                let block = encode(&ssid, &password).unwrap();
                let decoded = decode(&block).expect("decode failed");
                assert_eq!(decoded.ssid().as_bytes(), ssid.as_slice());
                assert_eq!(decoded.password().as_bytes(), password.as_slice());
            }
        }
    }

    #[test]
    fn test_all_zero_block_is_unprovisioned() {
        assert_eq!(decode(&[0u8; BLOCK_SIZE]), None);
    }

    #[test]
    fn test_erased_block_is_unprovisioned() {
        assert_eq!(decode(&[0xFFu8; BLOCK_SIZE]), None);
    }

    #[test]
    fn test_missing_second_separator() {
        let mut block = [b'x'; BLOCK_SIZE];
        block[4] = SEPARATOR;
        assert_eq!(decode(&block), None);
    }

    #[test]
    fn test_empty_ssid_is_representable() {
        let block = encode(b"", b"password").unwrap();
        assert_eq!(block[0], SEPARATOR);
        let decoded = decode(&block).unwrap();
        assert_eq!(decoded.ssid(), "");
        assert_eq!(decoded.password(), "password");
        assert!(!decoded.is_complete());
    }

    #[test]
    fn test_size_boundary() {
        let ssid = vec![b's'; 100];
        let fits = vec![b'p'; BLOCK_SIZE - 100 - 2];
        assert!(encode(&ssid, &fits).is_ok());

        let too_big = vec![b'p'; BLOCK_SIZE - 100 - 1];
        assert_eq!(
            encode(&ssid, &too_big),
            Err(EncodingError::TooLarge {
                len: BLOCK_SIZE + 1,
                max: BLOCK_SIZE
            })
        );
    }

    #[test]
    fn test_separator_rejected() {
        assert_eq!(encode(b"a\0b", b"pw"), Err(EncodingError::ContainsSeparator));
        assert_eq!(encode(b"ab", b"p\0w"), Err(EncodingError::ContainsSeparator));
    }

    #[test]
    fn test_no_zero_before_first_separator() {
        for len in 1..=32 {
            let ssid = field(len, 5);
            let block = encode(&ssid, b"pw").unwrap();
            assert!(block[..len].iter().all(|&b| b != SEPARATOR));
            assert_eq!(block[len], SEPARATOR);
        }
    }

    #[test]
    fn test_layout_and_padding() {
        let block = encode(b"Home-WiFi", b"s3cr3t!").unwrap();
        assert_eq!(&block[..9], b"Home-WiFi");
        assert_eq!(block[9], SEPARATOR);
        assert_eq!(&block[10..17], b"s3cr3t!");
        assert!(block[17..].iter().all(|&b| b == SEPARATOR));
    }

    #[test]
    fn test_non_utf8_is_unprovisioned() {
        let block = encode(&[0xC3, 0x28], b"pw").unwrap();
        assert_eq!(decode(&block), None);
    }

    #[test]
    fn test_encode_credential() {
        let credential = Credential::new("Home-WiFi", "s3cr3t!").unwrap();
        let block = encode_credential(&credential).unwrap();
        assert_eq!(decode(&block), Some(credential));
    }
}
