//! Flash persistence for WiFi credentials.
//!
//! One [`BLOCK_SIZE`] block at a fixed, sector-aligned offset holds the
//! encoded credential. Saving erases the sector and programs the block inside
//! the driver's exclusive scope; loading reads the block back and decodes it.
//! There is no wear leveling, versioning or multi-block atomicity.

use super::codec::{self, EncodingError, BLOCK_SIZE};
use super::flash::FlashDriver;
use crate::config::Credential;
use log::{debug, info, warn};
use std::fmt;

/// Durable store for a single credential.
pub struct CredentialStore<F> {
    flash: F,
    offset: u32,
}

impl<F: FlashDriver> CredentialStore<F> {
    /// Create a store for the block at `offset`.
    pub fn new(flash: F, offset: u32) -> Self {
        Self { flash, offset }
    }

    /// Encode and persist `credential`, replacing any previous one.
    ///
    /// Failures are fatal for the current boot; no partial-write recovery is
    /// attempted.
    pub fn save(&mut self, credential: &Credential) -> Result<(), StorageError> {
        let block = codec::encode_credential(credential)?;
        let offset = self.offset;

        self.flash.exclusive(|flash| {
            flash
                .erase_sector(offset)
                .map_err(|e| StorageError::EraseFailed(e.to_string()))?;
            flash
                .program_page(offset, &block)
                .map_err(|e| StorageError::ProgramFailed(e.to_string()))
        })?;

        info!(
            "Saved credentials for '{}' at 0x{:X}",
            credential.ssid(),
            offset
        );
        Ok(())
    }

    /// Load the stored credential.
    ///
    /// Returns `None` if the block is unprovisioned, malformed or unreadable.
    pub fn load(&self) -> Option<Credential> {
        let mut block = [0u8; BLOCK_SIZE];
        if let Err(e) = self.flash.read_region(self.offset, &mut block) {
            warn!("Failed to read credential block at 0x{:X}: {}", self.offset, e);
            return None;
        }

        match codec::decode(&block) {
            Some(credential) => {
                debug!("Loaded credentials for '{}'", credential.ssid());
                Some(credential)
            }
            None => {
                debug!("No stored credentials at 0x{:X}", self.offset);
                None
            }
        }
    }

    /// Erase the stored credential so the next boot provisions over BLE.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        let offset = self.offset;
        self.flash.exclusive(|flash| {
            flash
                .erase_sector(offset)
                .map_err(|e| StorageError::EraseFailed(e.to_string()))
        })?;
        warn!("Stored credentials cleared");
        Ok(())
    }

    /// Borrow the flash driver.
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Mutably borrow the flash driver.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }
}

/// Credential persistence errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Credential cannot be encoded into one block.
    Encoding(EncodingError),
    /// Sector erase failed.
    EraseFailed(String),
    /// Page program failed.
    ProgramFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding(e) => write!(f, "encoding failed: {}", e),
            Self::EraseFailed(e) => write!(f, "flash erase failed: {}", e),
            Self::ProgramFailed(e) => write!(f, "flash program failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encoding(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EncodingError> for StorageError {
    fn from(e: EncodingError) -> Self {
        Self::Encoding(e)
    }
}
