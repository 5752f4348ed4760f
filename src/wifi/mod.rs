//! WiFi credential persistence and network join.
//!
//! # Components
//!
//! - [`codec`] - fixed-size storage block encoding
//! - [`flash`] - flash driver interface and in-memory driver
//! - [`storage`] - single-credential flash store
//! - [`connection`] - network join interface
//! - [`supervisor`] - boot-time join procedure
//! - `esp_flash`, `esp_wifi` - ESP-IDF drivers (ESP32 only)
//!
//! Credential types and limits live in [`crate::config`].

pub mod codec;
pub mod connection;
#[cfg(feature = "esp32")]
mod esp_flash;
#[cfg(feature = "esp32")]
mod esp_wifi;
pub mod flash;
pub mod storage;
pub mod supervisor;

pub use codec::{decode, encode, encode_credential, EncodingError, StorageBlock, BLOCK_SIZE};
pub use connection::{AuthMode, JoinError, NetworkJoin};
#[cfg(feature = "esp32")]
pub use esp_flash::EspFlash;
#[cfg(feature = "esp32")]
pub use esp_wifi::WifiManager;
pub use flash::{
    check_region, FlashDriver, FlashRegion, MemoryFlash, MemoryFlashError, RegionError, PAGE_SIZE,
    SECTOR_SIZE,
};
pub use storage::{CredentialStore, StorageError};
pub use supervisor::{ConnectionAttempt, ConnectionSupervisor, CredentialSource, SupervisorError};
