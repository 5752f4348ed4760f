//! BLE WiFi provisioning for headless ESP32 devices.
//!
//! A phone or laptop writes the SSID and password to a GATT service; the
//! device stores them in one flash block and joins the network on every boot,
//! retrying until it succeeds.
//!
//! Everything except the ESP-IDF adapters (`esp32` feature) is
//! platform-independent and tested on the host.

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as ble_wifi_prov;

pub mod ble;
pub mod config;
pub mod delay;
pub mod heartbeat;
#[cfg(feature = "tap-tests")]
pub mod testing;
pub mod wifi;

// Re-export commonly used items
pub use ble::{PendingCredentials, ProvisioningSession, RadioCommand, RadioEvent};
pub use config::{Credential, ProvisioningConfig};
pub use delay::{Delay, ThreadDelay};
pub use heartbeat::{Heartbeat, StatusLed};
pub use wifi::{ConnectionSupervisor, CredentialStore, FlashDriver, NetworkJoin};

#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;
