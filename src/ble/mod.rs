//! BLE provisioning components.
//!
//! - [`advertisement`] builds the legacy advertising payload
//! - [`gatt`] describes the provisioning service layout
//! - [`session`] is the radio-independent provisioning state machine
//! - `nimble` binds the session to the ESP32 NimBLE stack (ESP32 only)

pub mod advertisement;
pub mod gatt;
#[cfg(feature = "esp32")]
mod nimble;
pub mod session;

pub use advertisement::{
    AdvertisementError, AdvertisementPayload, AdvertisingKind, AdvertisingParameters,
    MAX_ADVERTISEMENT_LEN,
};
pub use gatt::{Characteristic, SERVICE_UUID16};
#[cfg(feature = "esp32")]
pub use nimble::{NimbleProvisioning, NimbleError};
pub use session::{
    Attribute, ConnectionHandle, PendingCredentials, ProvisioningSession, RadioCommand,
    RadioEvent, SessionState, WriteError,
};
