//! Server-side provisioning state machine for one BLE client.
//!
//! The session never touches the radio. The platform adapter feeds it
//! [`RadioEvent`]s and executes the [`RadioCommand`]s it returns, which keeps
//! the whole exchange testable on the host.
//!
//! ```text
//! Idle ──StackReady──▶ Advertising ──Connected──▶ Connected ◀──CCCD 0──┐
//!                          ▲                          │                 │
//!                          │                       CCCD 1               │
//!                          │                          ▼                 │
//!                          └──────Disconnected──── Subscribed ──────────┘
//! ```
//!
//! Accepted SSID and password writes land in [`PendingCredentials`], a shared
//! handle the connection supervisor polls from another task.

use super::advertisement::{AdvertisementPayload, AdvertisingParameters};
use super::gatt::{read_blob, Characteristic, CCCD_DISABLED, CCCD_NOTIFY, SERVICE_UUID16};
use crate::config::{Credential, ProvisioningConfig};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use zeroize::{Zeroize, Zeroizing};

/// Radio-assigned connection handle.
pub type ConnectionHandle = u16;

/// Lifecycle of the provisioning session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Radio stack not ready yet.
    Idle,
    /// Advertising, no client.
    Advertising,
    /// Client connected, notifications off.
    Connected,
    /// Client connected with notifications on.
    Subscribed,
    /// Client left and re-advertising is disabled.
    Disconnected,
}

/// GATT attribute targeted by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    /// Characteristic value.
    Value(Characteristic),
    /// Client characteristic configuration descriptor of a characteristic.
    ClientConfig(Characteristic),
}

/// Events delivered by the radio adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Host stack finished initialization.
    StackReady,
    /// A client connected.
    Connected(ConnectionHandle),
    /// The client disconnected.
    Disconnected,
    /// The stack can accept a notification now.
    SendNowOpportunity,
    /// The client wrote to an attribute.
    GattWrite {
        attribute: Attribute,
        offset: usize,
        data: Vec<u8>,
    },
}

/// Commands for the radio adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    SetAdvertisementParameters(AdvertisingParameters),
    SetAdvertisementPayload(AdvertisementPayload),
    EnableAdvertising(bool),
    Notify {
        characteristic: Characteristic,
        value: Vec<u8>,
    },
    /// Ask the stack for a [`RadioEvent::SendNowOpportunity`].
    RequestSendNow,
}

/// Rejected characteristic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// Resulting value exceeds the characteristic's maximum length.
    TooLong { len: usize, max: usize },
    /// Payload contains a NUL byte.
    ContainsNul,
    /// Payload is not valid UTF-8.
    InvalidUtf8,
    /// Long-write fragment does not continue the current value.
    UnexpectedOffset { offset: usize, expected: usize },
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLong { len, max } => write!(f, "value too long: {} > {} bytes", len, max),
            Self::ContainsNul => write!(f, "value contains NUL byte"),
            Self::InvalidUtf8 => write!(f, "value is not valid UTF-8"),
            Self::UnexpectedOffset { offset, expected } => {
                write!(f, "unexpected write offset {} (expected 0 or {})", offset, expected)
            }
        }
    }
}

impl std::error::Error for WriteError {}

#[derive(Default)]
struct Buffers {
    ssid: Vec<u8>,
    password: Vec<u8>,
}

impl Buffers {
    fn get(&self, characteristic: Characteristic) -> &Vec<u8> {
        match characteristic {
            Characteristic::Ssid => &self.ssid,
            Characteristic::Password => &self.password,
        }
    }

    fn get_mut(&mut self, characteristic: Characteristic) -> &mut Vec<u8> {
        match characteristic {
            Characteristic::Ssid => &mut self.ssid,
            Characteristic::Password => &mut self.password,
        }
    }
}

impl Drop for Buffers {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

/// Shared handle to the SSID and password received over BLE.
///
/// Cloning is cheap; all clones see the same buffers. Only the session
/// writes. Each write swaps the whole buffer under the lock, so readers never
/// see a half-copied value.
#[derive(Clone, Default)]
pub struct PendingCredentials {
    inner: Arc<Mutex<Buffers>>,
}

impl PendingCredentials {
    /// Create empty buffers.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the pending SSID.
    pub fn ssid(&self) -> String {
        String::from_utf8_lossy(&self.lock().ssid).into_owned()
    }

    /// Snapshot of the pending password, zeroized on drop.
    pub fn password(&self) -> Zeroizing<String> {
        Zeroizing::new(String::from_utf8_lossy(&self.lock().password).into_owned())
    }

    /// Length of a pending buffer in bytes.
    pub fn len(&self, characteristic: Characteristic) -> usize {
        self.lock().get(characteristic).len()
    }

    /// True once both buffers are non-empty.
    pub fn is_complete(&self) -> bool {
        let buffers = self.lock();
        !buffers.ssid.is_empty() && !buffers.password.is_empty()
    }

    /// Both buffers as a credential, if complete and valid.
    pub fn credential(&self) -> Option<Credential> {
        let buffers = self.lock();
        if buffers.ssid.is_empty() || buffers.password.is_empty() {
            return None;
        }
        Credential::from_bytes(&buffers.ssid, &buffers.password).ok()
    }

    /// Drop both buffers, zeroizing the password.
    pub fn clear(&self) {
        let mut buffers = self.lock();
        buffers.ssid.clear();
        buffers.password.zeroize();
    }

    /// Apply a characteristic write.
    ///
    /// Offset 0 replaces the value. A non-zero offset must equal the current
    /// length and appends (long write). Returns the new length.
    pub(crate) fn write(
        &self,
        characteristic: Characteristic,
        offset: usize,
        data: &[u8],
    ) -> Result<usize, WriteError> {
        if data.contains(&0) {
            return Err(WriteError::ContainsNul);
        }

        let mut buffers = self.lock();
        let current = buffers.get_mut(characteristic);

        if offset != 0 && offset != current.len() {
            return Err(WriteError::UnexpectedOffset {
                offset,
                expected: current.len(),
            });
        }

        let len = offset + data.len();
        let max = characteristic.max_len();
        if len > max {
            return Err(WriteError::TooLong { len, max });
        }

        let mut value = Vec::with_capacity(len);
        value.extend_from_slice(&current[..offset]);
        value.extend_from_slice(data);

        // Only a long-write continuation may leave a character split at the
        // tail; the next fragment completes it. A replacing write must be whole.
        if let Err(e) = std::str::from_utf8(&value) {
            if offset == 0 || e.error_len().is_some() {
                value.zeroize();
                return Err(WriteError::InvalidUtf8);
            }
        }

        current.zeroize();
        *current = value;
        Ok(len)
    }
}

impl fmt::Debug for PendingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let buffers = self.lock();
        f.debug_struct("PendingCredentials")
            .field("ssid", &String::from_utf8_lossy(&buffers.ssid))
            .field("password_len", &buffers.password.len())
            .finish()
    }
}

/// Provisioning state machine.
pub struct ProvisioningSession {
    state: SessionState,
    connection: Option<ConnectionHandle>,
    notifications_enabled: bool,
    pending: PendingCredentials,
    device_name: String,
    advertising: AdvertisingParameters,
    readvertise_on_disconnect: bool,
}

impl ProvisioningSession {
    /// Create a session with fresh, empty pending buffers.
    pub fn new(config: &ProvisioningConfig) -> Self {
        Self::with_pending(config, PendingCredentials::new())
    }

    /// Create a session writing into an existing pending handle.
    pub fn with_pending(config: &ProvisioningConfig, pending: PendingCredentials) -> Self {
        Self {
            state: SessionState::Idle,
            connection: None,
            notifications_enabled: false,
            pending,
            device_name: config.device_name.clone(),
            advertising: config.advertising,
            readvertise_on_disconnect: config.readvertise_on_disconnect,
        }
    }

    /// Advance the state machine and return the radio commands to execute,
    /// in order.
    pub fn handle_event(&mut self, event: RadioEvent) -> Vec<RadioCommand> {
        match event {
            RadioEvent::StackReady => self.on_stack_ready(),
            RadioEvent::Connected(handle) => self.on_connected(handle),
            RadioEvent::Disconnected => self.on_disconnected(),
            RadioEvent::SendNowOpportunity => self.on_send_now(),
            RadioEvent::GattWrite {
                attribute,
                offset,
                data,
            } => self.on_write(attribute, offset, &data),
        }
    }

    fn on_stack_ready(&mut self) -> Vec<RadioCommand> {
        if !matches!(self.state, SessionState::Idle | SessionState::Disconnected) {
            debug!("Stack ready in state {:?}, ignoring", self.state);
            return Vec::new();
        }

        let payload = match AdvertisementPayload::build(&self.device_name, SERVICE_UUID16) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot advertise as '{}': {}", self.device_name, e);
                return Vec::new();
            }
        };

        info!(
            "Advertising as '{}' (service 0x{:04X})",
            self.device_name, SERVICE_UUID16
        );
        self.state = SessionState::Advertising;
        vec![
            RadioCommand::SetAdvertisementParameters(self.advertising),
            RadioCommand::SetAdvertisementPayload(payload),
            RadioCommand::EnableAdvertising(true),
        ]
    }

    fn on_connected(&mut self, handle: ConnectionHandle) -> Vec<RadioCommand> {
        info!("Client connected (handle {})", handle);
        self.connection = Some(handle);
        self.notifications_enabled = false;
        self.state = SessionState::Connected;
        Vec::new()
    }

    fn on_disconnected(&mut self) -> Vec<RadioCommand> {
        info!("Client disconnected");
        self.connection = None;
        self.notifications_enabled = false;

        if self.readvertise_on_disconnect {
            self.state = SessionState::Advertising;
            vec![RadioCommand::EnableAdvertising(true)]
        } else {
            self.state = SessionState::Disconnected;
            Vec::new()
        }
    }

    fn on_send_now(&mut self) -> Vec<RadioCommand> {
        if !self.notifications_enabled {
            return Vec::new();
        }
        Characteristic::ALL
            .into_iter()
            .map(|characteristic| RadioCommand::Notify {
                characteristic,
                value: vec![self.diagnostic_value(characteristic)],
            })
            .collect()
    }

    fn on_write(&mut self, attribute: Attribute, offset: usize, data: &[u8]) -> Vec<RadioCommand> {
        if self.connection.is_none() {
            warn!("Write to {:?} without a connection, ignoring", attribute);
            return Vec::new();
        }

        match attribute {
            Attribute::ClientConfig(characteristic) => self.on_client_config(characteristic, data),
            Attribute::Value(characteristic) => {
                match self.pending.write(characteristic, offset, data) {
                    Ok(len) => {
                        info!("{} updated ({} bytes)", characteristic.name(), len);
                        vec![RadioCommand::RequestSendNow]
                    }
                    Err(e) => {
                        warn!("{} write rejected: {}", characteristic.name(), e);
                        Vec::new()
                    }
                }
            }
        }
    }

    fn on_client_config(&mut self, characteristic: Characteristic, data: &[u8]) -> Vec<RadioCommand> {
        let value = match data {
            [lo, hi] => u16::from_le_bytes([*lo, *hi]),
            _ => {
                warn!("Malformed CCCD write ({} bytes)", data.len());
                return Vec::new();
            }
        };

        match value {
            CCCD_NOTIFY => {
                debug!("Notifications enabled via {}", characteristic.name());
                self.notifications_enabled = true;
                self.state = SessionState::Subscribed;
                vec![RadioCommand::RequestSendNow]
            }
            CCCD_DISABLED => {
                debug!("Notifications disabled via {}", characteristic.name());
                self.notifications_enabled = false;
                self.state = SessionState::Connected;
                Vec::new()
            }
            other => {
                warn!("Unsupported CCCD value 0x{:04X}", other);
                Vec::new()
            }
        }
    }

    /// Diagnostic value served for reads and notifications: the pending
    /// buffer length.
    pub fn diagnostic_value(&self, characteristic: Characteristic) -> u8 {
        // Lengths are bounded by max_len (<= 63).
        self.pending.len(characteristic) as u8
    }

    /// Serve a (possibly partial) read of a characteristic.
    pub fn read(&self, characteristic: Characteristic, offset: usize, buf: &mut [u8]) -> usize {
        read_blob(&[self.diagnostic_value(characteristic)], offset, buf)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle of the connected client.
    pub fn connection(&self) -> Option<ConnectionHandle> {
        self.connection
    }

    /// Whether the client enabled notifications.
    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    /// Shared pending buffers.
    pub fn pending(&self) -> &PendingCredentials {
        &self.pending
    }
}
