//! NimBLE binding for the provisioning session.
//!
//! GATT and GAP callbacks run on the NimBLE host task. They translate into
//! [`RadioEvent`]s and feed the shared [`ProvisioningSession`]; the resulting
//! [`RadioCommand`]s go over a channel to a small radio worker thread, so
//! notifications and advertising changes are never issued from inside a
//! characteristic callback.
//!
//! # Security Considerations
//!
//! The service accepts writes from any connected peer without pairing, and
//! the credentials travel in plaintext at the application layer. Provision
//! devices in a physically controlled environment.

use super::advertisement::{AdvertisingKind, AdvertisingParameters};
use super::gatt::{Characteristic, CCCD_DISABLED, CCCD_NOTIFY, SERVICE_UUID16};
use super::session::{
    Attribute, PendingCredentials, ProvisioningSession, RadioCommand, RadioEvent,
};
use crate::config::ProvisioningConfig;
use esp32_nimble::enums::ConnMode;
use esp32_nimble::utilities::mutex::Mutex as NimbleMutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{
    BLEAdvertisementData, BLECharacteristic, BLEDevice, NimbleProperties, NimbleSub,
};
use log::{debug, error, info};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

type CharacteristicRef = Arc<NimbleMutex<BLECharacteristic>>;

/// Stack size of the radio worker thread.
const RADIO_WORKER_STACK: usize = 4096;

/// Provisioning GATT service running on NimBLE.
pub struct NimbleProvisioning {
    session: Arc<Mutex<ProvisioningSession>>,
    pending: PendingCredentials,
}

impl NimbleProvisioning {
    /// Register the GATT service, start the radio worker and begin advertising.
    pub fn start(config: &ProvisioningConfig) -> Result<Self, NimbleError> {
        let session = ProvisioningSession::new(config);
        let pending = session.pending().clone();
        let session = Arc::new(Mutex::new(session));
        let (tx, rx) = mpsc::channel();
        let dispatcher = Dispatcher {
            session: session.clone(),
            commands: tx,
        };

        let device = BLEDevice::take();
        BLEDevice::set_device_name(&config.device_name)
            .map_err(|e| NimbleError::Ble(format!("{:?}", e)))?;

        let server = device.get_server();
        // The session decides when to re-advertise.
        server.advertise_on_disconnect(false);

        let on_connect = dispatcher.clone();
        server.on_connect(move |_server, desc| {
            on_connect.dispatch(RadioEvent::Connected(desc.conn_handle()));
        });

        let on_disconnect = dispatcher.clone();
        server.on_disconnect(move |_desc, reason| {
            debug!("Disconnect reason: {:?}", reason);
            on_disconnect.dispatch(RadioEvent::Disconnected);
        });

        let service = server.create_service(BleUuid::from_uuid16(SERVICE_UUID16));
        let mut handles = Vec::with_capacity(Characteristic::ALL.len());

        for characteristic in Characteristic::ALL {
            let uuid = BleUuid::from_uuid128_string(characteristic.uuid())
                .map_err(|_| NimbleError::InvalidUuid(characteristic.uuid()))?;
            let handle = service.lock().create_characteristic(
                uuid,
                NimbleProperties::READ | NimbleProperties::WRITE | NimbleProperties::NOTIFY,
            );

            let reader = session.clone();
            handle.lock().on_read(move |value, _desc| {
                let mut buf = [0u8; 1];
                let n = lock(&reader).read(characteristic, 0, &mut buf);
                value.set_value(&buf[..n]);
            });

            // NimBLE reassembles prepared writes, so values arrive whole.
            let writer = dispatcher.clone();
            handle.lock().on_write(move |args| {
                writer.dispatch(RadioEvent::GattWrite {
                    attribute: Attribute::Value(characteristic),
                    offset: 0,
                    data: args.recv_data().to_vec(),
                });
            });

            let subscriber = dispatcher.clone();
            handle.lock().on_subscribe(move |_char, _desc, sub| {
                let cccd = if sub.contains(NimbleSub::NOTIFY) {
                    CCCD_NOTIFY
                } else {
                    CCCD_DISABLED
                };
                subscriber.dispatch(RadioEvent::GattWrite {
                    attribute: Attribute::ClientConfig(characteristic),
                    offset: 0,
                    data: cccd.to_le_bytes().to_vec(),
                });
            });

            handles.push((characteristic, handle));
        }

        let worker = RadioWorker {
            dispatcher: dispatcher.clone(),
            characteristics: handles,
        };
        thread::Builder::new()
            .name("ble-radio".into())
            .stack_size(RADIO_WORKER_STACK)
            .spawn(move || worker.run(rx))
            .map_err(|e| NimbleError::Ble(format!("radio worker: {}", e)))?;

        dispatcher.dispatch(RadioEvent::StackReady);
        info!("BLE provisioning service registered");

        Ok(Self { session, pending })
    }

    /// Shared pending credential buffers.
    pub fn pending(&self) -> PendingCredentials {
        self.pending.clone()
    }

    /// Current session state.
    pub fn state(&self) -> super::SessionState {
        lock(&self.session).state()
    }
}

fn lock(session: &Mutex<ProvisioningSession>) -> MutexGuard<'_, ProvisioningSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Feeds events into the session and queues the resulting commands.
#[derive(Clone)]
struct Dispatcher {
    session: Arc<Mutex<ProvisioningSession>>,
    commands: Sender<RadioCommand>,
}

impl Dispatcher {
    fn dispatch(&self, event: RadioEvent) {
        let commands = lock(&self.session).handle_event(event);
        for command in commands {
            if self.commands.send(command).is_err() {
                error!("Radio worker gone, dropping command");
                return;
            }
        }
    }
}

/// Executes radio commands outside the NimBLE callbacks.
struct RadioWorker {
    dispatcher: Dispatcher,
    characteristics: Vec<(Characteristic, CharacteristicRef)>,
}

impl RadioWorker {
    fn run(self, commands: Receiver<RadioCommand>) {
        for command in commands {
            self.execute(command);
        }
    }

    fn execute(&self, command: RadioCommand) {
        let advertising = BLEDevice::take().get_advertising();

        match command {
            RadioCommand::SetAdvertisementParameters(params) => {
                apply_parameters(&mut advertising.lock(), params);
            }
            RadioCommand::SetAdvertisementPayload(payload) => {
                debug!("Advertisement payload: {:02X?}", payload.as_bytes());
                let result = advertising.lock().set_data(
                    BLEAdvertisementData::new()
                        .name(payload.name())
                        .add_service_uuid(BleUuid::from_uuid16(payload.service_uuid16())),
                );
                if let Err(e) = result {
                    error!("Failed to set advertisement data: {:?}", e);
                }
            }
            RadioCommand::EnableAdvertising(enable) => {
                let mut advertising = advertising.lock();
                let result = if enable {
                    advertising.start()
                } else {
                    advertising.stop()
                };
                match result {
                    Ok(()) => debug!("Advertising {}", if enable { "on" } else { "off" }),
                    Err(e) => error!("Failed to toggle advertising: {:?}", e),
                }
            }
            RadioCommand::Notify {
                characteristic,
                value,
            } => {
                if let Some((_, handle)) = self
                    .characteristics
                    .iter()
                    .find(|(c, _)| *c == characteristic)
                {
                    handle.lock().set_value(&value).notify();
                }
            }
            // NimBLE queues notifications itself; the opportunity is immediate.
            RadioCommand::RequestSendNow => {
                self.dispatcher.dispatch(RadioEvent::SendNowOpportunity);
            }
        }
    }
}

fn apply_parameters(
    advertising: &mut esp32_nimble::BLEAdvertising,
    params: AdvertisingParameters,
) {
    let mode = match params.kind {
        AdvertisingKind::ConnectableUndirected => ConnMode::Und,
        AdvertisingKind::ScannableUndirected | AdvertisingKind::NonConnectable => ConnMode::Non,
    };
    advertising
        .advertisement_type(mode)
        .min_interval(params.interval_min)
        .max_interval(params.interval_max);
}

/// NimBLE setup errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NimbleError {
    /// Stack call failed.
    Ble(String),
    /// Characteristic UUID could not be parsed.
    InvalidUuid(&'static str),
}

impl fmt::Display for NimbleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ble(e) => write!(f, "BLE error: {}", e),
            Self::InvalidUuid(uuid) => write!(f, "invalid UUID: {}", uuid),
        }
    }
}

impl std::error::Error for NimbleError {}
