//! BLE WiFi provisioning firmware.
//!
//! Boot sequence: heartbeat LED, BLE provisioning service, then the connection
//! supervisor (stored credentials first, otherwise wait for BLE). Once online
//! the device idles with the BLE service still available.
//!
//! Build-time overrides:
//!
//! ```bash
//! PROV_DEVICE_NAME="Kitchen-Sensor" cargo build --release
//! PROV_FORCE_REPROVISION=1 cargo build --release   # erase stored credentials on boot
//! PROV_ENFORCE_TIMEOUT=1 cargo build --release     # give up waiting for BLE after 20 s
//! ```

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    // Initialize ESP-IDF logger for log crate integration
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("=== BLE WiFi provisioning starting ===");

    if let Err(e) = firmware::run() {
        log::error!("Fatal: {}", e);
    }

    log::error!("Halted");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

#[cfg(feature = "esp32")]
mod firmware {
    use ble_wifi_prov::ble::NimbleProvisioning;
    use ble_wifi_prov::config::DEFAULT_PROVISIONING_TIMEOUT;
    use ble_wifi_prov::heartbeat::GpioLed;
    use ble_wifi_prov::wifi::{check_region, EspFlash, WifiManager};
    use ble_wifi_prov::{
        ConnectionSupervisor, CredentialStore, Heartbeat, ProvisioningConfig, ThreadDelay,
    };
    use esp_idf_hal::gpio::PinDriver;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{info, warn};
    use std::error::Error;
    use std::thread;
    use std::time::Duration;

    const HEARTBEAT_STACK: usize = 2048;
    const STATUS_INTERVAL: Duration = Duration::from_secs(60);

    fn config() -> ProvisioningConfig {
        let mut config = ProvisioningConfig::default();
        if let Some(name) = option_env!("PROV_DEVICE_NAME") {
            config = config.with_device_name(name);
        }
        if option_env!("PROV_ENFORCE_TIMEOUT").is_some() {
            config = config.with_provisioning_timeout(DEFAULT_PROVISIONING_TIMEOUT);
        }
        config
    }

    pub fn run() -> Result<(), Box<dyn Error>> {
        let config = config();
        config.validate()?;

        let peripherals = Peripherals::take()?;
        let sysloop = EspSystemEventLoop::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        let led = GpioLed::new(PinDriver::output(peripherals.pins.gpio2)?);
        let period = config.heartbeat_period;
        thread::Builder::new()
            .name("heartbeat".into())
            .stack_size(HEARTBEAT_STACK)
            .spawn(move || Heartbeat::new(led).run(ThreadDelay, period))?;

        let provisioning = NimbleProvisioning::start(&config)?;

        let flash = EspFlash::new();
        check_region(config.credential_offset, flash.chip_size()?, &flash.partitions())?;
        let mut store = CredentialStore::new(flash, config.credential_offset);
        if option_env!("PROV_FORCE_REPROVISION").is_some() {
            warn!("PROV_FORCE_REPROVISION set, erasing stored credentials");
            store.clear()?;
        }

        let wifi = WifiManager::new(peripherals.modem, sysloop, Some(nvs))?;
        let mut supervisor = ConnectionSupervisor::new(
            store,
            provisioning.pending(),
            wifi,
            ThreadDelay,
            &config,
        );

        let attempt = supervisor.run()?;
        info!(
            "Online after {} attempt(s) using {:?} credentials",
            attempt.attempt, attempt.source
        );

        let wifi = supervisor.into_network();
        loop {
            thread::sleep(STATUS_INTERVAL);
            match wifi.ip() {
                Some(ip) => info!("Status: connected, IP {}, BLE {:?}", ip, provisioning.state()),
                None => warn!("Status: WiFi link lost"),
            }
        }
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Use 'cargo test --no-default-features' for host testing.");
}
