//! Send WiFi credentials to a provisioning device over BLE.
//!
//! Usage:
//!   cargo run --bin set-credentials -- "MyNetwork" "secret"
//!   cargo run --bin set-credentials -- "MyNetwork" "secret" --device Kitchen-Sensor
//!
//! Scans for devices advertising the provisioning service, connects to the
//! first match, writes the SSID and then the password, and reads back the
//! lengths the device recorded.

#[cfg(not(target_os = "espidf"))]
mod client {
    use ble_wifi_prov::ble::gatt::{self, Characteristic as ProvCharacteristic};
    use ble_wifi_prov::config::Credential;
    use btleplug::api::bleuuid::uuid_from_u16;
    use btleplug::api::{
        Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
    };
    use btleplug::platform::{Adapter, Manager, Peripheral};
    use clap::Parser;
    use log::{debug, info, warn};
    use std::error::Error;
    use std::time::Duration;
    use uuid::Uuid;

    /// Pause after each write so the device's supervisor can poll the value.
    const WRITE_SETTLE: Duration = Duration::from_secs(1);

    #[derive(Parser)]
    #[command(name = "set-credentials")]
    #[command(about = "Provision WiFi credentials to a device over BLE")]
    struct Cli {
        /// Network name
        ssid: String,
        /// Network password
        password: String,
        /// Device name or address to connect to (default: first match)
        #[arg(short, long)]
        device: Option<String>,
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        scan_secs: u64,
    }

    #[tokio::main]
    pub async fn main() -> Result<(), Box<dyn Error>> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

        let cli = Cli::parse();
        let credential = Credential::new(cli.ssid, cli.password)?;
        if !credential.is_complete() {
            return Err("SSID and password must both be non-empty".into());
        }

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or("No Bluetooth adapter found")?;

        let peripheral = find_device(&adapter, cli.device.as_deref(), cli.scan_secs).await?;
        provision(&peripheral, &credential).await
    }

    async fn find_device(
        adapter: &Adapter,
        wanted: Option<&str>,
        scan_secs: u64,
    ) -> Result<Peripheral, Box<dyn Error>> {
        let service: Uuid = uuid_from_u16(gatt::SERVICE_UUID16);
        info!("Scanning for {} seconds...", scan_secs);
        adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;
        tokio::time::sleep(Duration::from_secs(scan_secs)).await;
        adapter.stop_scan().await?;

        for peripheral in adapter.peripherals().await? {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            let name = props.local_name.unwrap_or_default();
            let address = props.address.to_string();
            debug!("Saw {} ({}), services {:?}", name, address, props.services);

            if !props.services.contains(&service) {
                continue;
            }
            let matches = match wanted {
                Some(w) => name == w || address.eq_ignore_ascii_case(w),
                None => true,
            };
            if matches {
                info!("Found device: {} ({})", name, address);
                return Ok(peripheral);
            }
        }

        Err(match wanted {
            Some(w) => format!("Device '{}' not found", w).into(),
            None => "No provisioning device found".into(),
        })
    }

    async fn provision(peripheral: &Peripheral, credential: &Credential) -> Result<(), Box<dyn Error>> {
        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let ssid_char = characteristic(peripheral, ProvCharacteristic::Ssid)?;
        let password_char = characteristic(peripheral, ProvCharacteristic::Password)?;

        info!("Writing SSID '{}'", credential.ssid());
        peripheral
            .write(&ssid_char, credential.ssid().as_bytes(), WriteType::WithResponse)
            .await?;
        tokio::time::sleep(WRITE_SETTLE).await;

        info!("Writing password ({} bytes)", credential.password().len());
        peripheral
            .write(
                &password_char,
                credential.password().as_bytes(),
                WriteType::WithResponse,
            )
            .await?;
        tokio::time::sleep(WRITE_SETTLE).await;

        let ssid_len = peripheral.read(&ssid_char).await?;
        let password_len = peripheral.read(&password_char).await?;
        if ssid_len.first().copied() != Some(credential.ssid().len() as u8)
            || password_len.first().copied() != Some(credential.password().len() as u8)
        {
            warn!(
                "Device reports lengths {:?}/{:?}, expected {}/{}",
                ssid_len,
                password_len,
                credential.ssid().len(),
                credential.password().len()
            );
        } else {
            info!("Device accepted credentials");
        }

        peripheral.disconnect().await?;
        Ok(())
    }

    fn characteristic(
        peripheral: &Peripheral,
        which: ProvCharacteristic,
    ) -> Result<Characteristic, Box<dyn Error>> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| ProvCharacteristic::from_uuid(&c.uuid.hyphenated().to_string()) == Some(which))
            .ok_or_else(|| format!("{} characteristic not found", which.name()).into())
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    client::main()
}

#[cfg(target_os = "espidf")]
fn main() {
    println!("set-credentials runs on the host, not on the device.");
}
