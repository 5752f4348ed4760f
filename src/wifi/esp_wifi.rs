//! ESP-IDF WiFi station driver.
//!
//! Wraps `BlockingWifi<EspWifi>` behind [`NetworkJoin`].

use super::connection::{AuthMode, JoinError, NetworkJoin};
use crate::config::Credential;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
use esp_idf_sys::{EspError, ESP_ERR_TIMEOUT};
use log::{info, warn};
use std::time::Duration;

/// WiFi station manager.
pub struct WifiManager<'a> {
    wifi: BlockingWifi<EspWifi<'a>>,
}

impl<'a> WifiManager<'a> {
    /// Create the driver. `nvs` lets the radio keep its calibration data.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, EspError> {
        let esp_wifi = EspWifi::new(modem, sysloop.clone(), nvs)?;
        let wifi = BlockingWifi::wrap(esp_wifi, sysloop)?;
        Ok(Self { wifi })
    }

    /// Current IP address, if connected.
    pub fn ip(&self) -> Option<String> {
        if !self.wifi.is_connected().unwrap_or(false) {
            return None;
        }
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| format!("{}", info.ip))
    }

    fn disconnect_quietly(&mut self) {
        if let Err(e) = self.wifi.disconnect() {
            warn!("Disconnect after failed join: {:?}", e);
        }
    }
}

impl NetworkJoin for WifiManager<'_> {
    fn enable_station_mode(&mut self) -> Result<(), JoinError> {
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration::default()))
            .map_err(driver_error)?;
        self.wifi.start().map_err(driver_error)?;
        info!("WiFi station mode enabled");
        Ok(())
    }

    fn join_with_timeout(
        &mut self,
        credential: &Credential,
        auth: AuthMode,
        timeout: Duration,
    ) -> Result<(), JoinError> {
        let auth_method = match auth {
            AuthMode::Open => AuthMethod::None,
            AuthMode::Wpa2Personal => AuthMethod::WPA2Personal,
        };

        let client = Configuration::Client(ClientConfiguration {
            ssid: credential
                .ssid()
                .try_into()
                .map_err(|_| JoinError::InvalidCredential)?,
            password: credential
                .password()
                .try_into()
                .map_err(|_| JoinError::InvalidCredential)?,
            auth_method,
            ..Default::default()
        });
        self.wifi.set_configuration(&client).map_err(driver_error)?;

        self.wifi.wifi_mut().connect().map_err(driver_error)?;

        let waited = self.wifi.wifi_wait_while(
            || self.wifi.wifi().is_connected().map(|connected| !connected),
            Some(timeout),
        );
        if let Err(e) = waited {
            self.disconnect_quietly();
            return Err(if e.code() == ESP_ERR_TIMEOUT as i32 {
                JoinError::Timeout
            } else {
                JoinError::Rejected(format!("{:?}", e))
            });
        }

        if let Err(e) = self.wifi.wait_netif_up() {
            self.disconnect_quietly();
            return Err(JoinError::Rejected(format!("DHCP failed: {:?}", e)));
        }

        if let Some(ip) = self.ip() {
            info!("Connected to '{}', IP: {}", credential.ssid(), ip);
        }
        Ok(())
    }
}

fn driver_error(e: EspError) -> JoinError {
    JoinError::Driver(format!("{:?}", e))
}
