//! On-device TAP test runner.
//!
//! Runs every `#[tap_test]` and prints TAP over the console. Set `TAP_FILTER`
//! at build time to run a subset.
//!
//! ```bash
//! # Harness self-tests on the host
//! cargo run --bin device-tests --no-default-features --features tap-tests
//!
//! # Flash driver and store on hardware
//! TAP_FILTER=esp_flash cargo espflash flash --bin device-tests --features esp32,tap-tests --release --monitor
//! ```

#[cfg(feature = "esp32")]
use esp_idf_svc::sys as _;

fn main() {
    #[cfg(feature = "esp32")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();
    }

    let success = ble_wifi_prov::testing::run_matching(option_env!("TAP_FILTER"));

    #[cfg(feature = "esp32")]
    {
        log::info!("Tests complete ({}). Halting.", if success { "pass" } else { "fail" });
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1));
        }
    }

    #[cfg(not(feature = "esp32"))]
    std::process::exit(if success { 0 } else { 1 });
}
