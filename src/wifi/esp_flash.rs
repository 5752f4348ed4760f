//! ESP-IDF flash driver.
//!
//! Uses the raw `esp_flash_*` API on the default (boot) flash chip. Each call
//! suspends the caches and the other core while the chip is busy, so code
//! running from flash never observes a half-erased part.
//!
//! The credential sector must lie outside every partition (by default the last
//! sector of a 4 MiB chip, past the end of the stock tables). Custom partition
//! tables must leave that sector free; the firmware checks this at boot with
//! [`check_region`](super::flash::check_region) over [`EspFlash::chip_size`] and
//! [`EspFlash::partitions`].

use super::flash::{FlashDriver, FlashRegion, SECTOR_SIZE};
use esp_idf_sys::{
    esp, esp_flash_erase_region, esp_flash_get_size, esp_flash_read, esp_flash_write,
    esp_partition_find, esp_partition_get, esp_partition_next,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY, esp_partition_type_t_ESP_PARTITION_TYPE_ANY,
    EspError,
};
use std::ffi::{c_void, CStr};
use std::ptr;
use std::sync::Mutex;

/// Serializes erase/program sequences between tasks.
static FLASH_LOCK: Mutex<()> = Mutex::new(());

/// Flash driver backed by the boot flash chip.
pub struct EspFlash {
    _private: (),
}

impl EspFlash {
    /// Create a driver for the default flash chip.
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Size of the boot flash chip in bytes.
    pub fn chip_size(&self) -> Result<u32, EspError> {
        let mut size = 0u32;
        // SAFETY: null selects the default chip; `size` outlives the call.
        esp!(unsafe { esp_flash_get_size(ptr::null_mut(), &mut size) })?;
        Ok(size)
    }

    /// Every entry of the partition table.
    pub fn partitions(&self) -> Vec<FlashRegion> {
        let mut regions = Vec::new();
        // SAFETY: the iterator is walked to its end, where `esp_partition_next`
        // releases it; entries point into the static partition table.
        unsafe {
            let mut it = esp_partition_find(
                esp_partition_type_t_ESP_PARTITION_TYPE_ANY,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_ANY,
                ptr::null(),
            );
            while !it.is_null() {
                if let Some(partition) = esp_partition_get(it).as_ref() {
                    regions.push(FlashRegion {
                        label: CStr::from_ptr(partition.label.as_ptr())
                            .to_string_lossy()
                            .into_owned(),
                        address: partition.address,
                        size: partition.size,
                    });
                }
                it = esp_partition_next(it);
            }
        }
        regions
    }
}

impl Default for EspFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashDriver for EspFlash {
    type Error = EspError;

    fn exclusive<R>(&mut self, op: impl FnOnce(&mut Self) -> R) -> R {
        let _guard = FLASH_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        op(self)
    }

    fn erase_sector(&mut self, offset: u32) -> Result<(), EspError> {
        // SAFETY: null selects the default chip; the region is sector aligned
        // and was checked against the partition table at boot.
        esp!(unsafe { esp_flash_erase_region(ptr::null_mut(), offset, SECTOR_SIZE) })
    }

    fn program_page(&mut self, offset: u32, data: &[u8]) -> Result<(), EspError> {
        // SAFETY: `data` is valid for `data.len()` bytes for the whole call.
        esp!(unsafe {
            esp_flash_write(
                ptr::null_mut(),
                data.as_ptr() as *const c_void,
                offset,
                data.len() as u32,
            )
        })
    }

    fn read_region(&self, offset: u32, buf: &mut [u8]) -> Result<(), EspError> {
        // SAFETY: `buf` is valid and exclusively borrowed for `buf.len()` bytes.
        esp!(unsafe {
            esp_flash_read(
                ptr::null_mut(),
                buf.as_mut_ptr() as *mut c_void,
                offset,
                buf.len() as u32,
            )
        })
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::config::{Credential, DEFAULT_CREDENTIAL_OFFSET};
    use crate::wifi::{check_region, CredentialStore, RegionError, PAGE_SIZE};
    use ble_wifi_prov_macros::tap_test;

    #[tap_test]
    fn esp_flash_credential_sector_is_unpartitioned() {
        let flash = EspFlash::new();
        let size = flash.chip_size().expect("chip size");
        let partitions = flash.partitions();
        assert!(!partitions.is_empty(), "partition table not found");

        assert_eq!(
            check_region(DEFAULT_CREDENTIAL_OFFSET, size, &partitions),
            Ok(())
        );
        // The first partition always claims its own first sector.
        let first = &partitions[0];
        assert!(matches!(
            check_region(first.address, size, &partitions),
            Err(RegionError::Overlaps { .. })
        ));
    }

    #[tap_test]
    fn esp_flash_erase_reads_ff() {
        let mut flash = EspFlash::new();
        flash
            .exclusive(|f| f.erase_sector(DEFAULT_CREDENTIAL_OFFSET))
            .expect("erase failed");

        let mut buf = [0u8; PAGE_SIZE];
        flash
            .read_region(DEFAULT_CREDENTIAL_OFFSET, &mut buf)
            .expect("read failed");
        assert!(buf.iter().all(|&b| b == 0xFF));
    }

    #[tap_test]
    fn esp_flash_store_roundtrip() {
        let mut store = CredentialStore::new(EspFlash::new(), DEFAULT_CREDENTIAL_OFFSET);
        let credential = Credential::new("Home-WiFi", "s3cr3t!").expect("valid credential");

        store.save(&credential).expect("save failed");
        assert_eq!(store.load(), Some(credential));

        store.clear().expect("clear failed");
        assert_eq!(store.load(), None);
    }
}
