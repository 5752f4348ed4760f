//! Flash driver interface.
//!
//! The credential store talks to NOR flash through [`FlashDriver`]:
//!
//! - Flash is erased in sectors (4 KiB); erased bytes read as `0xFF`
//! - Programming can only clear bits (1→0), so a page must be erased first
//! - Erase/program must not run while code executes from the same flash part;
//!   the driver provides that guarantee through [`FlashDriver::exclusive`]
//! - Reads need no exclusivity
//!
//! [`MemoryFlash`] is an in-memory implementation for host builds and tests.

use std::fmt;

/// Flash sector (erase unit) size.
pub const SECTOR_SIZE: u32 = 4096;

/// Flash page (program unit) size.
pub const PAGE_SIZE: usize = 256;

/// Blocking flash primitives used by the credential store.
pub trait FlashDriver {
    /// Driver error.
    type Error: fmt::Debug + fmt::Display;

    /// Run `op` with no concurrent execution out of the flash part.
    ///
    /// Erase and program calls must happen inside this scope.
    fn exclusive<R>(&mut self, op: impl FnOnce(&mut Self) -> R) -> R;

    /// Erase the sector starting at `offset` (sector aligned).
    fn erase_sector(&mut self, offset: u32) -> Result<(), Self::Error>;

    /// Program `data` (at most one page) at `offset` (page aligned).
    fn program_page(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read_region(&self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
}

/// A named flash range, e.g. one partition table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRegion {
    pub label: String,
    pub address: u32,
    pub size: u32,
}

impl FlashRegion {
    fn overlaps(&self, offset: u32, len: u32) -> bool {
        let (start, end) = (u64::from(offset), u64::from(offset) + u64::from(len));
        let region_end = u64::from(self.address) + u64::from(self.size);
        start < region_end && u64::from(self.address) < end
    }
}

/// Check that the sector at `offset` is inside a chip of `capacity` bytes and
/// claimed by none of `partitions`.
///
/// The credential block is written with raw flash calls, so a sector shared
/// with a partition would be clobbered by (or clobber) its owner.
pub fn check_region(
    offset: u32,
    capacity: u32,
    partitions: &[FlashRegion],
) -> Result<(), RegionError> {
    if u64::from(offset) + u64::from(SECTOR_SIZE) > u64::from(capacity) {
        return Err(RegionError::PastEnd { offset, capacity });
    }
    match partitions.iter().find(|p| p.overlaps(offset, SECTOR_SIZE)) {
        Some(partition) => Err(RegionError::Overlaps {
            offset,
            partition: partition.clone(),
        }),
        None => Ok(()),
    }
}

/// Unusable credential sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    /// Sector ends past the end of the chip.
    PastEnd { offset: u32, capacity: u32 },
    /// Sector shares bytes with a partition.
    Overlaps { offset: u32, partition: FlashRegion },
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PastEnd { offset, capacity } => write!(
                f,
                "credential sector 0x{:X} is past the end of the {} byte flash",
                offset, capacity
            ),
            Self::Overlaps { offset, partition } => write!(
                f,
                "credential sector 0x{:X} overlaps partition '{}' (0x{:X}, {} bytes)",
                offset, partition.label, partition.address, partition.size
            ),
        }
    }
}

impl std::error::Error for RegionError {}

/// Default capacity of [`MemoryFlash`] (4 MiB, same as the target board).
pub const MEMORY_FLASH_CAPACITY: u32 = 4 * 1024 * 1024;

/// In-memory NOR flash.
///
/// Simulates erase-to-`0xFF` and bit-clearing program semantics, enforces the
/// exclusivity scope, counts erases and can inject one-shot failures.
///
/// # Example
///
/// ```
/// use ble_wifi_prov::wifi::{FlashDriver, MemoryFlash};
///
/// let mut flash = MemoryFlash::new();
/// flash
///     .exclusive(|f| {
///         f.erase_sector(0x3F_F000)?;
///         f.program_page(0x3F_F000, b"PROV")
///     })
///     .unwrap();
///
/// let mut buf = [0u8; 4];
/// flash.read_region(0x3F_F000, &mut buf).unwrap();
/// assert_eq!(&buf, b"PROV");
/// ```
#[derive(Debug)]
pub struct MemoryFlash {
    storage: Vec<u8>,
    erase_counts: Vec<u32>,
    program_count: u32,
    in_exclusive: bool,
    fail_next_erase: bool,
    fail_next_program: bool,
}

impl MemoryFlash {
    /// Create a fully erased flash of [`MEMORY_FLASH_CAPACITY`] bytes.
    pub fn new() -> Self {
        Self::with_capacity(MEMORY_FLASH_CAPACITY)
    }

    /// Create a fully erased flash of `capacity` bytes (sector multiple).
    pub fn with_capacity(capacity: u32) -> Self {
        let sectors = (capacity / SECTOR_SIZE) as usize;
        Self {
            storage: vec![0xFF; sectors * SECTOR_SIZE as usize],
            erase_counts: vec![0; sectors],
            program_count: 0,
            in_exclusive: false,
            fail_next_erase: false,
            fail_next_program: false,
        }
    }

    /// Raw contents (for test verification).
    pub fn contents(&self, offset: u32, len: usize) -> &[u8] {
        &self.storage[offset as usize..offset as usize + len]
    }

    /// Overwrite raw contents, bypassing flash semantics (corruption injection).
    pub fn poke(&mut self, offset: u32, data: &[u8]) {
        self.storage[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    /// Number of times the sector containing `offset` was erased.
    pub fn erase_count(&self, offset: u32) -> u32 {
        self.erase_counts[(offset / SECTOR_SIZE) as usize]
    }

    /// Number of successful page programs.
    pub fn program_count(&self) -> u32 {
        self.program_count
    }

    /// Make the next erase fail.
    pub fn fail_next_erase(&mut self) {
        self.fail_next_erase = true;
    }

    /// Make the next program fail.
    pub fn fail_next_program(&mut self) {
        self.fail_next_program = true;
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<(), MemoryFlashError> {
        if offset as usize + len > self.storage.len() {
            return Err(MemoryFlashError::OutOfBounds { offset, len });
        }
        Ok(())
    }
}

impl Default for MemoryFlash {
    fn default() -> Self {
        Self::new()
    }
}

impl FlashDriver for MemoryFlash {
    type Error = MemoryFlashError;

    fn exclusive<R>(&mut self, op: impl FnOnce(&mut Self) -> R) -> R {
        self.in_exclusive = true;
        let result = op(self);
        self.in_exclusive = false;
        result
    }

    fn erase_sector(&mut self, offset: u32) -> Result<(), Self::Error> {
        if !self.in_exclusive {
            return Err(MemoryFlashError::NotExclusive);
        }
        if offset % SECTOR_SIZE != 0 {
            return Err(MemoryFlashError::Unaligned(offset));
        }
        self.check_range(offset, SECTOR_SIZE as usize)?;
        if std::mem::take(&mut self.fail_next_erase) {
            return Err(MemoryFlashError::Injected);
        }

        let start = offset as usize;
        self.storage[start..start + SECTOR_SIZE as usize].fill(0xFF);
        self.erase_counts[(offset / SECTOR_SIZE) as usize] += 1;
        Ok(())
    }

    fn program_page(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
        if !self.in_exclusive {
            return Err(MemoryFlashError::NotExclusive);
        }
        if offset as usize % PAGE_SIZE != 0 || data.len() > PAGE_SIZE {
            return Err(MemoryFlashError::Unaligned(offset));
        }
        self.check_range(offset, data.len())?;
        if std::mem::take(&mut self.fail_next_program) {
            return Err(MemoryFlashError::Injected);
        }

        let start = offset as usize;
        for (cell, byte) in self.storage[start..start + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.program_count += 1;
        Ok(())
    }

    fn read_region(&self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.check_range(offset, buf.len())?;
        let start = offset as usize;
        buf.copy_from_slice(&self.storage[start..start + buf.len()]);
        Ok(())
    }
}

/// [`MemoryFlash`] errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryFlashError {
    /// Access past the end of flash.
    OutOfBounds { offset: u32, len: usize },
    /// Offset not aligned to the operation's unit, or page overrun.
    Unaligned(u32),
    /// Erase/program called outside [`FlashDriver::exclusive`].
    NotExclusive,
    /// Failure injected by the test.
    Injected,
}

impl fmt::Display for MemoryFlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { offset, len } => {
                write!(f, "access out of bounds: 0x{:X}+{}", offset, len)
            }
            Self::Unaligned(offset) => write!(f, "unaligned access at 0x{:X}", offset),
            Self::NotExclusive => write!(f, "flash write outside exclusive scope"),
            Self::Injected => write!(f, "injected failure"),
        }
    }
}

impl std::error::Error for MemoryFlashError {}
