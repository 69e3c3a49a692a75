//! Flash geometry as advertised by the vendor header at offset 0.
//!
//! The header is `magic u8, count u8, flags1 u8, flags2 u8, entry u32`.
//! `flags1` holds the SPI read mode, the high nibble of `flags2` the size code
//! and its low nibble the clock code.

use embedded_storage::nor_flash::ReadNorFlash;

/// Size assumed when the header cannot be read or carries an unknown code.
pub const FALLBACK_FLASH_SIZE: u32 = 0x8_0000;

const VENDOR_HEADER_SIZE: usize = 8;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SpiMode {
    Qio,
    Qout,
    Dio,
    Dout,
}

impl SpiMode {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SpiMode::Qio),
            1 => Some(SpiMode::Qout),
            2 => Some(SpiMode::Dio),
            3 => Some(SpiMode::Dout),
            _ => None,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SpiSpeed {
    Mhz40,
    Mhz26,
    Mhz20,
    Mhz80,
}

impl SpiSpeed {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SpiSpeed::Mhz40),
            1 => Some(SpiSpeed::Mhz26),
            2 => Some(SpiSpeed::Mhz20),
            15 => Some(SpiSpeed::Mhz80),
            _ => None,
        }
    }

    /// Clock in kHz; 26.7 MHz is reported as 26_700.
    pub fn khz(self) -> u32 {
        match self {
            SpiSpeed::Mhz40 => 40_000,
            SpiSpeed::Mhz26 => 26_700,
            SpiSpeed::Mhz20 => 20_000,
            SpiSpeed::Mhz80 => 80_000,
        }
    }
}

/// Bytes of flash for a size code, `None` for codes the part never uses.
pub fn size_from_code(code: u8) -> Option<u32> {
    match code {
        0 => Some(0x8_0000),
        1 => Some(0x4_0000),
        2 => Some(0x10_0000),
        3 => Some(0x20_0000),
        4 => Some(0x40_0000),
        _ => None,
    }
}

/// Raw geometry codes plus the decoded size, copied into the retained record
/// on every boot.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FlashGeometry {
    pub spi_mode: u8,
    pub spi_speed: u8,
    pub spi_size: u8,
    pub size_bytes: u32,
}

impl Default for FlashGeometry {
    fn default() -> Self {
        Self {
            spi_mode: 0,
            spi_speed: 0,
            spi_size: 0,
            size_bytes: FALLBACK_FLASH_SIZE,
        }
    }
}

impl FlashGeometry {
    pub fn probe<F: ReadNorFlash>(flash: &mut F) -> Self {
        let mut header = [0u8; VENDOR_HEADER_SIZE];
        if flash.read(0, &mut header).is_err() {
            warn!("flash header unreadable, assuming {:#x} bytes", FALLBACK_FLASH_SIZE);
            return Self::default();
        }
        let [_magic, _count, flags1, flags2, ..] = header;
        Self::from_flags(flags1, flags2)
    }

    pub fn from_flags(flags1: u8, flags2: u8) -> Self {
        let spi_size = flags2 >> 4;
        let size_bytes = size_from_code(spi_size).unwrap_or_else(|| {
            warn!(
                "unknown flash size code {}, assuming {:#x} bytes",
                spi_size, FALLBACK_FLASH_SIZE
            );
            FALLBACK_FLASH_SIZE
        });
        Self {
            spi_mode: flags1,
            spi_speed: flags2 & 0x0F,
            spi_size,
            size_bytes,
        }
    }

    pub fn mode(&self) -> Option<SpiMode> {
        SpiMode::from_code(self.spi_mode)
    }

    pub fn speed(&self) -> Option<SpiSpeed> {
        SpiSpeed::from_code(self.spi_speed)
    }
}
