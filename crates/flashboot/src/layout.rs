//! Byte-exact records shared between the boot stage and running firmware.
//!
//! Both records are packed, little-endian and end in a [`checksum8`] over all
//! preceding bytes. Decoding never trusts a record whose magic, checksum or
//! enumerated fields are off; it returns `None` and leaves recovery policy to
//! the caller.

use bitflags::bitflags;

use crate::checksum::checksum8;
use crate::settings::Settings;
use crate::{Address, MAX_ROMS, SECTOR_SIZE};

pub const BOOT_CONFIG_MAGIC: u32 = 0xdcce_4b28;
pub const RETAINED_MAGIC: u32 = 0x2334_ae68;

/// magic, four index/mode bytes, the slot table, four trailing bytes.
pub const BOOT_CONFIG_SIZE: usize = 4 + 4 + 4 * MAX_ROMS + 4;
pub const RETAINED_SIZE: usize = 16;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
#[repr(u8)]
pub enum BootMode {
    #[default]
    Standard = 0,
    GpioSelect = 1,
    /// One-shot request carried in retained memory.
    TempRom = 2,
    GpioSkip = 3,
    Failsafe = 4,
}

impl BootMode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_gpio(self) -> bool {
        matches!(self, BootMode::GpioSelect | BootMode::GpioSkip)
    }
}

impl TryFrom<u8> for BootMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BootMode::Standard),
            1 => Ok(BootMode::GpioSelect),
            2 => Ok(BootMode::TempRom),
            3 => Ok(BootMode::GpioSkip),
            4 => Ok(BootMode::Failsafe),
            other => Err(other),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
    pub struct BootOptions: u8 {
        /// Wipe the auxiliary configuration sectors when a GPIO policy picked the image.
        const ERASE_AUX_CONFIG_ON_GPIO_BOOT = 0x01;
        /// Write the index that actually booted back as the new `current_rom`.
        const PERSIST_SELECTED_INDEX = 0x02;
    }
}

/// Boot policy and image table, stored at the start of the config sector.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BootConfig {
    pub mode: BootMode,
    pub current_rom: u8,
    pub gpio_rom: u8,
    pub count: u8,
    pub roms: [Address; MAX_ROMS],
    pub failsafe_rom: u8,
    pub options: BootOptions,
    pub gpio_num: u8,
}

impl BootConfig {
    /// Configuration written on first boot or after corruption: two images, one
    /// right after the config sector and one in the upper half of flash.
    pub fn default_for(flash_size: u32, settings: &Settings) -> Self {
        let first = u32::try_from(SECTOR_SIZE)
            .unwrap_or(0)
            .saturating_mul(settings.config_sector.saturating_add(1));
        let mut roms = [0; MAX_ROMS];
        if let Some(slot) = roms.get_mut(0) {
            *slot = first;
        }
        if let Some(slot) = roms.get_mut(1) {
            *slot = (flash_size / 2).saturating_add(first);
        }
        Self {
            mode: settings.default_mode,
            current_rom: 0,
            gpio_rom: 0,
            count: settings.default_image_count.min(MAX_ROMS as u8),
            roms,
            failsafe_rom: 0,
            options: BootOptions::empty(),
            gpio_num: settings.default_gpio_num,
        }
    }

    /// Flash offset of slot `index`, if the slot is in use.
    pub fn rom(&self, index: u8) -> Option<Address> {
        if index >= self.count {
            return None;
        }
        self.roms.get(usize::from(index)).copied()
    }

    pub fn encode(&self) -> [u8; BOOT_CONFIG_SIZE] {
        let mut bytes = [0u8; BOOT_CONFIG_SIZE];
        let mut out = FieldWriter::new(&mut bytes);
        out.u32(BOOT_CONFIG_MAGIC);
        out.u8(self.mode.code());
        out.u8(self.current_rom);
        out.u8(self.gpio_rom);
        out.u8(self.count);
        for &rom in &self.roms {
            out.u32(rom);
        }
        out.u8(self.failsafe_rom);
        out.u8(self.options.bits());
        out.u8(self.gpio_num);
        seal(&mut bytes);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let record = checked_record(bytes, BOOT_CONFIG_SIZE)?;
        let mut input = FieldReader::new(record);
        if input.u32()? != BOOT_CONFIG_MAGIC {
            return None;
        }
        let mode = BootMode::try_from(input.u8()?).ok()?;
        let current_rom = input.u8()?;
        let gpio_rom = input.u8()?;
        let count = input.u8()?;
        if usize::from(count) > MAX_ROMS {
            return None;
        }
        let mut roms = [0; MAX_ROMS];
        for rom in roms.iter_mut() {
            *rom = input.u32()?;
        }
        Some(Self {
            mode,
            current_rom,
            gpio_rom,
            count,
            roms,
            failsafe_rom: input.u8()?,
            options: BootOptions::from_bits_retain(input.u8()?),
            gpio_num: input.u8()?,
        })
    }
}

/// Warm-reset record in retained memory.
///
/// `next_*` is a one-shot request for the following boot. `last_*` and the
/// flash geometry describe the boot that produced the running firmware.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct RetainedBootState {
    pub next_mode: BootMode,
    pub last_mode: BootMode,
    pub last_rom: u8,
    pub next_rom: u8,
    pub rom_addr: Address,
    pub spi_speed: u8,
    pub spi_size: u8,
    pub spi_mode: u8,
}

impl RetainedBootState {
    pub fn encode(&self) -> [u8; RETAINED_SIZE] {
        let mut bytes = [0u8; RETAINED_SIZE];
        let mut out = FieldWriter::new(&mut bytes);
        out.u32(RETAINED_MAGIC);
        out.u8(self.next_mode.code());
        out.u8(self.last_mode.code());
        out.u8(self.last_rom);
        out.u8(self.next_rom);
        out.u32(self.rom_addr);
        out.u8(self.spi_speed);
        out.u8(self.spi_size);
        out.u8(self.spi_mode);
        seal(&mut bytes);
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let record = checked_record(bytes, RETAINED_SIZE)?;
        let mut input = FieldReader::new(record);
        if input.u32()? != RETAINED_MAGIC {
            return None;
        }
        Some(Self {
            next_mode: BootMode::try_from(input.u8()?).ok()?,
            last_mode: BootMode::try_from(input.u8()?).ok()?,
            last_rom: input.u8()?,
            next_rom: input.u8()?,
            rom_addr: input.u32()?,
            spi_speed: input.u8()?,
            spi_size: input.u8()?,
            spi_mode: input.u8()?,
        })
    }
}

/// Returns the first `len` bytes of `bytes` when their trailing checksum holds.
fn checked_record(bytes: &[u8], len: usize) -> Option<&[u8]> {
    let record = bytes.get(..len)?;
    let (body, stored) = record.split_at(len.checked_sub(1)?);
    if stored.first().copied()? != checksum8(body) {
        return None;
    }
    Some(record)
}

fn seal(bytes: &mut [u8]) {
    if let Some((last, body)) = bytes.split_last_mut() {
        *last = checksum8(body);
    }
}

struct FieldWriter<'a> {
    bytes: &'a mut [u8],
    pos: usize,
}

impl<'a> FieldWriter<'a> {
    fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn put(&mut self, value: &[u8]) {
        let end = self.pos.saturating_add(value.len());
        if let Some(dst) = self.bytes.get_mut(self.pos..end) {
            dst.copy_from_slice(value);
        }
        self.pos = end;
    }

    fn u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    fn u32(&mut self, value: u32) {
        self.put(&value.to_le_bytes());
    }
}

pub(crate) struct FieldReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let end = self.pos.checked_add(N)?;
        let chunk = self.bytes.get(self.pos..end)?;
        self.pos = end;
        chunk.try_into().ok()
    }

    pub(crate) fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[byte]| byte)
    }

    pub(crate) fn u32(&mut self) -> Option<u32> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    pub(crate) fn bytes<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take::<N>()
    }
}
