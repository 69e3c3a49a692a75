//! Flash-resident [`BootConfig`] with sector-preserving rewrites.
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::error::{BootError, BootErrorKind, map_flash_error};
use crate::layout::{BOOT_CONFIG_SIZE, BootConfig};
use crate::{Address, SECTOR_SIZE};

/// The config occupies the start of one sector; every other byte of that
/// sector belongs to someone else and survives a save.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ConfigStore {
    sector: u32,
}

impl ConfigStore {
    pub fn new(sector: u32) -> Self {
        Self { sector }
    }

    pub fn sector(&self) -> u32 {
        self.sector
    }

    pub fn offset(&self) -> Result<Address, BootError> {
        sector_offset(self.sector)
    }

    /// The stored config, or `None` when it cannot be read or fails validation.
    pub fn load<F: ReadNorFlash>(&self, flash: &mut F) -> Option<BootConfig> {
        let offset = self.offset().ok()?;
        let mut bytes = [0u8; BOOT_CONFIG_SIZE];
        if flash.read(offset, &mut bytes).is_err() {
            warn!("boot config read failed at {:#x}", offset);
            return None;
        }
        let config = BootConfig::decode(&bytes);
        if config.is_none() {
            debug!("no valid boot config in sector {}", self.sector);
        }
        config
    }

    /// Rewrites the config sector with `config` encoded at its start, or with
    /// the record zeroed when `config` is `None`.
    ///
    /// Costs exactly one sector erase. If programming fails after the erase
    /// the sector is left blank, which later loads report as absent.
    pub fn save<F: NorFlash>(
        &self,
        flash: &mut F,
        config: Option<&BootConfig>,
    ) -> Result<(), BootError> {
        if SECTOR_SIZE % F::ERASE_SIZE != 0
            || SECTOR_SIZE % F::WRITE_SIZE != 0
            || SECTOR_SIZE % F::READ_SIZE != 0
        {
            return Err(BootError::new(BootErrorKind::Unaligned));
        }
        let from = self.offset()?;
        let to = sector_offset(
            self.sector
                .checked_add(1)
                .ok_or(BootError::new(BootErrorKind::OutOfBounds))?,
        )?;

        let mut scratch = [0u8; SECTOR_SIZE];
        flash
            .read(from, &mut scratch)
            .map_err(|e| map_flash_error(e, BootErrorKind::FlashRead))?;

        let record = scratch
            .get_mut(..BOOT_CONFIG_SIZE)
            .ok_or(BootError::new(BootErrorKind::OutOfBounds))?;
        match config {
            Some(config) => record.copy_from_slice(&config.encode()),
            None => record.fill(0),
        }

        flash
            .erase(from, to)
            .map_err(|e| map_flash_error(e, BootErrorKind::FlashErase))?;
        flash
            .write(from, &scratch)
            .map_err(|e| map_flash_error(e, BootErrorKind::FlashWrite))?;
        debug!("boot config sector {} rewritten", self.sector);
        Ok(())
    }

    /// Loads the config, lets `change` edit it, and saves the result.
    ///
    /// Nothing is written when there is no valid config or `change` fails.
    pub fn update<F, T>(
        &self,
        flash: &mut F,
        change: impl FnOnce(&mut BootConfig) -> Result<T, BootError>,
    ) -> Result<T, BootError>
    where
        F: NorFlash,
    {
        let mut config = self
            .load(flash)
            .ok_or(BootError::new(BootErrorKind::InvalidConfig))?;
        let out = change(&mut config)?;
        self.save(flash, Some(&config))?;
        Ok(out)
    }
}

pub(crate) fn sector_offset(sector: u32) -> Result<Address, BootError> {
    u32::try_from(SECTOR_SIZE)
        .ok()
        .and_then(|size| sector.checked_mul(size))
        .ok_or(BootError::new(BootErrorKind::OutOfBounds))
}
