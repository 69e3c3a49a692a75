//! Boot control for running firmware.
//!
//! Application code uses [`BootControl`] to inspect how it was booted, to
//! change the persisted boot policy, to request a one-shot boot of another
//! image and to stream an update into a free slot.

use embedded_storage::nor_flash::NorFlash;
use heapless::String;

use crate::config_store::{ConfigStore, sector_offset};
use crate::error::{BootError, BootErrorKind, map_flash_error};
use crate::geometry::{SpiMode, SpiSpeed, size_from_code};
use crate::image::{DESCRIPTION_LEN, IMAGE_MAGIC, ImageVerifier, read_header};
use crate::layout::{BootConfig, BootMode, BootOptions, RetainedBootState};
use crate::retained::{RetainedMemory, RetainedStore};
use crate::settings::Settings;
use crate::write_session::{FlashWriter, WriteSession};
use crate::{Address, MAX_ROMS, SECTOR_SIZE};

/// Header details of a flashed image.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ImageInfo {
    pub index: u8,
    pub address: Address,
    pub version: u32,
    pub date: u32,
    pub description: String<DESCRIPTION_LEN>,
}

pub struct BootControl<F: NorFlash, R: RetainedMemory> {
    flash: F,
    retained: RetainedStore<R>,
    config_store: ConfigStore,
    verifier: ImageVerifier,
    writer: FlashWriter,
}

impl<F: NorFlash, R: RetainedMemory> BootControl<F, R> {
    pub fn new(flash: F, retained: R, settings: Settings) -> Self {
        Self {
            flash,
            retained: RetainedStore::new(retained, settings.retained_offset_words),
            config_store: ConfigStore::new(settings.config_sector),
            verifier: ImageVerifier::from_settings(&settings),
            writer: FlashWriter::new(),
        }
    }

    pub fn into_parts(self) -> (F, R) {
        (self.flash, self.retained.into_inner())
    }

    /// The stored boot config, if valid.
    pub fn config(&mut self) -> Option<BootConfig> {
        self.config_store.load(&mut self.flash)
    }

    /// The retained record written by the boot stage, if valid.
    pub fn boot_state(&mut self) -> Option<RetainedBootState> {
        self.retained.load()
    }

    pub fn set_coldboot_index(&mut self, index: u8) -> Result<(), BootError> {
        self.config_store.update(&mut self.flash, |config| {
            config.current_rom = checked_index(config, index)?;
            Ok(())
        })
    }

    pub fn set_failsafe_index(&mut self, index: u8) -> Result<(), BootError> {
        self.config_store.update(&mut self.flash, |config| {
            config.failsafe_rom = checked_index(config, index)?;
            Ok(())
        })
    }

    /// [`BootMode::TempRom`] is a retained-memory request, not a policy, and
    /// is refused here; use [`set_temp_index`](Self::set_temp_index).
    pub fn set_boot_mode(&mut self, mode: BootMode) -> Result<(), BootError> {
        if mode == BootMode::TempRom {
            return Err(BootError::new(BootErrorKind::InvalidConfig));
        }
        self.config_store.update(&mut self.flash, |config| {
            config.mode = mode;
            Ok(())
        })
    }

    pub fn set_option(&mut self, option: BootOptions, enable: bool) -> Result<(), BootError> {
        self.config_store.update(&mut self.flash, |config| {
            config.options.set(option, enable);
            Ok(())
        })
    }

    pub fn set_gpio_number(&mut self, pin: u8) -> Result<(), BootError> {
        self.config_store.update(&mut self.flash, |config| {
            config.gpio_num = pin;
            Ok(())
        })
    }

    /// Points slot `index` at `address`. Writing the slot just past the last
    /// one in use adds it to the table.
    pub fn set_image_address(&mut self, index: u8, address: Address) -> Result<(), BootError> {
        self.config_store.update(&mut self.flash, |config| {
            if usize::from(index) >= MAX_ROMS || index > config.count {
                return Err(BootError::new(BootErrorKind::InvalidIndex));
            }
            let slot = config
                .roms
                .get_mut(usize::from(index))
                .ok_or(BootError::new(BootErrorKind::InvalidIndex))?;
            *slot = address;
            if index == config.count {
                config.count = config.count.saturating_add(1);
            }
            Ok(())
        })
    }

    /// Zeroes the stored config; the next boot writes defaults.
    pub fn erase_config(&mut self) -> Result<(), BootError> {
        self.config_store.save(&mut self.flash, None)
    }

    /// Asks the next boot, and only that one, to try image `index` first.
    pub fn set_temp_index(&mut self, index: u8) -> Result<(), BootError> {
        if let Some(config) = self.config() {
            checked_index(&config, index)?;
        }
        let mut state = self.retained.load().unwrap_or_else(|| {
            debug!("retained record invalid, starting a new one");
            RetainedBootState::default()
        });
        state.next_mode = BootMode::TempRom;
        state.next_rom = index;
        self.retained.save(&state)
    }

    /// Erases the first sector of image `index` so it no longer verifies.
    /// The image that is currently running cannot be invalidated.
    pub fn invalidate_index(&mut self, index: u8) -> Result<(), BootError> {
        let config = self
            .config()
            .ok_or(BootError::new(BootErrorKind::InvalidConfig))?;
        let address = config
            .rom(index)
            .ok_or(BootError::new(BootErrorKind::InvalidIndex))?;
        if self.current_boot_index() == Some(index) {
            warn!("refusing to invalidate running image {}", index);
            return Err(BootError::new(BootErrorKind::InvalidIndex));
        }
        let sector = address / SECTOR_SIZE as u32;
        let from = sector_offset(sector)?;
        let to = sector_offset(sector.saturating_add(1))?;
        self.flash
            .erase(from, to)
            .map_err(|e| map_flash_error(e, BootErrorKind::FlashErase))?;
        info!("image {} at {:#x} invalidated", index, address);
        Ok(())
    }

    pub fn image_address(&mut self, index: u8) -> Option<Address> {
        self.config()?.rom(index)
    }

    pub fn coldboot_index(&mut self) -> Option<u8> {
        self.config().map(|config| config.current_rom)
    }

    pub fn failsafe_index(&mut self) -> Option<u8> {
        self.config().map(|config| config.failsafe_rom)
    }

    pub fn boot_mode(&mut self) -> Option<BootMode> {
        self.config().map(|config| config.mode)
    }

    pub fn options(&mut self) -> Option<BootOptions> {
        self.config().map(|config| config.options)
    }

    pub fn image_count(&mut self) -> Option<u8> {
        self.config().map(|config| config.count)
    }

    /// The pending one-shot request, if any.
    pub fn temp_index(&mut self) -> Option<u8> {
        self.retained
            .load()
            .filter(|state| state.next_mode == BootMode::TempRom)
            .map(|state| state.next_rom)
    }

    pub fn current_boot_index(&mut self) -> Option<u8> {
        self.retained.load().map(|state| state.last_rom)
    }

    pub fn current_boot_mode(&mut self) -> Option<BootMode> {
        self.retained.load().map(|state| state.last_mode)
    }

    pub fn flash_size(&mut self) -> Option<u32> {
        size_from_code(self.retained.load()?.spi_size)
    }

    pub fn flash_speed(&mut self) -> Option<SpiSpeed> {
        SpiSpeed::from_code(self.retained.load()?.spi_speed)
    }

    pub fn flash_mode(&mut self) -> Option<SpiMode> {
        SpiMode::from_code(self.retained.load()?.spi_mode)
    }

    /// Header details of image `index`, if its slot holds an image header.
    /// The image body is not verified.
    pub fn image_info(&mut self, index: u8) -> Option<ImageInfo> {
        let address = self.image_address(index)?;
        let header = read_header(&mut self.flash, address).ok()?;
        if header.magic != IMAGE_MAGIC {
            return None;
        }
        let mut description = String::new();
        description.push_str(header.description_str()).ok()?;
        Some(ImageInfo {
            index,
            address,
            version: header.version,
            date: header.date,
            description,
        })
    }

    pub fn current_image_info(&mut self) -> Option<ImageInfo> {
        let index = self.current_boot_index()?;
        self.image_info(index)
    }

    /// Picks the slot an update should go to.
    ///
    /// The first slot, other than the running one, whose image does not
    /// verify. Failing that, with `overwrite_oldest`, the non-running slot
    /// with the oldest header date.
    pub fn find_best_write_index(&mut self, overwrite_oldest: bool) -> Option<u8> {
        let config = self.config()?;
        let running = self.current_boot_index();
        let mut oldest: Option<(u8, u32)> = None;
        for index in (0..config.count).filter(|&index| Some(index) != running) {
            let address = config.rom(index)?;
            if self.verifier.verify(&mut self.flash, address).is_none() {
                return Some(index);
            }
            let Ok(header) = read_header(&mut self.flash, address) else {
                return Some(index);
            };
            if oldest.is_none_or(|(_, date)| header.date < date) {
                oldest = Some((index, header.date));
            }
        }
        if overwrite_oldest {
            oldest.map(|(index, _)| index)
        } else {
            None
        }
    }

    pub fn open_write(&mut self, start: Address) -> Option<WriteSession> {
        self.writer.open(start)
    }

    pub fn open_write_bounded(&mut self, start: Address, end: Address) -> Option<WriteSession> {
        self.writer.open_bounded(start, end)
    }

    pub fn write_flash(
        &mut self,
        session: &mut WriteSession,
        data: &[u8],
    ) -> Result<(), BootError> {
        self.writer.write(&mut self.flash, session, data)
    }

    pub fn close_write(&mut self, session: WriteSession) -> Result<(), BootError> {
        self.writer.close(&mut self.flash, session)
    }

    pub fn abort_write(&mut self, session: WriteSession) -> Result<(), BootError> {
        self.writer.abort(session)
    }
}

fn checked_index(config: &BootConfig, index: u8) -> Result<u8, BootError> {
    if index >= config.count {
        return Err(BootError::new(BootErrorKind::InvalidIndex));
    }
    Ok(index)
}
