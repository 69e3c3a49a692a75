//! The boot-time decision: which image runs, and what gets recorded about it.
//!
//! One pass per reset. The candidate comes from, in order of precedence, a
//! one-shot request in retained memory, the boot pin under a GPIO policy, the
//! failsafe policy and finally the persisted `current_rom`. From there every
//! slot is tried once, walking forward and wrapping, until one verifies.

use embedded_storage::nor_flash::NorFlash;

use crate::config_store::{ConfigStore, sector_offset};
use crate::error::{BootError, BootErrorKind};
use crate::geometry::FlashGeometry;
use crate::image::ImageVerifier;
use crate::layout::{BootConfig, BootMode, BootOptions, RetainedBootState};
use crate::pins::BootPins;
use crate::retained::{RetainedMemory, RetainedStore};
use crate::settings::Settings;
use crate::{Address, SECTOR_SIZE};

/// What the caller hands control to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BootTarget {
    pub index: u8,
    /// Flash offset of the image.
    pub rom_addr: Address,
    /// Entry point from the image header.
    pub entry: u32,
    pub mode: BootMode,
    /// The config sector was rewritten during this pass.
    pub config_updated: bool,
    /// The retained record for the running firmware was written.
    pub retained_updated: bool,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct Candidate {
    index: u8,
    mode: BootMode,
}

pub struct BootSelector<F: NorFlash, R: RetainedMemory, P: BootPins> {
    flash: F,
    retained: RetainedStore<R>,
    pins: P,
    config_store: ConfigStore,
    verifier: ImageVerifier,
    settings: Settings,
}

impl<F: NorFlash, R: RetainedMemory, P: BootPins> BootSelector<F, R, P> {
    pub fn new(flash: F, retained: R, pins: P, settings: Settings) -> Self {
        Self {
            flash,
            retained: RetainedStore::new(retained, settings.retained_offset_words),
            pins,
            config_store: ConfigStore::new(settings.config_sector),
            verifier: ImageVerifier::from_settings(&settings),
            settings,
        }
    }

    pub fn into_parts(self) -> (F, R, P) {
        (self.flash, self.retained.into_inner(), self.pins)
    }

    /// Runs the boot decision.
    ///
    /// Fails only with [`BootErrorKind::NoBootableImage`]; flash or retained
    /// memory trouble while recording the outcome is logged and reflected in
    /// the [`BootTarget`] flags.
    pub fn select(&mut self) -> Result<BootTarget, BootError> {
        let geometry = FlashGeometry::probe(&mut self.flash);
        let (config, mut config_updated) = self.load_config(&geometry);
        let previous = self.retained.load();
        let candidate = self.choose(&config, previous);
        info!("first candidate {} (mode {})", candidate.index, candidate.mode.code());

        let Some((index, rom_addr, entry)) = self.search(&config, candidate.index) else {
            error!("no bootable image among {} slots", config.count);
            if candidate.mode == BootMode::TempRom {
                self.clear_temp_request(previous);
            }
            return Err(BootError::new(BootErrorKind::NoBootableImage));
        };

        if config.options.contains(BootOptions::PERSIST_SELECTED_INDEX)
            && candidate.mode != BootMode::TempRom
            && index != config.current_rom
        {
            let mut updated = config;
            updated.current_rom = index;
            match self.config_store.save(&mut self.flash, Some(&updated)) {
                Ok(()) => config_updated = true,
                Err(err) => error!("persisting image {} failed: {}", index, err.kind()),
            }
        }

        let record = RetainedBootState {
            next_mode: BootMode::Standard,
            last_mode: candidate.mode,
            last_rom: index,
            next_rom: 0,
            rom_addr,
            spi_speed: geometry.spi_speed,
            spi_size: geometry.spi_size,
            spi_mode: geometry.spi_mode,
        };
        let retained_updated = match self.retained.save(&record) {
            Ok(()) => true,
            Err(err) => {
                error!("recording boot failed: {}", err.kind());
                false
            }
        };

        if config.options.contains(BootOptions::ERASE_AUX_CONFIG_ON_GPIO_BOOT)
            && candidate.mode.is_gpio()
        {
            self.erase_aux_sectors(geometry.size_bytes);
        }

        info!("booting image {} at {:#x}", index, rom_addr);
        Ok(BootTarget {
            index,
            rom_addr,
            entry,
            mode: candidate.mode,
            config_updated,
            retained_updated,
        })
    }

    /// The stored config, or a freshly written default when it is missing.
    fn load_config(&mut self, geometry: &FlashGeometry) -> (BootConfig, bool) {
        if let Some(config) = self.config_store.load(&mut self.flash) {
            return (config, false);
        }
        warn!("boot config invalid, writing defaults");
        let config = BootConfig::default_for(geometry.size_bytes, &self.settings);
        match self.config_store.save(&mut self.flash, Some(&config)) {
            Ok(()) => (config, true),
            Err(err) => {
                error!("writing default boot config failed: {}", err.kind());
                (config, false)
            }
        }
    }

    fn choose(&mut self, config: &BootConfig, retained: Option<RetainedBootState>) -> Candidate {
        let count = config.count;
        let current = if config.current_rom < count {
            config.current_rom
        } else {
            warn!("current image {} out of range, using 0", config.current_rom);
            0
        };

        if let Some(state) = retained.filter(|state| state.next_mode == BootMode::TempRom) {
            if state.next_rom < count {
                return Candidate {
                    index: state.next_rom,
                    mode: BootMode::TempRom,
                };
            }
            warn!("temporary image {} out of range ({} slots)", state.next_rom, count);
        }

        match config.mode {
            BootMode::GpioSelect if self.pins.pin_asserted(config.gpio_num) => {
                if config.gpio_rom < count {
                    return Candidate {
                        index: config.gpio_rom,
                        mode: BootMode::GpioSelect,
                    };
                }
                warn!("gpio image {} out of range ({} slots)", config.gpio_rom, count);
            }
            BootMode::GpioSkip if self.pins.pin_asserted(config.gpio_num) => {
                return Candidate {
                    index: wrap_index(current, 1, count),
                    mode: BootMode::GpioSkip,
                };
            }
            BootMode::Failsafe => {
                if config.failsafe_rom < count {
                    return Candidate {
                        index: config.failsafe_rom,
                        mode: BootMode::Failsafe,
                    };
                }
                warn!("failsafe image {} out of range ({} slots)", config.failsafe_rom, count);
            }
            _ => {}
        }

        Candidate {
            index: current,
            mode: BootMode::Standard,
        }
    }

    /// First slot from `start` onward whose image verifies.
    fn search(&mut self, config: &BootConfig, start: u8) -> Option<(u8, Address, u32)> {
        for step in 0..config.count {
            let index = wrap_index(start, step, config.count);
            let Some(rom_addr) = config.rom(index) else {
                continue;
            };
            if let Some(entry) = self.verifier.verify(&mut self.flash, rom_addr) {
                return Some((index, rom_addr, entry));
            }
            warn!("image {} at {:#x} rejected", index, rom_addr);
        }
        None
    }

    /// Consumes a one-shot request whose image did not boot.
    fn clear_temp_request(&mut self, previous: Option<RetainedBootState>) {
        let mut state = previous.unwrap_or_default();
        state.next_mode = BootMode::Standard;
        state.next_rom = 0;
        if let Err(err) = self.retained.save(&state) {
            error!("clearing temporary boot request failed: {}", err.kind());
        }
    }

    /// Wipes the last `aux_sectors` sectors of flash.
    fn erase_aux_sectors(&mut self, flash_size: u32) {
        let total = flash_size / SECTOR_SIZE as u32;
        for back in 1..=self.settings.aux_sectors {
            let Some(sector) = total.checked_sub(back) else {
                break;
            };
            let range = sector_offset(sector).and_then(|from| {
                sector_offset(sector.saturating_add(1)).map(|to| (from, to))
            });
            let result = match range {
                Ok((from, to)) => self.flash.erase(from, to).map_err(|_| ()),
                Err(_) => Err(()),
            };
            if result.is_err() {
                warn!("erasing auxiliary sector {} failed", sector);
            } else {
                debug!("erased auxiliary sector {}", sector);
            }
        }
    }
}

fn wrap_index(start: u8, step: u8, count: u8) -> u8 {
    start
        .checked_add(step)
        .and_then(|index| index.checked_rem(count))
        .unwrap_or(0)
}
