extern crate std;

use std::vec::Vec;

use crate::checksum::{WordSum, checksum8};
use crate::config_store::ConfigStore;
use crate::image::{DESCRIPTION_LEN, IMAGE_MAGIC, ImageHeader, SectionRecord};
use crate::layout::{
    BOOT_CONFIG_SIZE, BootConfig, BootMode, BootOptions, RETAINED_SIZE, RetainedBootState,
};
use crate::mem::{MemFlash, MemPins, MemRetained};
use crate::settings::Settings;
use crate::{BootErrorKind, BootSelector, BootTarget, SECTOR_SIZE};

pub(crate) const ENTRY: u32 = 0x4010_0004;

/// Builds a complete image with a correct trailing checksum.
pub(crate) fn image_bytes(entry: u32, sections: &[(u32, &[u8])]) -> Vec<u8> {
    dated_image_bytes(entry, 0, sections)
}

pub(crate) fn dated_image_bytes(entry: u32, date: u32, sections: &[(u32, &[u8])]) -> Vec<u8> {
    let mut description = [0u8; DESCRIPTION_LEN];
    description[..10].copy_from_slice(b"test image");
    let header = ImageHeader {
        magic: IMAGE_MAGIC,
        count: sections.len() as u32,
        entry,
        version: 1,
        date,
        reserved: [0; 3],
        description,
    };
    let mut sum = WordSum::new();
    let mut out = Vec::new();
    out.extend_from_slice(&header.encode());
    sum.add_bytes(&header.encode());
    for &(address, payload) in sections {
        let record = SectionRecord {
            address,
            length: payload.len() as u32,
        };
        out.extend_from_slice(&record.encode());
        sum.add_word(address);
        sum.add_word(record.length);
        out.extend_from_slice(payload);
        sum.add_bytes(payload);
    }
    out.extend_from_slice(&sum.value().to_le_bytes());
    out
}

pub(crate) fn place(flash: &mut [u8], at: usize, bytes: &[u8]) {
    flash[at..at + bytes.len()].copy_from_slice(bytes);
}

const FLASH_SIZE: usize = 0x4_0000;
const CONFIG_OFFSET: usize = 2 * SECTOR_SIZE;
const RETAINED_OFFSET: usize = 64;
const SLOTS: [u32; 3] = [0x4000, 0x1_0000, 0x2_0000];
const PIN: u8 = 16;

fn good_image() -> Vec<u8> {
    image_bytes(ENTRY, &[(0x4010_0000, &[0xAA; 64][..])])
}

fn three_slot_config() -> BootConfig {
    BootConfig {
        mode: BootMode::Standard,
        current_rom: 0,
        gpio_rom: 0,
        count: 3,
        roms: [SLOTS[0], SLOTS[1], SLOTS[2], 0],
        failsafe_rom: 0,
        options: BootOptions::empty(),
        gpio_num: PIN,
    }
}

/// Raw flash and retained memory for one simulated device.
struct Device {
    flash: Vec<u8>,
    retained: [u8; 128],
}

impl Device {
    fn blank() -> Self {
        let mut flash = std::vec![0xFFu8; FLASH_SIZE];
        // 256 KiB part, DIO, 40 MHz.
        place(&mut flash, 0, &[0xE9, 1, 2, 0x10, 0, 0, 0, 0]);
        Self {
            flash,
            retained: [0; 128],
        }
    }

    fn with_config(mut self, config: &BootConfig) -> Self {
        place(&mut self.flash, CONFIG_OFFSET, &config.encode());
        self
    }

    fn with_image(mut self, slot: usize) -> Self {
        place(&mut self.flash, SLOTS[slot] as usize, &good_image());
        self
    }

    fn with_temp_request(mut self, index: u8) -> Self {
        let state = RetainedBootState {
            next_mode: BootMode::TempRom,
            next_rom: index,
            ..RetainedBootState::default()
        };
        place(&mut self.retained, RETAINED_OFFSET, &state.encode());
        self
    }

    fn boot(&mut self, pins: MemPins) -> Result<BootTarget, crate::BootError> {
        let mut selector = BootSelector::new(
            MemFlash::new(&mut self.flash),
            MemRetained::new(&mut self.retained),
            pins,
            Settings::default(),
        );
        selector.select()
    }

    fn config(&self) -> Option<BootConfig> {
        BootConfig::decode(&self.flash[CONFIG_OFFSET..CONFIG_OFFSET + BOOT_CONFIG_SIZE])
    }

    fn boot_state(&self) -> Option<RetainedBootState> {
        RetainedBootState::decode(&self.retained[RETAINED_OFFSET..RETAINED_OFFSET + RETAINED_SIZE])
    }
}

#[test]
fn first_boot_writes_default_config_and_records_geometry() {
    let mut device = Device::blank();
    place(&mut device.flash, 0x3000, &good_image());
    let target = device.boot(MemPins::new()).expect("boot");
    assert_eq!(target.index, 0);
    assert_eq!(target.rom_addr, 0x3000);
    assert_eq!(target.entry, ENTRY);
    assert!(target.config_updated);
    assert!(target.retained_updated);

    let config = device.config().expect("default config");
    assert_eq!(config.count, 2);
    assert_eq!(config.roms, [0x3000, 0x2_3000, 0, 0]);

    let state = device.boot_state().expect("retained record");
    assert_eq!(state.last_rom, 0);
    assert_eq!(state.last_mode, BootMode::Standard);
    assert_eq!(state.next_mode, BootMode::Standard);
    assert_eq!(state.rom_addr, 0x3000);
    assert_eq!((state.spi_size, state.spi_speed, state.spi_mode), (1, 0, 2));
}

#[test]
fn search_wraps_past_invalid_images() {
    let mut config = three_slot_config();
    config.current_rom = 1;
    let mut device = Device::blank().with_config(&config).with_image(0);
    let target = device.boot(MemPins::new()).expect("boot");
    assert_eq!(target.index, 0);
    assert_eq!(target.mode, BootMode::Standard);
}

#[test]
fn first_two_invalid_resolves_to_third() {
    let mut device = Device::blank()
        .with_config(&three_slot_config())
        .with_image(2);
    let target = device.boot(MemPins::new()).expect("boot");
    assert_eq!(target.index, 2);
    assert_eq!(target.rom_addr, SLOTS[2]);
    assert!(!target.config_updated);
    assert_eq!(device.config().map(|c| c.current_rom), Some(0));
    assert_eq!(device.boot_state().map(|s| s.last_rom), Some(2));
}

#[test]
fn persist_option_records_the_index_that_booted() {
    let mut config = three_slot_config();
    config.options = BootOptions::PERSIST_SELECTED_INDEX;
    let mut device = Device::blank().with_config(&config).with_image(2);
    let target = device.boot(MemPins::new()).expect("boot");
    assert!(target.config_updated);
    assert_eq!(device.config().map(|c| c.current_rom), Some(2));
}

#[test]
fn exhaustion_leaves_config_and_retained_untouched() {
    let mut config = three_slot_config();
    config.options = BootOptions::PERSIST_SELECTED_INDEX;
    let mut device = Device::blank().with_config(&config);
    let flash_before = device.flash.clone();
    let err = device.boot(MemPins::new()).expect_err("nothing to boot");
    assert_eq!(err.kind(), BootErrorKind::NoBootableImage);
    assert!(device.flash == flash_before);
    assert_eq!(device.boot_state(), None);
}

#[test]
fn temp_request_is_honoured_once() {
    let mut device = Device::blank()
        .with_config(&three_slot_config())
        .with_image(0)
        .with_image(1)
        .with_temp_request(1);
    let target = device.boot(MemPins::new()).expect("temp boot");
    assert_eq!((target.index, target.mode), (1, BootMode::TempRom));
    let state = device.boot_state().expect("record");
    assert_eq!(state.next_mode, BootMode::Standard);
    assert_eq!(state.next_rom, 0);
    assert_eq!(state.last_mode, BootMode::TempRom);

    let target = device.boot(MemPins::new()).expect("next boot");
    assert_eq!((target.index, target.mode), (0, BootMode::Standard));
}

#[test]
fn temp_request_is_cleared_even_when_its_image_is_bad() {
    let mut device = Device::blank()
        .with_config(&three_slot_config())
        .with_image(0)
        .with_temp_request(1);
    let target = device.boot(MemPins::new()).expect("falls through");
    assert_eq!(target.index, 0);
    assert_eq!(device.boot_state().map(|s| s.next_mode), Some(BootMode::Standard));

    let mut device = Device::blank()
        .with_config(&three_slot_config())
        .with_temp_request(1);
    let err = device.boot(MemPins::new()).expect_err("nothing to boot");
    assert_eq!(err.kind(), BootErrorKind::NoBootableImage);
    let state = device.boot_state().expect("request cleared");
    assert_eq!((state.next_mode, state.next_rom), (BootMode::Standard, 0));
}

#[test]
fn temp_boot_never_persists_its_index() {
    let mut config = three_slot_config();
    config.options = BootOptions::PERSIST_SELECTED_INDEX;
    let mut device = Device::blank()
        .with_config(&config)
        .with_image(0)
        .with_image(2)
        .with_temp_request(2);
    let target = device.boot(MemPins::new()).expect("boot");
    assert_eq!(target.index, 2);
    assert!(!target.config_updated);
    assert_eq!(device.config().map(|c| c.current_rom), Some(0));
}

#[test]
fn out_of_range_temp_request_is_discarded() {
    let mut device = Device::blank()
        .with_config(&three_slot_config())
        .with_image(0)
        .with_image(1)
        .with_temp_request(3);
    let target = device.boot(MemPins::new()).expect("boot");
    assert_eq!((target.index, target.mode), (0, BootMode::Standard));
}

#[test]
fn temp_request_outranks_gpio_select() {
    let mut config = three_slot_config();
    config.mode = BootMode::GpioSelect;
    config.gpio_rom = 2;
    let mut device = Device::blank()
        .with_config(&config)
        .with_image(1)
        .with_image(2)
        .with_temp_request(1);
    let target = device.boot(MemPins::with_asserted(PIN)).expect("boot");
    assert_eq!((target.index, target.mode), (1, BootMode::TempRom));
}

#[test]
fn gpio_select_needs_the_pin_held() {
    let mut config = three_slot_config();
    config.mode = BootMode::GpioSelect;
    config.gpio_rom = 2;
    let mut device = Device::blank()
        .with_config(&config)
        .with_image(0)
        .with_image(2);
    let target = device.boot(MemPins::new()).expect("released");
    assert_eq!((target.index, target.mode), (0, BootMode::Standard));
    let target = device.boot(MemPins::with_asserted(PIN)).expect("held");
    assert_eq!((target.index, target.mode), (2, BootMode::GpioSelect));
    let target = device.boot(MemPins::with_asserted(PIN + 1)).expect("wrong pin");
    assert_eq!(target.index, 0);
}

#[test]
fn gpio_skip_moves_to_the_next_slot() {
    let mut config = three_slot_config();
    config.mode = BootMode::GpioSkip;
    config.current_rom = 2;
    let mut device = Device::blank()
        .with_config(&config)
        .with_image(0)
        .with_image(1)
        .with_image(2);
    let target = device.boot(MemPins::with_asserted(PIN)).expect("boot");
    assert_eq!((target.index, target.mode), (0, BootMode::GpioSkip));
}

#[test]
fn failsafe_policy_starts_at_failsafe_slot() {
    let mut config = three_slot_config();
    config.mode = BootMode::Failsafe;
    config.failsafe_rom = 1;
    let mut device = Device::blank()
        .with_config(&config)
        .with_image(0)
        .with_image(1);
    let target = device.boot(MemPins::new()).expect("boot");
    assert_eq!((target.index, target.mode), (1, BootMode::Failsafe));
}

#[test]
fn gpio_select_with_out_of_range_slot_falls_back_to_current() {
    let mut config = three_slot_config();
    config.mode = BootMode::GpioSelect;
    config.current_rom = 1;
    config.gpio_rom = 3;
    let mut device = Device::blank()
        .with_config(&config)
        .with_image(0)
        .with_image(1)
        .with_image(2);
    let target = device.boot(MemPins::with_asserted(PIN)).expect("boot");
    assert_eq!((target.index, target.mode), (1, BootMode::Standard));
}

#[test]
fn failsafe_with_out_of_range_slot_falls_back_to_current() {
    let mut config = three_slot_config();
    config.mode = BootMode::Failsafe;
    config.current_rom = 1;
    config.failsafe_rom = 7;
    let mut device = Device::blank()
        .with_config(&config)
        .with_image(0)
        .with_image(1)
        .with_image(2);
    let target = device.boot(MemPins::new()).expect("boot");
    assert_eq!((target.index, target.mode), (1, BootMode::Standard));
}

#[test]
fn corrupt_current_index_starts_from_zero() {
    let mut config = three_slot_config();
    config.current_rom = 9;
    let mut device = Device::blank()
        .with_config(&config)
        .with_image(0)
        .with_image(1);
    let target = device.boot(MemPins::new()).expect("boot");
    assert_eq!(target.index, 0);
}

#[test]
fn gpio_boot_wipes_auxiliary_sectors_when_asked() {
    let mut config = three_slot_config();
    config.mode = BootMode::GpioSelect;
    config.gpio_rom = 1;
    config.options = BootOptions::ERASE_AUX_CONFIG_ON_GPIO_BOOT;
    let mut device = Device::blank().with_config(&config).with_image(0).with_image(1);
    let aux_start = FLASH_SIZE - 4 * SECTOR_SIZE;
    device.flash[aux_start - 1..].fill(0x11);

    device.boot(MemPins::new()).expect("plain boot");
    assert!(device.flash[aux_start..].iter().all(|&b| b == 0x11));

    device.boot(MemPins::with_asserted(PIN)).expect("gpio boot");
    assert!(device.flash[aux_start..].iter().all(|&b| b == 0xFF));
    assert_eq!(device.flash[aux_start - 1], 0x11);
}

#[test]
fn retained_write_failure_does_not_fail_the_boot() {
    let mut device = Device::blank()
        .with_config(&three_slot_config())
        .with_image(0);
    let mut retained = MemRetained::new(&mut device.retained);
    retained.set_fail(true);
    let mut selector = BootSelector::new(
        MemFlash::new(&mut device.flash),
        retained,
        MemPins::new(),
        Settings::default(),
    );
    let target = selector.select().expect("boot");
    assert_eq!(target.index, 0);
    assert!(!target.retained_updated);
}

#[test]
fn config_round_trip_keeps_fields_and_checksum() {
    let mut flash = std::vec![0xFFu8; 4 * SECTOR_SIZE];
    let store = ConfigStore::new(2);
    let config = three_slot_config();
    store
        .save(&mut MemFlash::new(&mut flash), Some(&config))
        .expect("save");
    let stored = &flash[CONFIG_OFFSET..CONFIG_OFFSET + BOOT_CONFIG_SIZE];
    assert_eq!(stored[BOOT_CONFIG_SIZE - 1], checksum8(&stored[..BOOT_CONFIG_SIZE - 1]));
    let loaded = store.load(&mut MemFlash::new(&mut flash)).expect("load");
    assert_eq!(loaded, config);
}
