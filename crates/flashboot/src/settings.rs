//! Board-level boot settings.
//!
//! These are fixed per product rather than stored on the device. The flash
//! records in [`crate::layout`] hold everything that may change in the field.

use core::ops::Range;

use crate::layout::BootMode;

/// Sector holding the [`crate::layout::BootConfig`].
pub const DEFAULT_CONFIG_SECTOR: u32 = 2;
/// Start of the user area of retained memory, in words.
pub const DEFAULT_RETAINED_OFFSET_WORDS: u32 = 16;
pub const DEFAULT_GPIO_NUM: u8 = 16;
pub const DEFAULT_AUX_SECTORS: u32 = 4;
pub const DEFAULT_IMAGE_COUNT: u8 = 2;
/// Instruction RAM window an image entry point must land in.
pub const DEFAULT_ENTRY_RANGE: Range<u32> = 0x4010_0000..0x4018_0000;
pub const DEFAULT_MAX_SECTIONS: u32 = 256;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    pub config_sector: u32,
    pub retained_offset_words: u32,
    pub default_mode: BootMode,
    pub default_gpio_num: u8,
    pub default_image_count: u8,
    /// Sectors at the top of flash wiped after a GPIO-forced boot when the
    /// config asks for it.
    pub aux_sectors: u32,
    pub entry_range: Range<u32>,
    pub max_sections: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_sector: DEFAULT_CONFIG_SECTOR,
            retained_offset_words: DEFAULT_RETAINED_OFFSET_WORDS,
            default_mode: BootMode::Standard,
            default_gpio_num: DEFAULT_GPIO_NUM,
            default_image_count: DEFAULT_IMAGE_COUNT,
            aux_sectors: DEFAULT_AUX_SECTORS,
            entry_range: DEFAULT_ENTRY_RANGE,
            max_sections: DEFAULT_MAX_SECTIONS,
        }
    }
}

impl Settings {
    pub fn with_config_sector(mut self, sector: u32) -> Self {
        self.config_sector = sector;
        self
    }

    pub fn with_retained_offset_words(mut self, offset_words: u32) -> Self {
        self.retained_offset_words = offset_words;
        self
    }

    pub fn with_default_mode(mut self, mode: BootMode) -> Self {
        self.default_mode = mode;
        self
    }

    pub fn with_default_gpio_num(mut self, pin: u8) -> Self {
        self.default_gpio_num = pin;
        self
    }

    pub fn with_aux_sectors(mut self, sectors: u32) -> Self {
        self.aux_sectors = sectors;
        self
    }

    pub fn with_entry_range(mut self, range: Range<u32>) -> Self {
        self.entry_range = range;
        self
    }

    pub fn with_max_sections(mut self, max_sections: u32) -> Self {
        self.max_sections = max_sections;
        self
    }
}
