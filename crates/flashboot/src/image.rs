//! Boot image format and the streaming integrity check.
//!
//! An image is a fixed [`ImageHeader`], `count` sections of
//! `{address u32, length u32, payload}` and one trailing word holding the
//! wrapping sum of every header word, every section address and length, and
//! every payload word. The verifier reads it front to back through a small
//! scratch buffer and never holds more than that in memory.

use core::ops::Range;

use embedded_storage::nor_flash::ReadNorFlash;

use crate::Address;
use crate::checksum::WordSum;
use crate::error::{BootError, BootErrorKind, map_flash_error};
use crate::layout::FieldReader;
use crate::settings::Settings;

pub const IMAGE_MAGIC: u32 = 0x279b_fbf1;
pub const IMAGE_HEADER_SIZE: usize = 120;
pub const SECTION_RECORD_SIZE: usize = 8;
pub const DESCRIPTION_LEN: usize = 88;

const FIXED_FIELDS_SIZE: usize = IMAGE_HEADER_SIZE - DESCRIPTION_LEN;
const SCRATCH_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ImageHeader {
    pub magic: u32,
    pub count: u32,
    pub entry: u32,
    pub version: u32,
    pub date: u32,
    pub reserved: [u32; 3],
    /// NUL-padded text.
    pub description: [u8; DESCRIPTION_LEN],
}

impl ImageHeader {
    pub fn encode(&self) -> [u8; IMAGE_HEADER_SIZE] {
        let mut bytes = [0u8; IMAGE_HEADER_SIZE];
        let [r0, r1, r2] = self.reserved;
        let words = [self.magic, self.count, self.entry, self.version, self.date, r0, r1, r2];
        let (head, description) = bytes.split_at_mut(FIXED_FIELDS_SIZE);
        for (chunk, word) in head.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        description.copy_from_slice(&self.description);
        bytes
    }

    /// Splits raw header bytes into fields. No field is validated here.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut input = FieldReader::new(bytes.get(..IMAGE_HEADER_SIZE)?);
        Some(Self {
            magic: input.u32()?,
            count: input.u32()?,
            entry: input.u32()?,
            version: input.u32()?,
            date: input.u32()?,
            reserved: [input.u32()?, input.u32()?, input.u32()?],
            description: input.bytes::<DESCRIPTION_LEN>()?,
        })
    }

    /// The description up to its first NUL, cut at the first invalid UTF-8 byte.
    pub fn description_str(&self) -> &str {
        let text = self
            .description
            .split(|&byte| byte == 0)
            .next()
            .unwrap_or(&[]);
        match core::str::from_utf8(text) {
            Ok(text) => text,
            Err(err) => text
                .get(..err.valid_up_to())
                .and_then(|valid| core::str::from_utf8(valid).ok())
                .unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SectionRecord {
    pub address: u32,
    pub length: u32,
}

impl SectionRecord {
    pub fn encode(&self) -> [u8; SECTION_RECORD_SIZE] {
        let mut bytes = [0u8; SECTION_RECORD_SIZE];
        let (address, length) = bytes.split_at_mut(4);
        address.copy_from_slice(&self.address.to_le_bytes());
        length.copy_from_slice(&self.length.to_le_bytes());
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut input = FieldReader::new(bytes);
        Some(Self {
            address: input.u32()?,
            length: input.u32()?,
        })
    }
}

/// Reads the header of the image at `offset` without checking it.
pub fn read_header<F: ReadNorFlash>(
    flash: &mut F,
    offset: Address,
) -> Result<ImageHeader, BootError> {
    let mut bytes = [0u8; IMAGE_HEADER_SIZE];
    flash
        .read(offset, &mut bytes)
        .map_err(|e| map_flash_error(e, BootErrorKind::FlashRead))?;
    ImageHeader::decode(&bytes).ok_or(BootError::new(BootErrorKind::FlashRead))
}

/// Why an image was turned down. Only ever logged.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Rejection {
    NoImage,
    Unreadable { at: Address },
    BadMagic { found: u32 },
    TooManySections { count: u32 },
    EntryOutOfRange { entry: u32 },
    UnalignedSection { index: u32, length: u32 },
    PastEndOfAddressSpace,
    ChecksumMismatch { computed: u32, stored: u32 },
}

impl Rejection {
    fn log(self, offset: Address) {
        match self {
            Rejection::NoImage => debug!("no image at {:#x}", offset),
            Rejection::Unreadable { at } => {
                warn!("image at {:#x}: read failed at {:#x}", offset, at)
            }
            Rejection::BadMagic { found } => {
                warn!("image at {:#x}: bad magic {:#x}", offset, found)
            }
            Rejection::TooManySections { count } => {
                warn!("image at {:#x}: {} sections", offset, count)
            }
            Rejection::EntryOutOfRange { entry } => {
                warn!("image at {:#x}: entry {:#x} out of range", offset, entry)
            }
            Rejection::UnalignedSection { index, length } => {
                warn!("image at {:#x}: section {} length {:#x}", offset, index, length)
            }
            Rejection::PastEndOfAddressSpace => {
                warn!("image at {:#x}: runs past the end of flash", offset)
            }
            Rejection::ChecksumMismatch { computed, stored } => warn!(
                "image at {:#x}: checksum {:#x}, stored {:#x}",
                offset, computed, stored
            ),
        }
    }
}

/// Checks images for structural sanity and an intact checksum.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ImageVerifier {
    entry_range: Range<u32>,
    max_sections: u32,
}

impl ImageVerifier {
    pub fn new(entry_range: Range<u32>, max_sections: u32) -> Self {
        Self {
            entry_range,
            max_sections,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.entry_range.clone(), settings.max_sections)
    }

    /// The image's entry point if the image at `offset` is intact.
    pub fn verify<F: ReadNorFlash>(&self, flash: &mut F, offset: Address) -> Option<u32> {
        match self.check(flash, offset) {
            Ok(entry) => Some(entry),
            Err(rejection) => {
                rejection.log(offset);
                None
            }
        }
    }

    fn check<F: ReadNorFlash>(&self, flash: &mut F, offset: Address) -> Result<u32, Rejection> {
        if offset == 0 || offset == u32::MAX {
            return Err(Rejection::NoImage);
        }
        let mut scratch = [0u8; SCRATCH_SIZE];
        let mut sum = WordSum::new();
        let mut cursor = Cursor { pos: offset };

        let header_bytes = scratch
            .get_mut(..IMAGE_HEADER_SIZE)
            .ok_or(Rejection::PastEndOfAddressSpace)?;
        cursor.read(flash, header_bytes)?;
        let header = ImageHeader::decode(header_bytes).ok_or(Rejection::Unreadable { at: offset })?;
        if header.magic != IMAGE_MAGIC {
            return Err(Rejection::BadMagic { found: header.magic });
        }
        if header.count > self.max_sections {
            return Err(Rejection::TooManySections {
                count: header.count,
            });
        }
        if !self.entry_range.contains(&header.entry) {
            return Err(Rejection::EntryOutOfRange {
                entry: header.entry,
            });
        }
        sum.add_bytes(header_bytes);

        for index in 0..header.count {
            let mut record = [0u8; SECTION_RECORD_SIZE];
            cursor.read(flash, &mut record)?;
            let section = SectionRecord::decode(&record)
                .ok_or(Rejection::Unreadable { at: cursor.pos })?;
            if section.length % 4 != 0 {
                return Err(Rejection::UnalignedSection {
                    index,
                    length: section.length,
                });
            }
            sum.add_word(section.address);
            sum.add_word(section.length);

            let mut remaining = section.length as usize;
            while remaining > 0 {
                let chunk = scratch
                    .get_mut(..remaining.min(SCRATCH_SIZE))
                    .ok_or(Rejection::PastEndOfAddressSpace)?;
                cursor.read(flash, chunk)?;
                sum.add_bytes(chunk);
                remaining = remaining.saturating_sub(chunk.len());
            }
        }

        let mut trailer = [0u8; 4];
        cursor.read(flash, &mut trailer)?;
        let stored = u32::from_le_bytes(trailer);
        if stored != sum.value() {
            return Err(Rejection::ChecksumMismatch {
                computed: sum.value(),
                stored,
            });
        }
        Ok(header.entry)
    }
}

impl Default for ImageVerifier {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

struct Cursor {
    pos: Address,
}

impl Cursor {
    fn read<F: ReadNorFlash>(&mut self, flash: &mut F, buf: &mut [u8]) -> Result<(), Rejection> {
        let len = u32::try_from(buf.len()).map_err(|_| Rejection::PastEndOfAddressSpace)?;
        let next = self
            .pos
            .checked_add(len)
            .ok_or(Rejection::PastEndOfAddressSpace)?;
        flash
            .read(self.pos, buf)
            .map_err(|_| Rejection::Unreadable { at: self.pos })?;
        self.pos = next;
        Ok(())
    }
}
