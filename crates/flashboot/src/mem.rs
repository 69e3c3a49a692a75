//! In-memory stand-ins for the hardware collaborators.
//!
//! Each one borrows its backing buffer so the caller can inspect or corrupt
//! the raw bytes between operations. They back the unit tests and host-side
//! simulation of the boot flow.

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash, check_erase, check_read, check_write,
};

use crate::SECTOR_SIZE;
use crate::pins::BootPins;
use crate::retained::RetainedMemory;

/// NOR flash over a byte slice. Programming a byte that is not erased fails,
/// which catches writes that skipped their sector erase.
pub struct MemFlash<'a> {
    bytes: &'a mut [u8],
    erase_count: usize,
    fail_reads: bool,
    fail_writes: bool,
    fail_erases: bool,
    writes_left: Option<usize>,
}

impl<'a> MemFlash<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self {
            bytes,
            erase_count: 0,
            fail_reads: false,
            fail_writes: false,
            fail_erases: false,
            writes_left: None,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    /// Number of sectors erased since construction.
    pub fn erase_count(&self) -> usize {
        self.erase_count
    }

    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn set_fail_erases(&mut self, fail: bool) {
        self.fail_erases = fail;
    }

    /// Lets the next `count` programs through and fails every one after,
    /// until cleared with `None`.
    pub fn set_writes_before_failure(&mut self, count: Option<usize>) {
        self.writes_left = count;
    }
}

impl ErrorType for MemFlash<'_> {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash<'_> {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        if self.fail_reads {
            return Err(NorFlashErrorKind::Other);
        }
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        let src = self
            .bytes
            .get(start..end)
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl NorFlash for MemFlash<'_> {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        if self.fail_erases {
            return Err(NorFlashErrorKind::Other);
        }
        let region = self
            .bytes
            .get_mut(from as usize..to as usize)
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        region.fill(0xFF);
        let sectors = region.len() / SECTOR_SIZE;
        self.erase_count = self.erase_count.saturating_add(sectors);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        if self.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        match self.writes_left {
            Some(0) => return Err(NorFlashErrorKind::Other),
            Some(left) => self.writes_left = Some(left.saturating_sub(1)),
            None => {}
        }
        let start = offset as usize;
        let end = start
            .checked_add(bytes.len())
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        let region = self
            .bytes
            .get_mut(start..end)
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        if region.iter().any(|&byte| byte != 0xFF) {
            return Err(NorFlashErrorKind::Other);
        }
        region.copy_from_slice(bytes);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemRetainedError {
    Unaligned,
    OutOfBounds,
    Failed,
}

/// Word-addressed retained memory over a byte slice.
pub struct MemRetained<'a> {
    bytes: &'a mut [u8],
    fail: bool,
}

impl<'a> MemRetained<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes, fail: false }
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }

    pub fn set_fail(&mut self, fail: bool) {
        self.fail = fail;
    }

    fn region(&mut self, offset_words: u32, len: usize) -> Result<&mut [u8], MemRetainedError> {
        if self.fail {
            return Err(MemRetainedError::Failed);
        }
        if len % 4 != 0 {
            return Err(MemRetainedError::Unaligned);
        }
        let start = (offset_words as usize)
            .checked_mul(4)
            .ok_or(MemRetainedError::OutOfBounds)?;
        let end = start
            .checked_add(len)
            .ok_or(MemRetainedError::OutOfBounds)?;
        self.bytes
            .get_mut(start..end)
            .ok_or(MemRetainedError::OutOfBounds)
    }
}

impl RetainedMemory for MemRetained<'_> {
    type Error = MemRetainedError;

    fn read(&mut self, offset_words: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let region = self.region(offset_words, buf.len())?;
        buf.copy_from_slice(region);
        Ok(())
    }

    fn write(&mut self, offset_words: u32, buf: &[u8]) -> Result<(), Self::Error> {
        let region = self.region(offset_words, buf.len())?;
        region.copy_from_slice(buf);
        Ok(())
    }
}

/// Pin levels as a bitmask; bit `n` set means pin `n` is asserted.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct MemPins {
    asserted: u32,
}

impl MemPins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asserted(pin: u8) -> Self {
        let mut pins = Self::new();
        pins.set(pin, true);
        pins
    }

    pub fn set(&mut self, pin: u8, asserted: bool) {
        let Some(mask) = 1u32.checked_shl(u32::from(pin)) else {
            return;
        };
        if asserted {
            self.asserted |= mask;
        } else {
            self.asserted &= !mask;
        }
    }
}

impl BootPins for MemPins {
    fn pin_asserted(&mut self, pin: u8) -> bool {
        1u32.checked_shl(u32::from(pin))
            .is_some_and(|mask| self.asserted & mask != 0)
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn programming_unerased_flash_fails() {
        let mut backing = std::vec![0xFFu8; 2 * SECTOR_SIZE];
        let mut flash = MemFlash::new(&mut backing);
        flash.write(0, &[1, 2, 3, 4]).expect("first write");
        assert_eq!(flash.write(0, &[5, 6, 7, 8]), Err(NorFlashErrorKind::Other));
        flash.erase(0, SECTOR_SIZE as u32).expect("erase");
        flash.write(0, &[5, 6, 7, 8]).expect("write after erase");
        assert_eq!(flash.erase_count(), 1);
    }

    #[test]
    fn flash_rejects_unaligned_program() {
        let mut backing = std::vec![0xFFu8; SECTOR_SIZE];
        let mut flash = MemFlash::new(&mut backing);
        assert_eq!(flash.write(2, &[1, 2, 3, 4]), Err(NorFlashErrorKind::NotAligned));
        assert_eq!(flash.write(0, &[1, 2]), Err(NorFlashErrorKind::NotAligned));
    }

    #[test]
    fn retained_memory_is_word_addressed() {
        let mut backing = [0u8; 32];
        let mut mem = MemRetained::new(&mut backing);
        mem.write(2, &[9, 8, 7, 6]).expect("write");
        assert_eq!(&mem.bytes()[8..12], &[9, 8, 7, 6]);
        assert_eq!(mem.write(0, &[1, 2, 3]), Err(MemRetainedError::Unaligned));
        assert_eq!(mem.write(8, &[1, 2, 3, 4]), Err(MemRetainedError::OutOfBounds));
    }

    #[test]
    fn pins_report_asserted_bits() {
        let mut pins = MemPins::with_asserted(16);
        assert!(pins.pin_asserted(16));
        assert!(!pins.pin_asserted(0));
        pins.set(16, false);
        assert!(!pins.pin_asserted(16));
        assert!(!pins.pin_asserted(200));
    }
}
