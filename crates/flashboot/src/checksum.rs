//! The two checksum disciplines used on flash and retained data.
//!
//! `checksum8` protects the small persisted records; [`WordSum`] is the
//! additive word checksum carried by every boot image. They are not
//! interchangeable.

/// Seed for [`checksum8`].
pub const CHECKSUM8_INIT: u8 = 0xEF;

/// XOR of [`CHECKSUM8_INIT`] with every byte in `bytes`.
pub fn checksum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(CHECKSUM8_INIT, |acc, &byte| acc ^ byte)
}

/// Running 32-bit wrapping sum of little-endian words.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct WordSum(u32);

impl WordSum {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn add_word(&mut self, word: u32) {
        self.0 = self.0.wrapping_add(word);
    }

    /// Adds every complete word of `bytes`. A trailing partial word is ignored;
    /// callers only pass word multiples.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks_exact(4) {
            if let Ok(word) = <[u8; 4]>::try_from(chunk) {
                self.add_word(u32::from_le_bytes(word));
            }
        }
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}
