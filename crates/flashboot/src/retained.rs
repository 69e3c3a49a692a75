//! Retained-memory store for [`RetainedBootState`].

use crate::error::{BootError, BootErrorKind};
use crate::layout::{RETAINED_SIZE, RetainedBootState};

/// Memory that survives a warm reset but not power loss.
///
/// Offsets are in 32-bit words and buffers are a whole number of words.
pub trait RetainedMemory {
    type Error: core::fmt::Debug;

    fn read(&mut self, offset_words: u32, buf: &mut [u8]) -> Result<(), Self::Error>;
    fn write(&mut self, offset_words: u32, buf: &[u8]) -> Result<(), Self::Error>;
}

/// Reads and writes the boot record at a fixed word offset.
///
/// A successfully loaded or saved record is cached for the rest of the run;
/// the medium does not change under us between resets.
pub struct RetainedStore<R: RetainedMemory> {
    memory: R,
    offset_words: u32,
    cache: Option<RetainedBootState>,
}

impl<R: RetainedMemory> RetainedStore<R> {
    pub fn new(memory: R, offset_words: u32) -> Self {
        Self {
            memory,
            offset_words,
            cache: None,
        }
    }

    /// The current record, or `None` when the medium holds no valid one.
    pub fn load(&mut self) -> Option<RetainedBootState> {
        if let Some(state) = self.cache {
            return Some(state);
        }
        let mut bytes = [0u8; RETAINED_SIZE];
        if let Err(_err) = self.memory.read(self.offset_words, &mut bytes) {
            warn!("retained memory read failed");
            return None;
        }
        let state = RetainedBootState::decode(&bytes)?;
        self.cache = Some(state);
        Some(state)
    }

    pub fn save(&mut self, state: &RetainedBootState) -> Result<(), BootError> {
        // A failed write may have left the medium half-updated.
        self.cache = None;
        self.memory
            .write(self.offset_words, &state.encode())
            .map_err(|_| BootError::new(BootErrorKind::RetainedWrite))?;
        self.cache = Some(*state);
        Ok(())
    }

    /// Drops the cached record so the next [`load`](Self::load) reads the medium.
    pub fn invalidate_cache(&mut self) {
        self.cache = None;
    }

    pub fn memory_mut(&mut self) -> &mut R {
        &mut self.memory
    }

    pub fn into_inner(self) -> R {
        self.memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BootMode;
    use crate::mem::MemRetained;
    use crate::settings::DEFAULT_RETAINED_OFFSET_WORDS;

    const OFFSET: usize = DEFAULT_RETAINED_OFFSET_WORDS as usize * 4;

    fn temp_request() -> RetainedBootState {
        RetainedBootState {
            next_mode: BootMode::TempRom,
            next_rom: 1,
            ..RetainedBootState::default()
        }
    }

    #[test]
    fn blank_memory_loads_as_absent() {
        let mut backing = [0u8; 128];
        let mut store =
            RetainedStore::new(MemRetained::new(&mut backing), DEFAULT_RETAINED_OFFSET_WORDS);
        assert_eq!(store.load(), None);
    }

    #[test]
    fn save_then_load_round_trips_at_fixed_offset() {
        let mut backing = [0u8; 128];
        let mut store =
            RetainedStore::new(MemRetained::new(&mut backing), DEFAULT_RETAINED_OFFSET_WORDS);
        store.save(&temp_request()).expect("save");
        store.invalidate_cache();
        assert_eq!(store.load(), Some(temp_request()));
        drop(store);
        assert_eq!(
            RetainedBootState::decode(&backing[OFFSET..OFFSET + RETAINED_SIZE]),
            Some(temp_request())
        );
    }

    #[test]
    fn corrupting_any_byte_makes_the_record_absent() {
        let mut backing = [0u8; 128];
        {
            let mut store =
                RetainedStore::new(MemRetained::new(&mut backing), DEFAULT_RETAINED_OFFSET_WORDS);
            store.save(&temp_request()).expect("save");
        }
        for idx in OFFSET..OFFSET + RETAINED_SIZE {
            let mut corrupt = backing;
            corrupt[idx] ^= 0x40;
            let mut store =
                RetainedStore::new(MemRetained::new(&mut corrupt), DEFAULT_RETAINED_OFFSET_WORDS);
            assert_eq!(store.load(), None, "byte {idx}");
        }
    }

    #[test]
    fn cached_record_survives_later_read_failures() {
        let mut backing = [0u8; 128];
        let mut store =
            RetainedStore::new(MemRetained::new(&mut backing), DEFAULT_RETAINED_OFFSET_WORDS);
        store.save(&temp_request()).expect("save");
        store.memory_mut().set_fail(true);
        assert_eq!(store.load(), Some(temp_request()));
        store.invalidate_cache();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn failed_write_is_reported_and_clears_cache() {
        let mut backing = [0u8; 128];
        let mut store =
            RetainedStore::new(MemRetained::new(&mut backing), DEFAULT_RETAINED_OFFSET_WORDS);
        store.memory_mut().set_fail(true);
        let err = store.save(&temp_request()).expect_err("write must fail");
        assert_eq!(err.kind(), BootErrorKind::RetainedWrite);
        store.memory_mut().set_fail(false);
        assert_eq!(store.load(), None);
    }
}
