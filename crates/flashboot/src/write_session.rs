//! Streaming firmware writes into flash.
//!
//! Callers feed chunks of any size; only whole words reach the flash, the
//! remainder is carried into the next chunk, and each sector is erased the
//! first time a write reaches it. One [`FlashWriter`] hands out at most one
//! [`WriteSession`] at a time.

use core::sync::atomic::{AtomicU32, Ordering};

use embedded_storage::nor_flash::NorFlash;
use heapless::Vec;

use crate::error::{BootError, BootErrorKind, map_flash_error};
use crate::{Address, SECTOR_SIZE, WORD_SIZE};

const ERASED: u8 = 0xFF;
const SECTOR_BYTES: u32 = SECTOR_SIZE as u32;

/// Session ids are unique across every writer in the program.
static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(0);

/// Single-writer guard for [`WriteSession`]s.
#[derive(Debug, Default)]
pub struct FlashWriter {
    active: Option<u32>,
}

/// State of one in-progress write, owned by the caller between chunks.
#[derive(Debug)]
pub struct WriteSession {
    id: u32,
    start: Address,
    cursor: Address,
    end: Option<Address>,
    /// Highest sector index erased so far.
    erased_through: Option<u32>,
    carry: Vec<u8, WORD_SIZE>,
}

impl WriteSession {
    pub fn start(&self) -> Address {
        self.start
    }

    /// Address of the next byte that will reach flash.
    pub fn cursor(&self) -> Address {
        self.cursor
    }

    pub fn end(&self) -> Option<Address> {
        self.end
    }

    /// Bytes accepted but not yet written.
    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

impl FlashWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a session at `start`, which must be word aligned.
    ///
    /// Returns `None` while another session is open.
    pub fn open(&mut self, start: Address) -> Option<WriteSession> {
        self.open_session(start, None)
    }

    /// Like [`open`](Self::open), but no byte may land at or past `end`.
    pub fn open_bounded(&mut self, start: Address, end: Address) -> Option<WriteSession> {
        if end < start || !is_word_aligned(end) {
            warn!("write bound {:#x} invalid for start {:#x}", end, start);
            return None;
        }
        self.open_session(start, Some(end))
    }

    fn open_session(&mut self, start: Address, end: Option<Address>) -> Option<WriteSession> {
        if self.active.is_some() {
            warn!("write session already open");
            return None;
        }
        if !is_word_aligned(start) {
            warn!("write start {:#x} is not word aligned", start);
            return None;
        }
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        self.active = Some(id);
        debug!("write session opened at {:#x}", start);
        Some(WriteSession {
            id,
            start,
            cursor: start,
            end,
            erased_through: None,
            carry: Vec::new(),
        })
    }

    /// Appends `data` to the session.
    ///
    /// On error, [`cursor`](WriteSession::cursor) and
    /// [`pending`](WriteSession::pending) tell how much of `data` was taken:
    /// when the carried word reached flash before the failure, it and the
    /// bytes of `data` that completed it stay written, otherwise nothing of
    /// `data` was taken. Sectors erased along the way stay erased.
    pub fn write<F: NorFlash>(
        &mut self,
        flash: &mut F,
        session: &mut WriteSession,
        data: &[u8],
    ) -> Result<(), BootError> {
        self.check_owner(session)?;
        check_geometry::<F>()?;
        if data.is_empty() {
            return Ok(());
        }

        let carried = session.carry.len();
        let total = carried
            .checked_add(data.len())
            .ok_or(BootError::new(BootErrorKind::FlashOverrun))?;
        if let Some(end) = session.end {
            let accepted_end = u32::try_from(total)
                .ok()
                .and_then(|total| session.cursor.checked_add(total))
                .ok_or(BootError::new(BootErrorKind::FlashOverrun))?;
            if accepted_end > end {
                warn!("write to {:#x} passes session end {:#x}", accepted_end, end);
                return Err(BootError::new(BootErrorKind::FlashOverrun));
            }
        }

        let flush = total
            .checked_sub(total % WORD_SIZE)
            .ok_or(BootError::new(BootErrorKind::FlashOverrun))?;
        if flush == 0 {
            session
                .carry
                .extend_from_slice(data)
                .map_err(|_| BootError::new(BootErrorKind::FlashOverrun))?;
            return Ok(());
        }
        let flush_end = u32::try_from(flush)
            .ok()
            .and_then(|flush| session.cursor.checked_add(flush))
            .ok_or(BootError::new(BootErrorKind::OutOfBounds))?;
        ensure_erased(flash, session, flush_end)?;

        let mut rest = data;
        if carried > 0 {
            let (head, tail) = rest
                .split_at_checked(WORD_SIZE.saturating_sub(carried))
                .ok_or(BootError::new(BootErrorKind::FlashOverrun))?;
            let mut word = [0u8; WORD_SIZE];
            let (low, high) = word.split_at_mut(carried);
            low.copy_from_slice(&session.carry);
            high.copy_from_slice(head);
            let word_end = next_word(session.cursor)?;
            program(flash, session.cursor, &word)?;
            session.carry.clear();
            session.cursor = word_end;
            rest = tail;
        }
        let aligned_len = flush.saturating_sub(if carried > 0 { WORD_SIZE } else { 0 });
        let (aligned, tail) = rest
            .split_at_checked(aligned_len)
            .ok_or(BootError::new(BootErrorKind::FlashOverrun))?;
        if !aligned.is_empty() {
            program(flash, session.cursor, aligned)?;
        }

        session.carry.clear();
        session
            .carry
            .extend_from_slice(tail)
            .map_err(|_| BootError::new(BootErrorKind::FlashOverrun))?;
        session.cursor = flush_end;
        Ok(())
    }

    /// Flushes the carried bytes padded with `0xFF` and ends the session.
    ///
    /// The writer is released even when the final flush fails.
    pub fn close<F: NorFlash>(
        &mut self,
        flash: &mut F,
        mut session: WriteSession,
    ) -> Result<(), BootError> {
        self.check_owner(&session)?;
        self.active = None;
        debug!("write session closed at {:#x}", session.cursor);
        if session.carry.is_empty() {
            return Ok(());
        }
        check_geometry::<F>()?;
        let mut word = [ERASED; WORD_SIZE];
        let (low, _) = word.split_at_mut(session.carry.len());
        low.copy_from_slice(&session.carry);
        let word_end = next_word(session.cursor)?;
        ensure_erased(flash, &mut session, word_end)?;
        program(flash, session.cursor, &word)
    }

    /// Ends the session without writing the carried bytes.
    pub fn abort(&mut self, session: WriteSession) -> Result<(), BootError> {
        self.check_owner(&session)?;
        self.active = None;
        if !session.carry.is_empty() {
            warn!("write session aborted with {} bytes pending", session.carry.len());
        }
        Ok(())
    }

    fn check_owner(&self, session: &WriteSession) -> Result<(), BootError> {
        if self.active != Some(session.id) {
            return Err(BootError::new(BootErrorKind::SessionMismatch));
        }
        Ok(())
    }
}

fn is_word_aligned(address: Address) -> bool {
    address as usize % WORD_SIZE == 0
}

fn next_word(address: Address) -> Result<Address, BootError> {
    address
        .checked_add(WORD_SIZE as u32)
        .ok_or(BootError::new(BootErrorKind::OutOfBounds))
}

fn check_geometry<F: NorFlash>() -> Result<(), BootError> {
    if SECTOR_SIZE % F::ERASE_SIZE != 0 || WORD_SIZE % F::WRITE_SIZE != 0 {
        return Err(BootError::new(BootErrorKind::Unaligned));
    }
    Ok(())
}

/// Erases every sector up to the one holding byte `until - 1` that this
/// session has not erased yet.
fn ensure_erased<F: NorFlash>(
    flash: &mut F,
    session: &mut WriteSession,
    until: Address,
) -> Result<(), BootError> {
    let Some(last_byte) = until.checked_sub(1) else {
        return Ok(());
    };
    let last = last_byte / SECTOR_BYTES;
    let first = match session.erased_through {
        Some(done) => done.saturating_add(1),
        None => session.start / SECTOR_BYTES,
    };
    for sector in first..=last {
        let from = sector
            .checked_mul(SECTOR_BYTES)
            .ok_or(BootError::new(BootErrorKind::OutOfBounds))?;
        let to = from
            .checked_add(SECTOR_BYTES)
            .ok_or(BootError::new(BootErrorKind::OutOfBounds))?;
        flash
            .erase(from, to)
            .map_err(|e| map_flash_error(e, BootErrorKind::FlashErase))?;
        debug!("erased sector {}", sector);
        session.erased_through = Some(sector);
    }
    Ok(())
}

fn program<F: NorFlash>(flash: &mut F, at: Address, bytes: &[u8]) -> Result<(), BootError> {
    flash
        .write(at, bytes)
        .map_err(|e| map_flash_error(e, BootErrorKind::FlashWrite))
}
