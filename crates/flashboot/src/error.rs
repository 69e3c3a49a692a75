use core::panic::Location;

use embedded_storage::nor_flash::{NorFlashError, NorFlashErrorKind};
use thiserror_no_std::Error;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
pub enum BootErrorKind {
    #[error("flash read failed")]
    FlashRead,
    #[error("flash sector erase failed")]
    FlashErase,
    #[error("flash program failed")]
    FlashWrite,
    #[error("address or length is not aligned for the flash device")]
    Unaligned,
    #[error("access outside the flash device")]
    OutOfBounds,
    #[error("retained memory read failed")]
    RetainedRead,
    #[error("retained memory write failed")]
    RetainedWrite,
    #[error("no valid boot configuration")]
    InvalidConfig,
    #[error("image index out of range")]
    InvalidIndex,
    #[error("a flash write session is already active")]
    SessionActive,
    #[error("write session does not belong to this writer")]
    SessionMismatch,
    #[error("write would pass the end of the session")]
    FlashOverrun,
    #[error("no bootable image found")]
    NoBootableImage,
}

/// An error together with the place it was raised.
#[derive(Error, Debug, Clone, Copy)]
#[error("{kind} ({location})")]
pub struct BootError {
    kind: BootErrorKind,
    location: &'static Location<'static>,
}

impl BootError {
    #[track_caller]
    pub fn new(kind: BootErrorKind) -> Self {
        Self {
            kind,
            location: Location::caller(),
        }
    }

    pub fn kind(&self) -> BootErrorKind {
        self.kind
    }

    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }
}

impl PartialEq for BootError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for BootError {}

impl From<BootErrorKind> for BootError {
    #[track_caller]
    fn from(kind: BootErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Maps a flash driver error onto the operation that produced it.
#[track_caller]
pub(crate) fn map_flash_error<E: NorFlashError>(error: E, operation: BootErrorKind) -> BootError {
    match error.kind() {
        NorFlashErrorKind::NotAligned => BootError::new(BootErrorKind::Unaligned),
        NorFlashErrorKind::OutOfBounds => BootError::new(BootErrorKind::OutOfBounds),
        _ => BootError::new(operation),
    }
}
