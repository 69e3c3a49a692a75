#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! Second-stage boot support for a microcontroller booting from external
//! serial flash.
//!
//! The crate picks which of several flashed images to run, proves each
//! candidate's integrity before handing it off, keeps boot decisions in a
//! flash-resident [`layout::BootConfig`] and a warm-reset-surviving
//! [`layout::RetainedBootState`], and streams firmware updates into flash
//! through a single [`write_session::FlashWriter`].
//!
//! Hardware is reached only through traits: flash through
//! `embedded-storage`'s `NorFlash`, retained memory through
//! [`retained::RetainedMemory`] and the boot pin through [`pins::BootPins`].

#[macro_use]
mod logging;

pub mod checksum;
pub mod config_store;
pub mod control;
pub mod error;
pub mod geometry;
pub mod image;
pub mod layout;
pub mod mem;
pub mod pins;
pub mod retained;
pub mod selector;
pub mod settings;
pub mod write_session;

pub use control::BootControl;
pub use error::{BootError, BootErrorKind};
pub use selector::{BootSelector, BootTarget};
pub use settings::Settings;

/// Size of one erasable flash sector in bytes.
pub const SECTOR_SIZE: usize = 0x1000;

/// Machine word size. Every flash program operation is a whole number of words.
pub const WORD_SIZE: usize = 4;

/// Number of image slots in the boot table.
pub const MAX_ROMS: usize = 4;

/// Flash byte offset of an image slot.
pub type Address = u32;

#[cfg(test)]
mod test;
