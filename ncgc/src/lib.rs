//! # ncgc - NTR Game Card Driver
//!
//! This crate drives a DS (NTR) game card over the cartridge bus, either from
//! DS ARM9 firmware or from the 3DS (CTR) NTR slot.
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  NtrCard       │  Raw → KEY1 → KEY2 state machine         │
//! ├──────────────────────────────────────────────────────────┤
//! │  Crypto        │  KEY1 (Blowfish)  │  KEY2 (seeds, LFSR)  │
//! ├──────────────────────────────────────────────────────────┤
//! │  NtrFlags      │  ROMCNT control word view                │
//! ├──────────────────────────────────────────────────────────┤
//! │  Platform      │  NTR registers  │  CTR registers         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The engine owns exactly one [`Platform`] and never talks to hardware
//! directly, so the same protocol code runs against either register set or a
//! test double.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod card;
pub mod flags;
pub mod header;
pub mod key1;
pub mod key2;
pub mod platform;

#[cfg(test)]
mod testing;

use core::fmt;

pub use card::{EncryptionState, NtrCard};
pub use flags::NtrFlags;
pub use header::Header;
pub use key1::Key1Table;
pub use platform::{BlockSize, Platform, PlatformConfig};

/// Result type for card operations
pub type CardResult<T> = Result<T, CardError>;

/// Errors reported by the card engine and its platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardError {
    /// No card in the slot
    CardAbsent,
    /// The slot controller never reached its ready state
    ResetTimeout,
    /// The card failed a KEY1 or KEY2 challenge
    HandshakeRejected {
        /// Stage that was being entered
        stage: EncryptionState,
    },
    /// Transfer size is not one of the block size classes
    UnsupportedSize(usize),
    /// Operation not permitted in the current encryption state
    InvalidStateTransition {
        /// State the card was in
        current: EncryptionState,
    },
    /// No KEY1 table was supplied before entering KEY1
    KeyScheduleMissing,
    /// KEY2 mode cannot address the secure area and no KEY1 copy exists
    SecureAreaUnavailable,
    /// Bus fault or unexpected controller status
    BackendIo,
}

impl CardError {
    /// Whether the engine must treat the bus as undetermined after this error
    pub const fn poisons_state(&self) -> bool {
        matches!(
            self,
            CardError::CardAbsent
                | CardError::ResetTimeout
                | CardError::HandshakeRejected { .. }
                | CardError::BackendIo
        )
    }
}

impl fmt::Display for CardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardError::CardAbsent => write!(f, "No card inserted"),
            CardError::ResetTimeout => write!(f, "Slot reset timed out"),
            CardError::HandshakeRejected { stage } => {
                write!(f, "Card rejected {:?} handshake", stage)
            }
            CardError::UnsupportedSize(size) => {
                write!(f, "Unsupported transfer size {:#x}", size)
            }
            CardError::InvalidStateTransition { current } => {
                write!(f, "Operation not allowed in {:?} state", current)
            }
            CardError::KeyScheduleMissing => write!(f, "KEY1 key table not set"),
            CardError::SecureAreaUnavailable => {
                write!(f, "Secure area was not read before KEY2")
            }
            CardError::BackendIo => write!(f, "Card bus I/O error"),
        }
    }
}

// Table sizes the protocol depends on
static_assertions::const_assert_eq!(header::HEADER_SIZE, 0x200);
static_assertions::const_assert_eq!(key1::KEY1_TABLE_WORDS * 4, 0x1048);
static_assertions::const_assert_eq!(card::SECURE_AREA_SIZE, 0x4000);
