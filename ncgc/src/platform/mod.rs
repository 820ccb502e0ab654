//! # Platform Abstraction
//!
//! A [`Platform`] performs the raw bus cycles for one slot. The card engine is
//! generic over it, so the DS and 3DS register sets can coexist in one binary
//! and tests can substitute a recording double.
//!
//! ## Contract
//!
//! - `reset` leaves the slot powered, out of reset and idle
//! - `send_command` runs exactly one transaction and drains the whole FIFO
//! - `io_delay` never returns early and is never reordered around register
//!   accesses
//! - `seed_key2` is only called when `has_hardware_key2` is true

pub mod regs;

#[cfg(feature = "ctr")]
pub mod ctr;
#[cfg(feature = "ntr")]
pub mod ntr;

use crate::flags::NtrFlags;
use crate::{CardError, CardResult};

/// Slot backend
pub trait Platform {
    /// Power-cycle and re-arm the slot
    ///
    /// Fails with [`CardError::CardAbsent`] when the slot reports no card and
    /// [`CardError::ResetTimeout`] when the controller never becomes ready.
    fn reset(&mut self) -> CardResult<()>;

    /// Run one command transaction
    ///
    /// The FIFO is drained word by word into `dest`. Words beyond
    /// `dest.len()` are still read and then discarded. Returns the number of
    /// bytes read from the FIFO.
    fn send_command(
        &mut self,
        command: u64,
        size: BlockSize,
        dest: &mut [u8],
        flags: NtrFlags,
    ) -> CardResult<usize>;

    /// Busy-wait for roughly `cycles` bus cycles
    fn io_delay(&mut self, cycles: u32);

    /// Program the KEY2 seed registers
    fn seed_key2(&mut self, x: u64, y: u64);

    /// Whether the slot controller applies KEY2 itself
    fn has_hardware_key2(&self) -> bool;
}

/// Transfer block size classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockSize {
    /// No data phase
    None = 0,
    /// 0x200 bytes
    Bytes512 = 1,
    /// 0x400 bytes
    Bytes1K = 2,
    /// 0x800 bytes
    Bytes2K = 3,
    /// 0x1000 bytes
    Bytes4K = 4,
    /// 0x2000 bytes
    Bytes8K = 5,
    /// 0x4000 bytes
    Bytes16K = 6,
    /// 4 bytes
    Word = 7,
}

impl BlockSize {
    /// Map a byte count onto its class
    pub const fn from_len(len: usize) -> CardResult<Self> {
        match len {
            0 => Ok(BlockSize::None),
            4 => Ok(BlockSize::Word),
            0x200 => Ok(BlockSize::Bytes512),
            0x400 => Ok(BlockSize::Bytes1K),
            0x800 => Ok(BlockSize::Bytes2K),
            0x1000 => Ok(BlockSize::Bytes4K),
            0x2000 => Ok(BlockSize::Bytes8K),
            0x4000 => Ok(BlockSize::Bytes16K),
            _ => Err(CardError::UnsupportedSize(len)),
        }
    }

    /// Transfer length in bytes
    pub const fn len(self) -> usize {
        match self {
            BlockSize::None => 0,
            BlockSize::Word => 4,
            other => 0x100 << (other as u8),
        }
    }

    /// Whether the transfer has no data phase
    pub const fn is_empty(self) -> bool {
        matches!(self, BlockSize::None)
    }

    /// Value of the ROMCNT block size field (bits 24-26)
    pub const fn field(self) -> u32 {
        self as u32
    }
}

impl TryFrom<usize> for BlockSize {
    type Error = CardError;

    fn try_from(len: usize) -> CardResult<Self> {
        Self::from_len(len)
    }
}

/// Timing and polling bounds for the MMIO platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformConfig {
    /// Delay between slot power steps, in delay-loop iterations
    pub reset_delay: u32,
    /// Status polls before a wait is abandoned
    pub poll_limit: u32,
}

impl PlatformConfig {
    /// Defaults matching the stock power sequence
    pub const DEFAULT: PlatformConfig = PlatformConfig {
        reset_delay: 0x40000,
        poll_limit: 0x0100_0000,
    };

    /// Override the power step delay
    pub const fn with_reset_delay(mut self, reset_delay: u32) -> Self {
        self.reset_delay = reset_delay;
        self
    }

    /// Override the poll bound
    pub const fn with_poll_limit(mut self, poll_limit: u32) -> Self {
        self.poll_limit = poll_limit;
        self
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Busy-wait for `cycles` loop iterations
///
/// On ARM this is a two-instruction countdown in inline assembly. The asm
/// block is not marked `nomem`, so the compiler treats it as touching memory
/// and keeps it ordered with the surrounding volatile register accesses.
#[inline(never)]
pub fn io_delay(cycles: u32) {
    if cycles == 0 {
        return;
    }

    cfg_if::cfg_if! {
        if #[cfg(target_arch = "arm")] {
            // SAFETY: the loop only decrements a scratch register
            unsafe {
                core::arch::asm!(
                    "1:",
                    "subs {0}, {0}, #1",
                    "bne 1b",
                    inout(reg) cycles => _,
                    options(nostack)
                );
            }
        } else {
            let mut remaining = cycles;
            while core::hint::black_box(remaining) != 0 {
                core::hint::spin_loop();
                remaining -= 1;
            }
        }
    }
}
