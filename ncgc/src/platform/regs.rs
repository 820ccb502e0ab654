//! # Slot Controller Registers
//!
//! The DS and 3DS slot controllers share one ROMCNT layout and one
//! command/FIFO/seed block; only the base addresses differ. The routines here
//! run the common transaction and seeding sequences against either block.

use bitflags::bitflags;

use super::{BlockSize, PlatformConfig};
use crate::flags::NtrFlags;
use crate::{CardError, CardResult};

bitflags! {
    /// ROMCNT bits owned by the platform
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RomCnt: u32 {
        /// KEY1 gap 1 length
        const DELAY1 = 0x1FFF;
        /// Data phase KEY2 encrypted
        const SEC_DAT = 1 << 13;
        /// KEY2 master enable
        const SEC_EN = 1 << 14;
        /// Latch the seed registers into the KEY2 generator
        const SEC_SEED = 1 << 15;
        /// KEY1 gap 2 length
        const DELAY2 = 0x3F << 16;
        /// Command phase KEY2 encrypted
        const SEC_CMD = 1 << 22;
        /// FIFO holds a word (read side)
        const DATA_READY = 1 << 23;
        /// Block size field
        const BLK_SIZE = 0x7 << 24;
        /// 4.2MHz transfer clock instead of 6.7MHz
        const CLK_SLOW = 1 << 27;
        /// Clock pulses during the gaps
        const SEC_LARGE = 1 << 28;
        /// RESET line high
        const NRESET = 1 << 29;
        /// Card write enable
        const WR = 1 << 30;
        /// Start transfer; reads back set while busy
        const ACTIVATE = 1 << 31;
    }
}

impl RomCnt {
    /// Transfer in progress (chip select still low)
    pub const BUSY: RomCnt = RomCnt::ACTIVATE;

    /// Block size field for a transfer
    pub const fn block_size(size: BlockSize) -> RomCnt {
        RomCnt::from_bits_retain(size.field() << 24)
    }

    /// Control word that starts a transaction
    pub fn transfer(size: BlockSize, flags: NtrFlags) -> RomCnt {
        let mut romcnt = RomCnt::ACTIVATE
            | RomCnt::NRESET
            | RomCnt::block_size(size)
            | RomCnt::from_bits_retain(flags.settings());
        romcnt.set(RomCnt::SEC_EN, flags.key2_command() || flags.key2_response());
        romcnt
    }
}

/// Slot controller register addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRegisters {
    /// ROMCNT (32-bit)
    pub romcnt: usize,
    /// Command bytes (8 x 8-bit, first bus byte first)
    pub command: usize,
    /// KEY2 seed X bits 0-31
    pub seed_x_lo: usize,
    /// KEY2 seed Y bits 0-31
    pub seed_y_lo: usize,
    /// KEY2 seed X bits 32-38 (16-bit register)
    pub seed_x_hi: usize,
    /// KEY2 seed Y bits 32-38 (16-bit register)
    pub seed_y_hi: usize,
    /// Data FIFO (32-bit)
    pub fifo: usize,
}

impl SlotRegisters {
    fn read_romcnt(&self) -> RomCnt {
        // SAFETY: addresses come from a platform constructed under its own
        // safety contract
        RomCnt::from_bits_retain(unsafe { read32(self.romcnt) })
    }

    fn write_romcnt(&self, value: RomCnt) {
        // SAFETY: see read_romcnt
        unsafe { write32(self.romcnt, value.bits()) }
    }

    fn write_command(&self, command: u64) {
        for (i, byte) in command.to_be_bytes().into_iter().enumerate() {
            // SAFETY: see read_romcnt
            unsafe { write8(self.command + i, byte) }
        }
    }

    /// Spin until the controller drops BUSY
    pub fn wait_idle(&self, limit: u32) -> CardResult<()> {
        for _ in 0..limit {
            if !self.read_romcnt().contains(RomCnt::BUSY) {
                return Ok(());
            }
        }
        log::warn!("card: slot stayed busy after {} polls", limit);
        Err(CardError::ResetTimeout)
    }

    /// Write ROMCNT directly
    pub fn set_romcnt(&self, value: RomCnt) {
        self.write_romcnt(value);
    }

    /// Run one transaction and drain the FIFO
    pub fn transfer(
        &self,
        config: &PlatformConfig,
        command: u64,
        size: BlockSize,
        dest: &mut [u8],
        flags: NtrFlags,
    ) -> CardResult<usize> {
        let romcnt = RomCnt::transfer(size, flags);
        self.write_command(command);
        self.write_romcnt(romcnt);

        let mut count = 0usize;
        let mut polls = 0u32;
        loop {
            let status = self.read_romcnt();
            if status.contains(RomCnt::DATA_READY) {
                // SAFETY: see read_romcnt
                let word = unsafe { read32(self.fifo) }.to_le_bytes();
                if count < dest.len() {
                    let end = (count + 4).min(dest.len());
                    dest[count..end].copy_from_slice(&word[..end - count]);
                }
                count += 4;
                polls = 0;
            } else if !status.contains(RomCnt::BUSY) {
                break;
            } else {
                polls += 1;
                if polls >= config.poll_limit {
                    log::warn!(
                        "card: transfer {:#018x} stalled after {:#x} bytes (romcnt {:#010x})",
                        command,
                        count,
                        status.bits()
                    );
                    return Err(CardError::BackendIo);
                }
            }
        }

        log::debug!(
            "card: cmd {:#018x} romcnt {:#010x} -> {:#x} bytes",
            command,
            romcnt.bits(),
            count
        );
        Ok(count)
    }

    /// Program the KEY2 seeds and latch them
    pub fn seed_key2(&self, x: u64, y: u64) {
        self.write_romcnt(RomCnt::empty());
        // SAFETY: see read_romcnt
        unsafe {
            write32(self.seed_x_lo, x as u32);
            write32(self.seed_y_lo, y as u32);
            write16(self.seed_x_hi, ((x >> 32) & 0x7F) as u16);
            write16(self.seed_y_hi, ((y >> 32) & 0x7F) as u16);
        }
        self.write_romcnt(RomCnt::NRESET | RomCnt::SEC_SEED | RomCnt::SEC_EN | RomCnt::SEC_DAT);
    }
}

/// Volatile 8-bit register read
///
/// # Safety
/// `addr` must be a mapped, readable device register.
#[inline]
pub unsafe fn read8(addr: usize) -> u8 {
    unsafe { core::ptr::read_volatile(addr as *const u8) }
}

/// Volatile 8-bit register write
///
/// # Safety
/// `addr` must be a mapped, writable device register.
#[inline]
pub unsafe fn write8(addr: usize, value: u8) {
    unsafe { core::ptr::write_volatile(addr as *mut u8, value) }
}

/// Volatile 16-bit register read
///
/// # Safety
/// `addr` must be a mapped, readable, aligned device register.
#[inline]
pub unsafe fn read16(addr: usize) -> u16 {
    unsafe { core::ptr::read_volatile(addr as *const u16) }
}

/// Volatile 16-bit register write
///
/// # Safety
/// `addr` must be a mapped, writable, aligned device register.
#[inline]
pub unsafe fn write16(addr: usize, value: u16) {
    unsafe { core::ptr::write_volatile(addr as *mut u16, value) }
}

/// Volatile 32-bit register read
///
/// # Safety
/// `addr` must be a mapped, readable, aligned device register.
#[inline]
pub unsafe fn read32(addr: usize) -> u32 {
    unsafe { core::ptr::read_volatile(addr as *const u32) }
}

/// Volatile 32-bit register write
///
/// # Safety
/// `addr` must be a mapped, writable, aligned device register.
#[inline]
pub unsafe fn write32(addr: usize, value: u32) {
    unsafe { core::ptr::write_volatile(addr as *mut u32, value) }
}
