//! # NTR (DS) Slot
//!
//! Slot-1 registers as seen from the DS ARM9. The DS has no way to power the
//! slot down by itself, so the actual card reset is delegated to a hook
//! supplied by the firmware (a cart swap prompt, a flashcart power control,
//! and so on).

use super::regs::{self, RomCnt, SlotRegisters};
use super::{io_delay, BlockSize, Platform, PlatformConfig};
use crate::flags::NtrFlags;
use crate::CardResult;

/// NTR register addresses
pub mod addr {
    /// AUXSPICNT high byte (slot enable / IRQ enable)
    pub const AUXSPICNT_HI: usize = 0x0400_01A1;
    /// ROMCNT
    pub const ROMCNT: usize = 0x0400_01A4;
    /// Command bytes
    pub const COMMAND: usize = 0x0400_01A8;
    /// KEY2 seed X low word
    pub const SEED_X_LO: usize = 0x0400_01B0;
    /// KEY2 seed Y low word
    pub const SEED_Y_LO: usize = 0x0400_01B4;
    /// KEY2 seed X high bits
    pub const SEED_X_HI: usize = 0x0400_01B8;
    /// KEY2 seed Y high bits
    pub const SEED_Y_HI: usize = 0x0400_01BA;
    /// Data FIFO
    pub const FIFO: usize = 0x0410_0010;
    /// External memory control
    pub const EXMEMCNT: usize = 0x0400_0204;
}

/// AUXSPICNT high byte bits
pub mod auxspicnt {
    /// Slot enable
    pub const ENABLE: u8 = 0x80;
    /// Transfer ready IRQ enable
    pub const IRQ: u8 = 0x40;
}

/// EXMEMCNT bit giving the ARM7 ownership of slot 1
const EXMEMCNT_SLOT1_ARM7: u16 = 1 << 11;

const SLOT: SlotRegisters = SlotRegisters {
    romcnt: addr::ROMCNT,
    command: addr::COMMAND,
    seed_x_lo: addr::SEED_X_LO,
    seed_y_lo: addr::SEED_Y_LO,
    seed_x_hi: addr::SEED_X_HI,
    seed_y_hi: addr::SEED_Y_HI,
    fifo: addr::FIFO,
};

/// Resets the physical card, however the host can manage it
pub type ResetHook = fn() -> CardResult<()>;

/// DS slot-1 platform
#[derive(Debug)]
pub struct NtrPlatform {
    config: PlatformConfig,
    reset_hook: Option<ResetHook>,
}

impl NtrPlatform {
    /// Create the slot-1 platform
    ///
    /// # Safety
    /// Must run on the DS ARM9 with the I/O region mapped, and at most one
    /// instance may exist at a time.
    pub unsafe fn new(reset_hook: Option<ResetHook>, config: PlatformConfig) -> Self {
        Self { config, reset_hook }
    }

    /// Active configuration
    pub const fn config(&self) -> &PlatformConfig {
        &self.config
    }

    fn claim_slot(&self) {
        // SAFETY: the I/O region is mapped per the constructor contract
        unsafe {
            let exmemcnt = regs::read16(addr::EXMEMCNT);
            regs::write16(addr::EXMEMCNT, exmemcnt & !EXMEMCNT_SLOT1_ARM7);
            regs::write8(addr::AUXSPICNT_HI, auxspicnt::ENABLE | auxspicnt::IRQ);
        }
    }
}

impl Platform for NtrPlatform {
    fn reset(&mut self) -> CardResult<()> {
        if let Some(hook) = self.reset_hook {
            hook()?;
        }

        self.claim_slot();
        SLOT.set_romcnt(RomCnt::NRESET | RomCnt::SEC_SEED);
        SLOT.wait_idle(self.config.poll_limit)?;

        log::debug!("card: NTR slot re-armed");
        Ok(())
    }

    fn send_command(
        &mut self,
        command: u64,
        size: BlockSize,
        dest: &mut [u8],
        flags: NtrFlags,
    ) -> CardResult<usize> {
        self.claim_slot();
        SLOT.transfer(&self.config, command, size, dest, flags)
    }

    fn io_delay(&mut self, cycles: u32) {
        io_delay(cycles);
    }

    fn seed_key2(&mut self, x: u64, y: u64) {
        SLOT.seed_key2(x, y);
    }

    fn has_hardware_key2(&self) -> bool {
        true
    }
}
