//! # CTR (3DS) NTR Slot
//!
//! The 3DS ARM9 reaches the game card through its own copy of the NTR slot
//! controller. Unlike the DS it can detect the card and power the slot, so
//! reset here is a full power cycle.
//!
//! ## Power sequence
//!
//! 1. CARDCONF2 = 0x0C, wait for the slot to report off (0)
//! 2. CARDCONF2 = 0x04 then 0x08, waiting for each to stick
//! 3. Route the slot to the NTR controller, pulse RESET, enable the
//!    controller, and latch a zero KEY2 seed

use super::regs::{self, RomCnt, SlotRegisters};
use super::{io_delay, BlockSize, Platform, PlatformConfig};
use crate::flags::NtrFlags;
use crate::{CardError, CardResult};

/// CTR register addresses
pub mod addr {
    /// Card configuration (slot routing)
    pub const CARDCONF: usize = 0x1000_000C;
    /// Card power / detect (8-bit)
    pub const CARDCONF2: usize = 0x1000_0010;
    /// CTR card security control
    pub const CTRCARD_SECCNT: usize = 0x1000_4008;
    /// NTR controller enable (MCNT)
    pub const MCNT: usize = 0x1016_4000;
    /// ROMCNT
    pub const ROMCNT: usize = 0x1016_4004;
    /// Command bytes
    pub const COMMAND: usize = 0x1016_4008;
    /// KEY2 seed X low word
    pub const SEED_X_LO: usize = 0x1016_4010;
    /// KEY2 seed Y low word
    pub const SEED_Y_LO: usize = 0x1016_4014;
    /// KEY2 seed X high bits
    pub const SEED_X_HI: usize = 0x1016_4018;
    /// KEY2 seed Y high bits
    pub const SEED_Y_HI: usize = 0x1016_401A;
    /// Data FIFO
    pub const FIFO: usize = 0x1016_401C;
}

/// CARDCONF2 values
pub mod cardconf2 {
    /// Slot is empty
    pub const NO_CARD: u8 = 0x1;
    /// Request power off
    pub const POWER_OFF_REQ: u8 = 0xC;
    /// Power on, reset asserted
    pub const POWER_ON_RESET: u8 = 0x4;
    /// Power on
    pub const POWER_ON: u8 = 0x8;
    /// Slot is off
    pub const OFF: u8 = 0x0;
}

/// MCNT bits
pub mod mcnt {
    /// Controller enable
    pub const CR1_ENABLE: u16 = 0x8000;
    /// Transfer ready IRQ enable
    pub const CR1_IRQ: u16 = 0x4000;
}

/// CARDCONF slot routing field
const CARDCONF_MODE_MASK: u16 = 0x3;
/// CARDCONF bit selecting the CTR card interface
const CARDCONF_CTR_SELECT: u16 = 0x100;
/// SECCNT bit left over from CTR card mode
const SECCNT_CTR_MODE: u32 = 0x4;

/// Card detect as reported in CARDCONF2
const fn reports_card(cardconf2: u8) -> bool {
    cardconf2 & cardconf2::NO_CARD == 0
}

const SLOT: SlotRegisters = SlotRegisters {
    romcnt: addr::ROMCNT,
    command: addr::COMMAND,
    seed_x_lo: addr::SEED_X_LO,
    seed_y_lo: addr::SEED_Y_LO,
    seed_x_hi: addr::SEED_X_HI,
    seed_y_hi: addr::SEED_Y_HI,
    fifo: addr::FIFO,
};

/// 3DS NTR slot platform
#[derive(Debug)]
pub struct CtrPlatform {
    config: PlatformConfig,
}

impl CtrPlatform {
    /// Create the NTR slot platform
    ///
    /// # Safety
    /// Must run on the 3DS ARM9 with the I/O region mapped, and at most one
    /// instance may exist at a time.
    pub unsafe fn new(config: PlatformConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub const fn config(&self) -> &PlatformConfig {
        &self.config
    }

    fn cardconf2(&self) -> u8 {
        // SAFETY: the I/O region is mapped per the constructor contract
        unsafe { regs::read8(addr::CARDCONF2) }
    }

    fn set_cardconf2(&self, value: u8) {
        // SAFETY: see cardconf2
        unsafe { regs::write8(addr::CARDCONF2, value) }
    }

    fn modify_cardconf(&self, clear: u16) {
        // SAFETY: see cardconf2
        unsafe {
            let value = regs::read16(addr::CARDCONF);
            regs::write16(addr::CARDCONF, value & !clear);
        }
    }

    fn mcnt(&self) -> u16 {
        // SAFETY: see cardconf2
        unsafe { regs::read16(addr::MCNT) }
    }

    fn set_mcnt(&self, value: u16) {
        // SAFETY: see cardconf2
        unsafe { regs::write16(addr::MCNT, value) }
    }

    /// Whether a card is in the slot
    pub fn card_inserted(&self) -> bool {
        reports_card(self.cardconf2())
    }

    /// Block until a card is inserted
    pub fn wait_for_card(&self) {
        while !self.card_inserted() {
            core::hint::spin_loop();
        }
    }

    fn wait_cardconf2(&self, expected: u8) -> CardResult<()> {
        for _ in 0..self.config.poll_limit {
            if self.cardconf2() == expected {
                return Ok(());
            }
        }
        log::warn!(
            "card: CARDCONF2 stuck at {:#04x}, expected {:#04x}",
            self.cardconf2(),
            expected
        );
        Err(CardError::ResetTimeout)
    }

    fn power_cycle(&self) -> CardResult<()> {
        self.set_cardconf2(cardconf2::POWER_OFF_REQ);
        self.modify_cardconf(CARDCONF_MODE_MASK);
        if self.cardconf2() == cardconf2::POWER_OFF_REQ {
            self.wait_cardconf2(cardconf2::OFF)?;
        }
        if self.cardconf2() != cardconf2::OFF {
            log::warn!("card: slot did not power off (CARDCONF2 {:#04x})", self.cardconf2());
            return Err(CardError::ResetTimeout);
        }

        self.set_cardconf2(cardconf2::POWER_ON_RESET);
        self.wait_cardconf2(cardconf2::POWER_ON_RESET)?;
        self.set_cardconf2(cardconf2::POWER_ON);
        self.wait_cardconf2(cardconf2::POWER_ON)
    }
}

impl Platform for CtrPlatform {
    fn reset(&mut self) -> CardResult<()> {
        if !self.card_inserted() {
            return Err(CardError::CardAbsent);
        }

        self.power_cycle()?;

        // SAFETY: see cardconf2
        unsafe {
            let seccnt = regs::read32(addr::CTRCARD_SECCNT);
            regs::write32(addr::CTRCARD_SECCNT, seccnt & !SECCNT_CTR_MODE);
        }
        io_delay(self.config.reset_delay);

        SLOT.set_romcnt(RomCnt::NRESET);
        self.modify_cardconf(CARDCONF_MODE_MASK);
        self.modify_cardconf(CARDCONF_CTR_SELECT);
        self.set_mcnt(mcnt::CR1_ENABLE);
        io_delay(self.config.reset_delay);

        SLOT.set_romcnt(RomCnt::empty());
        self.set_mcnt(self.mcnt() & 0xFF);
        io_delay(self.config.reset_delay);

        self.set_mcnt(self.mcnt() | mcnt::CR1_ENABLE | mcnt::CR1_IRQ);
        SLOT.set_romcnt(RomCnt::NRESET | RomCnt::SEC_SEED);
        SLOT.wait_idle(self.config.poll_limit)?;

        log::debug!("card: CTR slot powered and out of reset");
        Ok(())
    }

    fn send_command(
        &mut self,
        command: u64,
        size: BlockSize,
        dest: &mut [u8],
        flags: NtrFlags,
    ) -> CardResult<usize> {
        if !self.card_inserted() {
            log::warn!("card: removed before command {:#018x}", command);
            return Err(CardError::CardAbsent);
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_detect() {
        assert!(!reports_card(cardconf2::NO_CARD));
        assert!(!reports_card(cardconf2::NO_CARD | cardconf2::POWER_ON));
        assert!(reports_card(cardconf2::OFF));
        assert!(reports_card(cardconf2::POWER_ON));
    }
}
