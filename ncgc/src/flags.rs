//! # Control Word
//!
//! Typed view over the 32-bit ROMCNT value a transaction is issued with.
//!
//! Only the fields a caller may choose live here. The activate, reset,
//! write-enable, seed-apply and block-size bits belong to the platform and are
//! masked off when a transaction is dispatched.

/// Bit positions within the control word
pub mod bits {
    /// KEY1 gap 1, bits 0-12
    pub const PRE_DELAY_MASK: u32 = 0x1FFF;
    /// Data phase is KEY2 encrypted
    pub const KEY2_DATA: u32 = 13;
    /// Security enable
    pub const SECURITY_ENABLE: u32 = 14;
    /// KEY1 gap 2 shift
    pub const POST_DELAY_SHIFT: u32 = 16;
    /// KEY1 gap 2, bits 16-21 once shifted
    pub const POST_DELAY_MASK: u32 = 0x3F;
    /// Command phase is KEY2 encrypted
    pub const KEY2_COMMAND: u32 = 22;
    /// Slow (4.2MHz) transfer clock
    pub const SLOW_CLOCK: u32 = 27;
    /// Clock pulses (and KEY2 advance) during the gaps
    pub const DELAY_PULSE_CLOCK: u32 = 28;

    /// Every bit a caller may set
    pub const SETTINGS_MASK: u32 = PRE_DELAY_MASK
        | (POST_DELAY_MASK << POST_DELAY_SHIFT)
        | (1 << KEY2_DATA)
        | (1 << SECURITY_ENABLE)
        | (1 << KEY2_COMMAND)
        | (1 << SLOW_CLOCK)
        | (1 << DELAY_PULSE_CLOCK);
}

/// ROMCNT control word
///
/// Every mutator returns a new value, so settings compose by chaining:
///
/// ```
/// use ncgc::NtrFlags;
///
/// let flags = NtrFlags::new(0).with_pre_delay(0x8F8).with_key2_command(true);
/// assert!(flags.security_enable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct NtrFlags(u32);

impl NtrFlags {
    /// Control word for unencrypted commands: slow clock and the longest gaps
    pub const RAW: NtrFlags = NtrFlags(
        bits::PRE_DELAY_MASK
            | (bits::POST_DELAY_MASK << bits::POST_DELAY_SHIFT)
            | (1 << bits::SLOW_CLOCK),
    );

    /// Wrap a raw ROMCNT value
    #[inline]
    pub const fn new(romcnt: u32) -> Self {
        Self(romcnt)
    }

    /// Get the raw value
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Test a single bit
    #[inline]
    pub const fn bit(self, bit: u32) -> bool {
        self.0 & (1 << bit) != 0
    }

    /// Set or clear a single bit
    #[inline]
    pub const fn with_bit(self, bit: u32, set: bool) -> Self {
        let cleared = self.0 & !(1 << bit);
        Self(if set { cleared | (1 << bit) } else { cleared })
    }

    /// Delay before the response to a KEY1 command (KEY1 gap1)
    #[inline]
    pub const fn pre_delay(self) -> u16 {
        (self.0 & bits::PRE_DELAY_MASK) as u16
    }

    /// Delay after the response to a KEY1 command (KEY1 gap2)
    #[inline]
    pub const fn post_delay(self) -> u16 {
        ((self.0 >> bits::POST_DELAY_SHIFT) & bits::POST_DELAY_MASK) as u16
    }

    /// Clock pulses are sent, and KEY2 advanced, during the gaps
    #[inline]
    pub const fn delay_pulse_clock(self) -> bool {
        self.bit(bits::DELAY_PULSE_CLOCK)
    }

    /// The command phase is KEY2 encrypted
    #[inline]
    pub const fn key2_command(self) -> bool {
        self.bit(bits::KEY2_COMMAND) && self.bit(bits::SECURITY_ENABLE)
    }

    /// The data phase is KEY2 encrypted
    #[inline]
    pub const fn key2_response(self) -> bool {
        self.bit(bits::KEY2_DATA) && self.bit(bits::SECURITY_ENABLE)
    }

    /// Master enable for hardware KEY2
    #[inline]
    pub const fn security_enable(self) -> bool {
        self.bit(bits::SECURITY_ENABLE)
    }

    /// The slower transfer clock is used (usually for raw commands)
    #[inline]
    pub const fn slow_clock(self) -> bool {
        self.bit(bits::SLOW_CLOCK)
    }

    /// Set KEY1 gap1, truncated to 13 bits
    #[inline]
    pub const fn with_pre_delay(self, value: u16) -> Self {
        Self((self.0 & !bits::PRE_DELAY_MASK) | (value as u32 & bits::PRE_DELAY_MASK))
    }

    /// Set KEY1 gap2, truncated to 6 bits
    #[inline]
    pub const fn with_post_delay(self, value: u16) -> Self {
        let mask = bits::POST_DELAY_MASK << bits::POST_DELAY_SHIFT;
        Self((self.0 & !mask) | ((value as u32 & bits::POST_DELAY_MASK) << bits::POST_DELAY_SHIFT))
    }

    /// Set whether the gaps carry clock pulses
    #[inline]
    pub const fn with_delay_pulse_clock(self, value: bool) -> Self {
        self.with_bit(bits::DELAY_PULSE_CLOCK, value)
    }

    /// Set whether the command phase is KEY2 encrypted
    ///
    /// Security enable follows the OR of both KEY2 flags.
    #[inline]
    pub const fn with_key2_command(self, value: bool) -> Self {
        let other = self.bit(bits::KEY2_DATA);
        self.with_bit(bits::KEY2_COMMAND, value)
            .with_bit(bits::SECURITY_ENABLE, value || other)
    }

    /// Set whether the data phase is KEY2 encrypted
    ///
    /// Security enable follows the OR of both KEY2 flags.
    #[inline]
    pub const fn with_key2_response(self, value: bool) -> Self {
        let other = self.bit(bits::KEY2_COMMAND);
        self.with_bit(bits::KEY2_DATA, value)
            .with_bit(bits::SECURITY_ENABLE, value || other)
    }

    /// Set whether the slower transfer clock is used
    #[inline]
    pub const fn with_slow_clock(self, value: bool) -> Self {
        self.with_bit(bits::SLOW_CLOCK, value)
    }

    /// Clear both KEY2 flags and security enable
    #[inline]
    pub const fn without_key2(self) -> Self {
        self.with_key2_command(false).with_key2_response(false)
    }

    /// Only the bits a caller may choose
    #[inline]
    pub const fn settings(self) -> u32 {
        self.0 & bits::SETTINGS_MASK
    }
}

impl From<u32> for NtrFlags {
    fn from(romcnt: u32) -> Self {
        Self(romcnt)
    }
}

impl From<NtrFlags> for u32 {
    fn from(flags: NtrFlags) -> Self {
        flags.0
    }
}
