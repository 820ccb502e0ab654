//! # Card Protocol Engine
//!
//! [`NtrCard`] owns one [`Platform`] and the session state for the card in
//! its slot, and walks the card through the three encryption stages:
//!
//! ```text
//!   (new) ──init──► Raw ──begin_key1──► Key1 ──begin_key2──► Key2
//!     │              ▲                                        │
//!     └── Unknown ◄──┴────── any bus failure or rejection ────┘
//! ```
//!
//! Stages only move forward. The only way back is `init`, which resets the
//! slot. After a failure the session is `Unknown` and every operation other
//! than `init` is refused.

use crate::flags::NtrFlags;
use crate::header::{Header, HEADER_SIZE};
use crate::key1::Key1Table;
use crate::key2::{self, Key2Keystream};
use crate::platform::{BlockSize, Platform};
use crate::{CardError, CardResult};

/// Secure area length in bytes
pub const SECURE_AREA_SIZE: usize = 0x4000;

/// Card address of the secure area
pub const SECURE_AREA_START: u32 = 0x4000;

/// Card command encodings
pub mod cmd {
    /// Raw: dummy clocks
    pub const DUMMY: u64 = 0x9F00_0000_0000_0000;
    /// Raw: chip id
    pub const CHIP_ID: u64 = 0x9000_0000_0000_0000;
    /// Raw: enter KEY1 mode (`3Ciiijjjxkkkkkxx`)
    pub const ACTIVATE_KEY1: u64 = 0x3C00_0000_0000_0000;
    /// KEY2: chip id
    pub const KEY2_CHIP_ID: u64 = 0xB800_0000_0000_0000;

    /// KEY1: chip id (`1lllliiijjjkkkkk`)
    pub const KEY1_CHIP_ID: u8 = 0x1;
    /// KEY1: secure area block (`2bbbbiiijjjkkkkk`)
    pub const KEY1_SECURE_BLOCK: u8 = 0x2;
    /// KEY1: enable KEY2 (`4llllmmmnnnkkkkk`)
    pub const KEY1_ACTIVATE_KEY2: u8 = 0x4;
    /// KEY1: enter main data mode (`Alllliiijjjkkkkk`)
    pub const KEY1_ENTER_MAIN: u8 = 0xA;

    /// Raw: read data (`00aaaaaaaa000000`)
    pub const fn raw_read(address: u32) -> u64 {
        (address as u64) << 24
    }

    /// KEY2: read data (`B7aaaaaaaa000000`)
    pub const fn key2_read(address: u32) -> u64 {
        0xB700_0000_0000_0000 | ((address as u64) << 24)
    }
}

/// Encryption stage of the card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncryptionState {
    /// Unencrypted commands
    Raw,
    /// KEY1 (Blowfish) commands
    Key1,
    /// KEY2 stream-encrypted commands
    Key2,
    /// Not yet initialized, or lost after a failure
    Unknown,
}

/// Per-session KEY1 command values
///
/// The card only needs these to stay consistent within one session.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Key1Session {
    /// `iii`
    i: u16,
    /// `jjj`
    j: u16,
    /// `llll`
    l: u16,
    /// `mmmnnn`, also the KEY2 seed
    mn: u32,
    /// `kkkkk`, increments per KEY1 command
    k: u32,
}

impl Key1Session {
    const fn empty() -> Self {
        Self { i: 0, j: 0, l: 0, mn: 0, k: 0 }
    }

    fn derive(game_code: u32, chip_id: u32) -> Self {
        let mut state = game_code ^ chip_id.rotate_left(16) ^ 0x9E37_79B9;
        if state == 0 {
            state = 1;
        }
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        Self {
            i: (next() & 0xFFF) as u16,
            j: (next() & 0xFFF) as u16,
            l: next() as u16,
            mn: next() & 0xFF_FFFF,
            k: next() & 0xF_FFFF,
        }
    }

    fn ij(&self) -> u32 {
        (u32::from(self.i) << 12) | u32::from(self.j)
    }

    fn activate_command(&self) -> u64 {
        cmd::ACTIVATE_KEY1
            | (u64::from(self.i) << 44)
            | (u64::from(self.j) << 32)
            | (u64::from(self.k) << 8)
    }

    /// Plaintext KEY1 command; consumes one `kkkkk` value
    fn next_command(&mut self, op: u8, high: u16, middle: u32) -> u64 {
        let command = (u64::from(op & 0xF) << 60)
            | (u64::from(high) << 44)
            | (u64::from(middle & 0xFF_FFFF) << 20)
            | u64::from(self.k);
        self.k = (self.k + 1) & 0xF_FFFF;
        command
    }
}

/// A DS game card session over one platform
pub struct NtrCard<P: Platform> {
    platform: P,
    state: EncryptionState,
    header: Header,
    chip_id: u32,
    key_table: Option<Key1Table>,
    key_table_as_is: bool,
    key1: Option<Key1Table>,
    session: Key1Session,
    key2_stream: Option<Key2Keystream>,
    /// Secure area as read in KEY1 mode; KEY2 reads cannot reach it
    secure_area: [u8; SECURE_AREA_SIZE],
    secure_area_valid: bool,
}

impl<P: Platform> core::fmt::Debug for NtrCard<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NtrCard")
            .field("state", &self.state)
            .field("game_code", &format_args!("{:#010x}", self.header.game_code()))
            .field("chip_id", &format_args!("{:#010x}", self.chip_id))
            .field("hardware_key2", &self.platform.has_hardware_key2())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "ntr")]
static_assertions::assert_not_impl_any!(NtrCard<crate::platform::ntr::NtrPlatform>: Clone, Copy);
#[cfg(feature = "ctr")]
static_assertions::assert_not_impl_any!(NtrCard<crate::platform::ctr::CtrPlatform>: Clone, Copy);

impl<P: Platform> NtrCard<P> {
    /// Start a session over `platform`; call [`init`](Self::init) next
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            state: EncryptionState::Unknown,
            header: Header::empty(),
            chip_id: 0,
            key_table: None,
            key_table_as_is: false,
            key1: None,
            session: Key1Session::empty(),
            key2_stream: None,
            secure_area: [0; SECURE_AREA_SIZE],
            secure_area_valid: false,
        }
    }

    /// Current encryption stage
    pub const fn state(&self) -> EncryptionState {
        self.state
    }

    /// Header read during init
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Game code from the header
    pub fn game_code(&self) -> u32 {
        self.header.game_code()
    }

    /// Chip id reported by the raw `0x90` command
    pub const fn chip_id(&self) -> u32 {
        self.chip_id
    }

    /// Control word the header asks for in KEY1 mode
    pub fn key1_flags(&self) -> NtrFlags {
        self.header.key1_flags()
    }

    /// Control word the header asks for in KEY2 mode
    pub fn key2_flags(&self) -> NtrFlags {
        self.header.key2_flags()
    }

    /// Borrow the platform
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    /// Borrow the platform mutably
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// End the session and hand back the platform
    pub fn into_platform(self) -> P {
        self.platform
    }

    /// Supply the KEY1 table
    ///
    /// Unless `as_is` is set, the table is re-keyed with the game code (level
    /// 2, modulo 8) when KEY1 is entered. With `as_is` it is used unchanged.
    pub fn set_blowfish_state(&mut self, table: Key1Table, as_is: bool) {
        self.key_table = Some(table);
        self.key_table_as_is = as_is;
    }

    /// Reset the slot and read the card's identity
    ///
    /// With `header_first` the header is read straight after reset, before
    /// the dummy and chip id commands; some hosts need this order. The header
    /// is copied into `header_buf` when one is given.
    pub fn init(&mut self, header_buf: Option<&mut [u8]>, header_first: bool) -> CardResult<()> {
        self.state = EncryptionState::Unknown;
        self.header = Header::empty();
        self.chip_id = 0;
        self.key1 = None;
        self.key2_stream = None;
        self.secure_area_valid = false;

        let result = self.identify(header_first);
        self.track(result)?;

        if let Some(buf) = header_buf {
            let len = buf.len().min(HEADER_SIZE);
            buf[..len].copy_from_slice(&self.header.as_bytes()[..len]);
        }

        self.state = EncryptionState::Raw;
        log::info!(
            "card: raw mode, game code {:#010x}, chip id {:#010x}",
            self.header.game_code(),
            self.chip_id
        );
        Ok(())
    }

    /// Enter KEY1 mode
    pub fn begin_key1(&mut self) -> CardResult<()> {
        self.require(&[EncryptionState::Raw])?;
        let table = self.key_table.as_ref().ok_or(CardError::KeyScheduleMissing)?;
        let cipher = if self.key_table_as_is {
            table.clone()
        } else {
            table.keyed(self.header.game_code(), 2, 8)
        };
        self.key1 = Some(cipher);

        let result = self.key1_handshake();
        self.track(result)?;

        self.state = EncryptionState::Key1;
        log::info!("card: KEY1 mode");
        Ok(())
    }

    /// Enter KEY2 (main data) mode
    pub fn begin_key2(&mut self) -> CardResult<()> {
        self.require(&[EncryptionState::Key1])?;

        let result = self.key2_handshake();
        self.track(result)?;

        log::info!(
            "card: KEY2 mode ({} keystream)",
            if self.key2_stream.is_some() { "software" } else { "hardware" }
        );
        Ok(())
    }

    /// Send an arbitrary command
    ///
    /// `size` is the transfer length and must be a [`BlockSize`] class; `buf`
    /// may be shorter, in which case the rest of the data is discarded.
    /// Returns the number of bytes the card delivered.
    ///
    /// Unless `flags_as_is` is set the command is fitted to the current
    /// stage: KEY2 flags are stripped before KEY2, KEY1 commands are
    /// encrypted and given their gap, and in KEY2 the header's KEY2 flags are
    /// always added. With `flags_as_is` command and flags go out verbatim.
    pub fn send_command(
        &mut self,
        command: u64,
        buf: &mut [u8],
        size: usize,
        flags: NtrFlags,
        flags_as_is: bool,
    ) -> CardResult<usize> {
        let size = BlockSize::from_len(size)?;
        self.require(&[EncryptionState::Raw, EncryptionState::Key1, EncryptionState::Key2])?;

        let result = if flags_as_is {
            self.platform.send_command(command, size, buf, flags)
        } else {
            match self.state {
                EncryptionState::Key1 => self.key1_transfer(command, size, buf, flags.without_key2()),
                EncryptionState::Key2 => {
                    let flags = self.with_header_key2(flags);
                    self.key2_transfer(command, size, buf, flags)
                }
                _ => self.platform.send_command(command, size, buf, flags.without_key2()),
            }
        };
        self.track(result)
    }

    /// Read `buf.len()` bytes from card address `address`
    ///
    /// Uses the raw read in raw mode and the KEY2 read in KEY2 mode.
    pub fn read_data(&mut self, address: u32, buf: &mut [u8]) -> CardResult<()> {
        let size = buf.len();
        BlockSize::from_len(size)?;

        let (command, flags) = match self.state {
            EncryptionState::Raw => (cmd::raw_read(address), NtrFlags::RAW),
            EncryptionState::Key2 => (cmd::key2_read(address), self.header.key2_flags()),
            current => return Err(CardError::InvalidStateTransition { current }),
        };
        self.send_command(command, buf, size, flags, false)?;
        Ok(())
    }

    /// Read the 16KiB secure area (card 0x4000-0x7FFF)
    ///
    /// Only KEY1 commands reach the secure area: a KEY2 read below 0x8000 is
    /// redirected by the card to `0x8000 + (addr & 0x1FFF)`. The KEY1 read is
    /// therefore kept, and in KEY2 mode that copy is returned. Without one the
    /// KEY2 call fails with [`CardError::SecureAreaUnavailable`].
    pub fn read_secure_area(&mut self, buf: &mut [u8; SECURE_AREA_SIZE]) -> CardResult<()> {
        match self.state {
            EncryptionState::Key1 => {
                let result = self.read_secure_area_key1(buf);
                self.track(result)?;
                self.secure_area.copy_from_slice(buf);
                self.secure_area_valid = true;
                Ok(())
            }
            EncryptionState::Key2 if self.secure_area_valid => {
                buf.copy_from_slice(&self.secure_area);
                Ok(())
            }
            EncryptionState::Key2 => {
                log::warn!("card: secure area was not read in KEY1 mode");
                Err(CardError::SecureAreaUnavailable)
            }
            current => Err(CardError::InvalidStateTransition { current }),
        }
    }

    fn require(&self, allowed: &[EncryptionState]) -> CardResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CardError::InvalidStateTransition { current: self.state })
        }
    }

    /// Drop to `Unknown` on errors that leave the bus undetermined
    fn track<T>(&mut self, result: CardResult<T>) -> CardResult<T> {
        if let Err(err) = &result {
            if err.poisons_state() {
                log::warn!("card: {} in {:?} state, session lost", err, self.state);
                self.state = EncryptionState::Unknown;
                self.key1 = None;
                self.key2_stream = None;
            }
        }
        result
    }

    fn raw_transfer(&mut self, command: u64, size: BlockSize, dest: &mut [u8]) -> CardResult<usize> {
        self.platform.send_command(command, size, dest, NtrFlags::RAW)
    }

    fn identify(&mut self, header_first: bool) -> CardResult<()> {
        self.platform.reset()?;

        let mut raw = [0u8; HEADER_SIZE];
        if header_first {
            self.raw_transfer(cmd::raw_read(0), BlockSize::Bytes512, &mut raw)?;
        }

        self.raw_transfer(cmd::DUMMY, BlockSize::Bytes8K, &mut [])?;

        let mut id = [0u8; 4];
        self.raw_transfer(cmd::CHIP_ID, BlockSize::Word, &mut id)?;
        let chip_id = u32::from_le_bytes(id);
        if chip_id == 0xFFFF_FFFF {
            log::warn!("card: chip id reads as open bus");
            return Err(CardError::CardAbsent);
        }

        if !header_first {
            self.raw_transfer(cmd::raw_read(0), BlockSize::Bytes512, &mut raw)?;
        }

        self.chip_id = chip_id;
        self.header = Header::new(raw);
        self.session = Key1Session::derive(self.header.game_code(), chip_id);
        if !self.header.checksum_valid() {
            log::debug!("card: header checksum mismatch");
        }
        Ok(())
    }

    /// KEY1 flags with KEY2 off, for use before KEY2 is seeded
    fn key1_command_flags(&self) -> NtrFlags {
        self.header.key1_flags().without_key2()
    }

    /// Encrypt and send one KEY1 command
    ///
    /// Without gap clock pulses the card needs the command, a wait of
    /// `pre_delay` cycles, and the command again for the data phase.
    fn key1_transfer(
        &mut self,
        plain: u64,
        size: BlockSize,
        dest: &mut [u8],
        flags: NtrFlags,
    ) -> CardResult<usize> {
        let command = self
            .key1
            .as_ref()
            .ok_or(CardError::KeyScheduleMissing)?
            .encrypt_command(plain);

        if !flags.delay_pulse_clock() {
            self.platform.send_command(command, BlockSize::None, &mut [], flags)?;
            self.platform.io_delay(u32::from(flags.pre_delay()));
        }
        self.platform.send_command(command, size, dest, flags)
    }

    /// Send one KEY2 command, applying the keystream in software if needed
    fn key2_transfer(
        &mut self,
        command: u64,
        size: BlockSize,
        dest: &mut [u8],
        flags: NtrFlags,
    ) -> CardResult<usize> {
        let Some(stream) = self.key2_stream.as_mut() else {
            return self.platform.send_command(command, size, dest, flags);
        };

        let command = if flags.key2_command() {
            stream.apply_command(command)
        } else {
            command
        };
        let count = self.platform.send_command(command, size, dest, flags.without_key2())?;
        if flags.key2_response() {
            let kept = count.min(dest.len());
            stream.apply(&mut dest[..kept]);
            stream.skip(count - kept);
        }
        Ok(count)
    }

    fn with_header_key2(&self, flags: NtrFlags) -> NtrFlags {
        let header = self.header.key2_flags();
        flags
            .with_key2_command(flags.key2_command() || header.key2_command())
            .with_key2_response(flags.key2_response() || header.key2_response())
    }

    fn key1_handshake(&mut self) -> CardResult<()> {
        let activate = self.session.activate_command();
        self.raw_transfer(activate, BlockSize::None, &mut [])?;

        let flags = self.key1_command_flags();
        let plain = self
            .session
            .next_command(cmd::KEY1_CHIP_ID, self.session.l, self.session.ij());
        let mut id = [0u8; 4];
        self.key1_transfer(plain, BlockSize::Word, &mut id, flags)?;

        let reported = u32::from_le_bytes(id);
        if reported != self.chip_id {
            log::warn!(
                "card: KEY1 chip id {:#010x} does not match {:#010x}",
                reported,
                self.chip_id
            );
            return Err(CardError::HandshakeRejected { stage: EncryptionState::Key1 });
        }
        Ok(())
    }

    fn key2_handshake(&mut self) -> CardResult<()> {
        let flags = self.key1_command_flags();
        let mn = self.session.mn;

        let plain = self.session.next_command(cmd::KEY1_ACTIVATE_KEY2, self.session.l, mn);
        self.key1_transfer(plain, BlockSize::None, &mut [], flags)?;

        let (x, y) = key2::derive_seeds(mn, self.header.seed_select());
        if self.platform.has_hardware_key2() {
            self.platform.seed_key2(x, y);
        } else {
            self.key2_stream = Some(Key2Keystream::new(x, y));
        }

        let plain = self
            .session
            .next_command(cmd::KEY1_ENTER_MAIN, self.session.l, self.session.ij());
        self.key1_transfer(plain, BlockSize::None, &mut [], flags)?;
        self.state = EncryptionState::Key2;

        let flags = self
            .header
            .key2_flags()
            .with_key2_command(true)
            .with_key2_response(true);
        let mut id = [0u8; 4];
        self.key2_transfer(cmd::KEY2_CHIP_ID, BlockSize::Word, &mut id, flags)?;

        let reported = u32::from_le_bytes(id);
        if reported != self.chip_id {
            log::warn!(
                "card: KEY2 chip id {:#010x} does not match {:#010x}",
                reported,
                self.chip_id
            );
            return Err(CardError::HandshakeRejected { stage: EncryptionState::Key2 });
        }
        Ok(())
    }

    fn read_secure_area_key1(&mut self, buf: &mut [u8; SECURE_AREA_SIZE]) -> CardResult<()> {
        let flags = self.key1_command_flags();
        let first_block = (SECURE_AREA_START / 0x1000) as u16;

        for (n, block) in buf.chunks_exact_mut(0x1000).enumerate() {
            let plain = self.session.next_command(
                cmd::KEY1_SECURE_BLOCK,
                first_block + n as u16,
                self.session.ij(),
            );
            if flags.delay_pulse_clock() {
                self.key1_transfer(plain, BlockSize::Bytes4K, block, flags)?;
            } else {
                for chunk in block.chunks_exact_mut(0x200) {
                    self.key1_transfer(plain, BlockSize::Bytes512, chunk, flags)?;
                }
            }
        }
        Ok(())
    }
}
