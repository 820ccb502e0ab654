//! # Cartridge Header
//!
//! The first 0x200 bytes of the card, read in raw mode during init.

use crate::flags::NtrFlags;

/// Header size in bytes
pub const HEADER_SIZE: usize = 0x200;

/// Header field offsets
pub mod offsets {
    /// Game title, 12 ASCII bytes
    pub const TITLE: usize = 0x000;
    /// Game code, 4 ASCII bytes
    pub const GAME_CODE: usize = 0x00C;
    /// Maker code, 2 ASCII bytes
    pub const MAKER_CODE: usize = 0x010;
    /// Unit code (0 = NDS, 2 = NDS+DSi, 3 = DSi)
    pub const UNIT_CODE: usize = 0x012;
    /// KEY2 seed select (0-7)
    pub const SEED_SELECT: usize = 0x013;
    /// Device capacity (128KiB << n)
    pub const DEVICE_CAPACITY: usize = 0x014;
    /// ROM version
    pub const ROM_VERSION: usize = 0x01E;
    /// ROMCNT for normal (KEY2) commands
    pub const KEY2_ROMCNT: usize = 0x060;
    /// ROMCNT for KEY1 commands
    pub const KEY1_ROMCNT: usize = 0x064;
    /// Secure area delay in 131kHz units
    pub const SECURE_AREA_DELAY: usize = 0x06E;
    /// CRC16 of bytes 0x000..0x15E
    pub const HEADER_CRC: usize = 0x15E;
}

/// Raw cartridge header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header([u8; HEADER_SIZE]);

impl Header {
    /// Wrap a raw header block
    pub const fn new(raw: [u8; HEADER_SIZE]) -> Self {
        Self(raw)
    }

    /// Header of all zeroes, used before the card was read
    pub const fn empty() -> Self {
        Self([0; HEADER_SIZE])
    }

    /// Copy a header out of the start of a larger buffer
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self(raw))
    }

    /// Raw header bytes
    pub const fn as_bytes(&self) -> &[u8; HEADER_SIZE] {
        &self.0
    }

    fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.0[offset], self.0[offset + 1]])
    }

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.0[offset],
            self.0[offset + 1],
            self.0[offset + 2],
            self.0[offset + 3],
        ])
    }

    /// Game title bytes
    pub fn title(&self) -> &[u8] {
        &self.0[offsets::TITLE..offsets::TITLE + 12]
    }

    /// Game code as a little-endian word (KEY1 id code)
    pub fn game_code(&self) -> u32 {
        self.read_u32(offsets::GAME_CODE)
    }

    /// Maker code bytes
    pub fn maker_code(&self) -> [u8; 2] {
        [self.0[offsets::MAKER_CODE], self.0[offsets::MAKER_CODE + 1]]
    }

    /// Unit code
    pub const fn unit_code(&self) -> u8 {
        self.0[offsets::UNIT_CODE]
    }

    /// KEY2 seed select, 0-7
    pub const fn seed_select(&self) -> u8 {
        self.0[offsets::SEED_SELECT] & 0x7
    }

    /// Device capacity exponent
    pub const fn device_capacity(&self) -> u8 {
        self.0[offsets::DEVICE_CAPACITY]
    }

    /// Chip capacity in bytes
    pub fn capacity_bytes(&self) -> u64 {
        (128 * 1024u64).checked_shl(u32::from(self.device_capacity())).unwrap_or(0)
    }

    /// ROM version
    pub const fn rom_version(&self) -> u8 {
        self.0[offsets::ROM_VERSION]
    }

    /// Control word the card wants for KEY1 commands
    pub fn key1_flags(&self) -> NtrFlags {
        NtrFlags::new(self.read_u32(offsets::KEY1_ROMCNT))
    }

    /// Control word the card wants for normal (KEY2) commands
    pub fn key2_flags(&self) -> NtrFlags {
        NtrFlags::new(self.read_u32(offsets::KEY2_ROMCNT))
    }

    /// Secure area delay in 131kHz units
    pub fn secure_area_delay(&self) -> u16 {
        self.read_u16(offsets::SECURE_AREA_DELAY)
    }

    /// Stored header checksum
    pub fn header_crc(&self) -> u16 {
        self.read_u16(offsets::HEADER_CRC)
    }

    /// Check the stored checksum against the header contents
    pub fn checksum_valid(&self) -> bool {
        crc16(&self.0[..offsets::HEADER_CRC]) == self.header_crc()
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::empty()
    }
}

/// CRC-16 as used by the header (MODBUS: reflected 0x8005, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in data {
        crc ^= u16::from(*byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
