//! Recording platform for engine tests

use crate::flags::NtrFlags;
use crate::header::{crc16, offsets, Header, HEADER_SIZE};
use crate::key1::Key1Table;
use crate::key2::{self, Key2Keystream};
use crate::platform::{BlockSize, Platform};
use crate::{CardError, CardResult};

/// Chip id the fake card reports
pub const CHIP_ID: u32 = 0x0000_1FC2;

/// What reaches the bus for one `send_command`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sent {
    pub command: u64,
    pub size: BlockSize,
    pub flags: NtrFlags,
}

/// A card that answers identity commands and fills everything else
///
/// With `key1` set it also decodes KEY1 commands: secure area blocks are
/// filled with their block number, and without `hardware_key2` it runs its own
/// KEY2 keystream from the seed carried by KEY1 command `4`. KEY2 reads are
/// filled with the 4KiB block index of the address, after the card's redirect
/// of addresses below 0x8000.
#[derive(Debug)]
pub struct FakePlatform {
    pub header: [u8; HEADER_SIZE],
    pub chip_id: u32,
    pub fill: u8,
    pub hardware_key2: bool,
    /// Error returned by the next resets
    pub reset_error: Option<CardError>,
    /// Fail the n-th transaction (1-based, counted over the whole run)
    pub fail_at: Option<usize>,
    /// Bytes withheld from every data phase
    pub short_by: usize,
    pub reject_key1: bool,
    pub reject_key2: bool,
    /// Card pulled from the slot: every transaction fails
    pub removed: bool,
    /// Schedule the card decodes KEY1 commands with
    pub key1: Option<Key1Table>,

    pub sent: Vec<Sent>,
    pub resets: usize,
    pub delays: Vec<u32>,
    pub seeds: Option<(u64, u64)>,
    key1_active: bool,
    card_key2: Option<Key2Keystream>,
    main_command: Option<u64>,
}

impl FakePlatform {
    pub fn new(header: [u8; HEADER_SIZE]) -> Self {
        Self {
            header,
            chip_id: CHIP_ID,
            fill: 0x5A,
            hardware_key2: true,
            reset_error: None,
            fail_at: None,
            short_by: 0,
            reject_key1: false,
            reject_key2: false,
            removed: false,
            key1: None,
            sent: Vec::new(),
            resets: 0,
            delays: Vec::new(),
            seeds: None,
            key1_active: false,
            card_key2: None,
            main_command: None,
        }
    }

    fn chip_id_reply(&self) -> u32 {
        let rejected = if self.seeds.is_some() || self.main_command.is_some() {
            self.reject_key2
        } else {
            self.key1_active && self.reject_key1
        };
        if rejected {
            !self.chip_id
        } else {
            self.chip_id
        }
    }
}

impl Platform for FakePlatform {
    fn reset(&mut self) -> CardResult<()> {
        self.resets += 1;
        self.key1_active = false;
        self.seeds = None;
        self.card_key2 = None;
        self.main_command = None;
        match self.reset_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn send_command(
        &mut self,
        command: u64,
        size: BlockSize,
        dest: &mut [u8],
        flags: NtrFlags,
    ) -> CardResult<usize> {
        self.sent.push(Sent { command, size, flags });
        if self.fail_at == Some(self.sent.len()) {
            return Err(CardError::BackendIo);
        }

        if self.removed {
            return Err(CardError::CardAbsent);
        }

        let software_key2 = !self.hardware_key2
            && self.main_command.is_some()
            && self.main_command != Some(command);
        let command = match self.card_key2.as_mut() {
            Some(stream) if software_key2 => stream.apply_command(command),
            _ => command,
        };

        let mut reply = [self.fill; 0x4000];
        let op = (command >> 56) as u8;
        match size {
            BlockSize::Word => reply[..4].copy_from_slice(&self.chip_id_reply().to_le_bytes()),
            BlockSize::Bytes512 if !self.key1_active && command == 0 => {
                reply[..HEADER_SIZE].copy_from_slice(&self.header);
            }
            _ if op == 0xB7 => {
                let mut address = (command >> 24) as u32;
                if address < 0x8000 {
                    address = 0x8000 + (address & 0x1FFF);
                }
                reply.fill((address >> 12) as u8);
            }
            _ => {}
        }

        if !self.key1_active && op == 0x3C {
            self.key1_active = true;
        } else if self.key1_active && self.main_command.is_none() {
            if let Some(table) = &self.key1 {
                let plain = table.decrypt_command(command);
                match plain >> 60 {
                    0x2 => reply.fill((plain >> 44) as u8),
                    0x4 => {
                        let mn = ((plain >> 20) & 0xFF_FFFF) as u32;
                        let seed_select = Header::new(self.header).seed_select();
                        let (x, y) = key2::derive_seeds(mn, seed_select);
                        self.card_key2 = Some(Key2Keystream::new(x, y));
                    }
                    0xA => self.main_command = Some(command),
                    _ => {}
                }
            }
        }

        let count = size.len().saturating_sub(self.short_by);
        if software_key2 {
            if let Some(stream) = self.card_key2.as_mut() {
                stream.apply(&mut reply[..count]);
            }
        }
        let kept = count.min(dest.len());
        dest[..kept].copy_from_slice(&reply[..kept]);
        Ok(count)
    }

    fn io_delay(&mut self, cycles: u32) {
        self.delays.push(cycles);
    }

    fn seed_key2(&mut self, x: u64, y: u64) {
        self.seeds = Some((x, y));
    }

    fn has_hardware_key2(&self) -> bool {
        self.hardware_key2
    }
}

/// Header with the given game code and control words, seed select 5 and a
/// valid checksum
pub fn sample_header(game_code: u32, key1_romcnt: u32, key2_romcnt: u32) -> [u8; HEADER_SIZE] {
    let mut raw = [0u8; HEADER_SIZE];
    raw[offsets::TITLE..offsets::TITLE + 8].copy_from_slice(b"NCGCTEST");
    raw[offsets::GAME_CODE..offsets::GAME_CODE + 4].copy_from_slice(&game_code.to_le_bytes());
    raw[offsets::SEED_SELECT] = 5;
    raw[offsets::KEY2_ROMCNT..offsets::KEY2_ROMCNT + 4].copy_from_slice(&key2_romcnt.to_le_bytes());
    raw[offsets::KEY1_ROMCNT..offsets::KEY1_ROMCNT + 4].copy_from_slice(&key1_romcnt.to_le_bytes());
    let crc = crc16(&raw[..offsets::HEADER_CRC]);
    raw[offsets::HEADER_CRC..offsets::HEADER_CRC + 2].copy_from_slice(&crc.to_le_bytes());
    raw
}
