//! # KEY2 Encryption
//!
//! KEY2 is a pair of 39-bit LFSRs clocked once per byte on the bus. Hardware
//! platforms apply it in the slot controller once the seeds are programmed;
//! [`Key2Keystream`] is the same generator for platforms without one.

/// Seed registers are 39 bits wide
pub const SEED_MASK: u64 = 0x7F_FFFF_FFFF;

/// Fixed Y seed
pub const SEED_Y: u64 = 0x5C_879B_9B05;

/// Low byte of the X seed, chosen by header byte 0x013
pub const SEED_BYTES: [u8; 8] = [0xE8, 0x4D, 0x5A, 0xB1, 0x17, 0x8F, 0x99, 0xD5];

/// Derive the X/Y seed pair from the `mmmnnn` value sent with KEY1 command 4
pub const fn derive_seeds(mn: u32, seed_select: u8) -> (u64, u64) {
    let x = (((mn & 0xFF_FFFF) as u64) << 15)
        | 0x6000
        | SEED_BYTES[(seed_select & 0x7) as usize] as u64;
    (x & SEED_MASK, SEED_Y & SEED_MASK)
}

/// Reverse the low 39 bits of a seed
pub const fn reverse_seed(seed: u64) -> u64 {
    (seed & SEED_MASK).reverse_bits() >> (64 - 39)
}

/// Software KEY2 generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key2Keystream {
    x: u64,
    y: u64,
}

impl Key2Keystream {
    /// Start a stream from the seeds as written to the seed registers
    pub const fn new(seed_x: u64, seed_y: u64) -> Self {
        Self {
            x: reverse_seed(seed_x),
            y: reverse_seed(seed_y),
        }
    }

    /// Clock both registers once and return the key byte
    pub fn next_byte(&mut self) -> u8 {
        let x = self.x;
        let y = self.y;
        self.x = ((((x >> 5) ^ (x >> 17) ^ (x >> 18) ^ (x >> 31)) & 0xFF) + (x << 8)) & SEED_MASK;
        self.y = ((((y >> 5) ^ (y >> 23) ^ (y >> 18) ^ (y >> 31)) & 0xFF) + (y << 8)) & SEED_MASK;
        (self.x ^ self.y) as u8
    }

    /// Advance without producing output, e.g. for gap clock pulses
    pub fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.next_byte();
        }
    }

    /// XOR the stream over a buffer; the same call encrypts and decrypts
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.next_byte();
        }
    }

    /// Encrypt an 8-byte command, first bus byte first
    pub fn apply_command(&mut self, command: u64) -> u64 {
        let mut bytes = command.to_be_bytes();
        self.apply(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}
