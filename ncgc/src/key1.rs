//! # KEY1 Encryption
//!
//! KEY1 is Blowfish keyed with the 0x1048-byte table from the ARM7 BIOS
//! (0x30..0x1078), re-keyed with the game code before use.
//!
//! ## Table layout
//!
//! - words 0x000-0x011: P-array
//! - words 0x012-0x111: S-box 0
//! - words 0x112-0x211: S-box 1
//! - words 0x212-0x311: S-box 2
//! - words 0x312-0x411: S-box 3

/// Table size in words
pub const KEY1_TABLE_WORDS: usize = 0x1048 / 4;

const P_WORDS: usize = 0x12;
const SBOX_0: usize = 0x048 / 4;
const SBOX_1: usize = 0x448 / 4;
const SBOX_2: usize = 0x848 / 4;
const SBOX_3: usize = 0xC48 / 4;

/// KEY1 key table
#[derive(Clone, PartialEq, Eq)]
pub struct Key1Table {
    words: [u32; KEY1_TABLE_WORDS],
}

impl core::fmt::Debug for Key1Table {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Key1Table")
            .field("p0", &format_args!("{:#010x}", self.words[0]))
            .finish_non_exhaustive()
    }
}

impl Key1Table {
    /// Wrap a table given as words
    pub const fn new(words: [u32; KEY1_TABLE_WORDS]) -> Self {
        Self { words }
    }

    /// Load the table from little-endian bytes, e.g. the BIOS key area
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..KEY1_TABLE_WORDS * 4)?;
        let mut words = [0u32; KEY1_TABLE_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Some(Self { words })
    }

    /// Table words
    pub const fn words(&self) -> &[u32; KEY1_TABLE_WORDS] {
        &self.words
    }

    #[inline]
    fn feistel(&self, z: u32) -> u32 {
        let mut x = self.words[SBOX_0 + (z >> 24) as usize];
        x = self.words[SBOX_1 + ((z >> 16) & 0xFF) as usize].wrapping_add(x);
        x ^= self.words[SBOX_2 + ((z >> 8) & 0xFF) as usize];
        self.words[SBOX_3 + (z & 0xFF) as usize].wrapping_add(x)
    }

    /// Encrypt one 64-bit block in place
    pub fn encrypt_64bit(&self, block: &mut [u32; 2]) {
        let mut y = block[0];
        let mut x = block[1];
        for i in 0..0x10 {
            let z = self.words[i] ^ x;
            x = y ^ self.feistel(z);
            y = z;
        }
        block[0] = x ^ self.words[0x10];
        block[1] = y ^ self.words[0x11];
    }

    /// Decrypt one 64-bit block in place
    pub fn decrypt_64bit(&self, block: &mut [u32; 2]) {
        let mut y = block[0];
        let mut x = block[1];
        for i in (0x2..=0x11).rev() {
            let z = self.words[i] ^ x;
            x = y ^ self.feistel(z);
            y = z;
        }
        block[0] = x ^ self.words[1];
        block[1] = y ^ self.words[0];
    }

    fn apply_keycode(&mut self, keycode: &mut [u32; 3], modulo: usize) {
        let mut pair = [keycode[1], keycode[2]];
        self.encrypt_64bit(&mut pair);
        keycode[1] = pair[0];
        keycode[2] = pair[1];

        let mut pair = [keycode[0], keycode[1]];
        self.encrypt_64bit(&mut pair);
        keycode[0] = pair[0];
        keycode[1] = pair[1];

        for i in 0..P_WORDS {
            self.words[i] ^= keycode[(i * 4 % modulo) / 4].swap_bytes();
        }

        let mut scratch = [0u32; 2];
        for i in (0..KEY1_TABLE_WORDS).step_by(2) {
            self.encrypt_64bit(&mut scratch);
            self.words[i] = scratch[1];
            self.words[i + 1] = scratch[0];
        }
    }

    /// Re-key the table with an id code (normally the game code)
    ///
    /// `level` is 1-3 and `modulo` is 8 or 12 bytes. Card commands use level
    /// 2, modulo 8.
    pub fn init_keycode(&mut self, id: u32, level: u8, modulo: usize) {
        let modulo = if modulo >= 12 { 12 } else { 8 };
        let mut keycode = [id, id / 2, id.wrapping_mul(2)];
        if level >= 1 {
            self.apply_keycode(&mut keycode, modulo);
        }
        if level >= 2 {
            self.apply_keycode(&mut keycode, modulo);
        }
        keycode[1] <<= 1;
        keycode[2] >>= 1;
        if level >= 3 {
            self.apply_keycode(&mut keycode, modulo);
        }
    }

    /// Re-keyed copy of this table
    pub fn keyed(&self, id: u32, level: u8, modulo: usize) -> Self {
        let mut table = self.clone();
        table.init_keycode(id, level, modulo);
        table
    }

    /// Encrypt an 8-byte card command (first bus byte in the top bits)
    pub fn encrypt_command(&self, command: u64) -> u64 {
        let mut block = [command as u32, (command >> 32) as u32];
        self.encrypt_64bit(&mut block);
        (u64::from(block[1]) << 32) | u64::from(block[0])
    }

    /// Decrypt an 8-byte card command
    pub fn decrypt_command(&self, command: u64) -> u64 {
        let mut block = [command as u32, (command >> 32) as u32];
        self.decrypt_64bit(&mut block);
        (u64::from(block[1]) << 32) | u64::from(block[0])
    }
}

#[cfg(test)]
pub(crate) fn sample_table() -> Key1Table {
    let mut state = 0x2545_F491u32;
    let mut words = [0u32; KEY1_TABLE_WORDS];
    for word in words.iter_mut() {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        *word = state;
    }
    Key1Table::new(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_inverts_encrypt() {
        let table = sample_table();
        for seed in [0u32, 1, 0xDEAD_BEEF, 0x4141_4141] {
            let mut block = [seed, !seed];
            table.encrypt_64bit(&mut block);
            assert_ne!(block, [seed, !seed]);
            table.decrypt_64bit(&mut block);
            assert_eq!(block, [seed, !seed]);
        }
    }

    #[test]
    fn test_command_encryption() {
        let table = sample_table().keyed(0x4141_4141, 2, 8);
        let command = 0x1000_0884_2100_0000u64;
        let encrypted = table.encrypt_command(command);
        assert_ne!(encrypted, command);
        assert_eq!(table.decrypt_command(encrypted), command);
    }

    #[test]
    fn test_keycode_depends_on_id() {
        let base = sample_table();
        let a = base.keyed(0x4141_4141, 2, 8);
        let b = base.keyed(0x4242_4242, 2, 8);
        assert_ne!(a, b);
        assert_ne!(a, base);
        assert_eq!(a, base.keyed(0x4141_4141, 2, 8));
    }

    #[test]
    fn test_keycode_levels_differ() {
        let base = sample_table();
        assert_ne!(base.keyed(0x4141_4141, 2, 8), base.keyed(0x4141_4141, 3, 8));
        assert_ne!(base.keyed(0x4141_4141, 2, 8), base.keyed(0x4141_4141, 2, 12));
    }

    #[test]
    fn test_from_bytes() {
        assert!(Key1Table::from_bytes(&[0u8; 0x1047]).is_none());

        let mut bytes = [0u8; 0x1048];
        bytes[0..4].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        bytes[0x1044..0x1048].copy_from_slice(&0x9ABC_DEF0u32.to_le_bytes());
        let table = Key1Table::from_bytes(&bytes).unwrap();
        assert_eq!(table.words()[0], 0x1234_5678);
        assert_eq!(table.words()[KEY1_TABLE_WORDS - 1], 0x9ABC_DEF0);
    }
}
