use crate::memutil::{read32_le, write32_le};

/// "expand 32-byte k"
const SIGMA: [u32; 4] = [0x61707865, 0x3320646E, 0x79622D32, 0x6B206574];

pub const SALSA20_KEY_SIZE: usize = 32;
pub const SALSA20_NONCE_SIZE: usize = 8;
pub const SALSA20_BLOCK_SIZE: usize = 64;

/// Salsa20 keystream generator with the standard state layout. The counter
/// occupies words 8 and 9 and is incremented once per produced block.
pub struct Salsa20 {
    state: [u32; 16],
}

impl Salsa20 {
    pub fn new(key: &[u8], nonce: &[u8]) -> Salsa20 {
        assert!(key.len() == SALSA20_KEY_SIZE, "key length must be 32 bytes");
        assert!(nonce.len() == SALSA20_NONCE_SIZE, "nonce length must be 8 bytes");

        Salsa20 {
            state: [
                SIGMA[0],
                read32_le(key, 0),
                read32_le(key, 4),
                read32_le(key, 8),
                read32_le(key, 12),
                SIGMA[1],
                read32_le(nonce, 0),
                read32_le(nonce, 4),
                0,
                0, // counter
                SIGMA[2],
                read32_le(key, 16),
                read32_le(key, 20),
                read32_le(key, 24),
                read32_le(key, 28),
                SIGMA[3],
            ],
        }
    }

    /// Produces the next 64-byte keystream block and advances the counter.
    pub fn next_block(&mut self, dest: &mut [u8; SALSA20_BLOCK_SIZE]) {
        macro_rules! quarter_round {
            ($x:expr, $a:expr, $b:expr, $c:expr, $d:expr) => {
                $x[$b] ^= ($x[$a].wrapping_add($x[$d])).rotate_left(7);
                $x[$c] ^= ($x[$b].wrapping_add($x[$a])).rotate_left(9);
                $x[$d] ^= ($x[$c].wrapping_add($x[$b])).rotate_left(13);
                $x[$a] ^= ($x[$d].wrapping_add($x[$c])).rotate_left(18);
            };
        }

        let mut x = self.state;

        for _ in 0..10 {
            // Column round followed by row round.
            quarter_round!(x, 0, 4, 8, 12);
            quarter_round!(x, 5, 9, 13, 1);
            quarter_round!(x, 10, 14, 2, 6);
            quarter_round!(x, 15, 3, 7, 11);
            quarter_round!(x, 0, 1, 2, 3);
            quarter_round!(x, 5, 6, 7, 4);
            quarter_round!(x, 10, 11, 8, 9);
            quarter_round!(x, 15, 12, 13, 14);
        }

        for (idx, word) in x.iter_mut().enumerate() {
            *word = word.wrapping_add(self.state[idx]);
            write32_le(dest, idx * 4, *word);
        }

        let (counter, carry) = self.state[8].overflowing_add(1);
        self.state[8] = counter;
        if carry {
            self.state[9] = self.state[9].wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keystream_vector() {
        // ECRYPT Set 6, vector 0: first keystream block.
        let key = [
            0x0F, 0x62, 0xB5, 0x08, 0x5B, 0xAE, 0x01, 0x54, 0xA7, 0xFA, 0x4D, 0xA0, 0xF3, 0x46,
            0x99, 0xEC, 0x3F, 0x92, 0xE5, 0x38, 0x8B, 0xDE, 0x31, 0x84, 0xD7, 0x2A, 0x7D, 0xD0,
            0x23, 0x76, 0xC9, 0x1C,
        ];
        let nonce = [0x28, 0x8F, 0xF6, 0x5D, 0xC4, 0x2B, 0x92, 0xF9];

        let expected = [
            0x5E, 0x5E, 0x71, 0xF9, 0x01, 0x99, 0x34, 0x03, 0x04, 0xAB, 0xB2, 0x2A, 0x37, 0xB6,
            0x62, 0x5B, 0xF8, 0x83, 0xFB, 0x89, 0xCE, 0x3B, 0x21, 0xF5, 0x4A, 0x10, 0xB8, 0x10,
            0x66, 0xEF, 0x87, 0xDA, 0x30, 0xB7, 0x76, 0x99, 0xAA, 0x73, 0x79, 0xDA, 0x59, 0x5C,
            0x77, 0xDD, 0x59, 0x54, 0x2D, 0xA2, 0x08, 0xE5, 0x95, 0x4F, 0x89, 0xE4, 0x0E, 0xB7,
            0xAA, 0x80, 0xA8, 0x4A, 0x61, 0x76, 0x66, 0x3F,
        ];

        let mut salsa = Salsa20::new(&key, &nonce);
        let mut block = [0u8; SALSA20_BLOCK_SIZE];
        salsa.next_block(&mut block);

        assert_eq!(&block[..], &expected[..]);
    }

    #[test]
    fn counter_advances_between_blocks() {
        let key = [7u8; 32];
        let nonce = [3u8; 8];

        let mut salsa = Salsa20::new(&key, &nonce);
        let mut first = [0u8; SALSA20_BLOCK_SIZE];
        let mut second = [0u8; SALSA20_BLOCK_SIZE];
        salsa.next_block(&mut first);
        salsa.next_block(&mut second);

        assert_ne!(&first[..], &second[..]);

        // A fresh instance reproduces the same stream.
        let mut again = Salsa20::new(&key, &nonce);
        let mut block = [0u8; SALSA20_BLOCK_SIZE];
        again.next_block(&mut block);
        assert_eq!(&block[..], &first[..]);
    }
}
