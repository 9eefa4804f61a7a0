//! Twofish-256 block cipher, fixed at a 32-byte key and 16 rounds as used by
//! the KDB container.

use crate::memutil::read32_le;

use super::{BlockCipher16, BLOCK_SIZE};

pub const TWOFISH_KEY_SIZE: usize = 32;

const NUM_ROUNDS: usize = 16;
const NUM_SUB_KEYS: usize = 8 + 2 * NUM_ROUNDS;

/// Reed-Solomon code generator polynomial feedback.
const RS_GF_FDBK: u32 = 0x14d;
/// MDS matrix feedback polynomial.
const MDS_GF_FDBK: u32 = 0x169;

const SUB_KEY_STEP: u32 = 0x0202_0202;
const SUB_KEY_BUMP: u32 = 0x0101_0101;

/// Fixed 8x8 permutation S-boxes.
#[rustfmt::skip]
const P8X8: [[u8; 256]; 2] = [
    [
        0xa9, 0x67, 0xb3, 0xe8, 0x04, 0xfd, 0xa3, 0x76, 0x9a, 0x92, 0x80, 0x78,
        0xe4, 0xdd, 0xd1, 0x38, 0x0d, 0xc6, 0x35, 0x98, 0x18, 0xf7, 0xec, 0x6c,
        0x43, 0x75, 0x37, 0x26, 0xfa, 0x13, 0x94, 0x48, 0xf2, 0xd0, 0x8b, 0x30,
        0x84, 0x54, 0xdf, 0x23, 0x19, 0x5b, 0x3d, 0x59, 0xf3, 0xae, 0xa2, 0x82,
        0x63, 0x01, 0x83, 0x2e, 0xd9, 0x51, 0x9b, 0x7c, 0xa6, 0xeb, 0xa5, 0xbe,
        0x16, 0x0c, 0xe3, 0x61, 0xc0, 0x8c, 0x3a, 0xf5, 0x73, 0x2c, 0x25, 0x0b,
        0xbb, 0x4e, 0x89, 0x6b, 0x53, 0x6a, 0xb4, 0xf1, 0xe1, 0xe6, 0xbd, 0x45,
        0xe2, 0xf4, 0xb6, 0x66, 0xcc, 0x95, 0x03, 0x56, 0xd4, 0x1c, 0x1e, 0xd7,
        0xfb, 0xc3, 0x8e, 0xb5, 0xe9, 0xcf, 0xbf, 0xba, 0xea, 0x77, 0x39, 0xaf,
        0x33, 0xc9, 0x62, 0x71, 0x81, 0x79, 0x09, 0xad, 0x24, 0xcd, 0xf9, 0xd8,
        0xe5, 0xc5, 0xb9, 0x4d, 0x44, 0x08, 0x86, 0xe7, 0xa1, 0x1d, 0xaa, 0xed,
        0x06, 0x70, 0xb2, 0xd2, 0x41, 0x7b, 0xa0, 0x11, 0x31, 0xc2, 0x27, 0x90,
        0x20, 0xf6, 0x60, 0xff, 0x96, 0x5c, 0xb1, 0xab, 0x9e, 0x9c, 0x52, 0x1b,
        0x5f, 0x93, 0x0a, 0xef, 0x91, 0x85, 0x49, 0xee, 0x2d, 0x4f, 0x8f, 0x3b,
        0x47, 0x87, 0x6d, 0x46, 0xd6, 0x3e, 0x69, 0x64, 0x2a, 0xce, 0xcb, 0x2f,
        0xfc, 0x97, 0x05, 0x7a, 0xac, 0x7f, 0xd5, 0x1a, 0x4b, 0x0e, 0xa7, 0x5a,
        0x28, 0x14, 0x3f, 0x29, 0x88, 0x3c, 0x4c, 0x02, 0xb8, 0xda, 0xb0, 0x17,
        0x55, 0x1f, 0x8a, 0x7d, 0x57, 0xc7, 0x8d, 0x74, 0xb7, 0xc4, 0x9f, 0x72,
        0x7e, 0x15, 0x22, 0x12, 0x58, 0x07, 0x99, 0x34, 0x6e, 0x50, 0xde, 0x68,
        0x65, 0xbc, 0xdb, 0xf8, 0xc8, 0xa8, 0x2b, 0x40, 0xdc, 0xfe, 0x32, 0xa4,
        0xca, 0x10, 0x21, 0xf0, 0xd3, 0x5d, 0x0f, 0x00, 0x6f, 0x9d, 0x36, 0x42,
        0x4a, 0x5e, 0xc1, 0xe0,
    ],
    [
        0x75, 0xf3, 0xc6, 0xf4, 0xdb, 0x7b, 0xfb, 0xc8, 0x4a, 0xd3, 0xe6, 0x6b,
        0x45, 0x7d, 0xe8, 0x4b, 0xd6, 0x32, 0xd8, 0xfd, 0x37, 0x71, 0xf1, 0xe1,
        0x30, 0x0f, 0xf8, 0x1b, 0x87, 0xfa, 0x06, 0x3f, 0x5e, 0xba, 0xae, 0x5b,
        0x8a, 0x00, 0xbc, 0x9d, 0x6d, 0xc1, 0xb1, 0x0e, 0x80, 0x5d, 0xd2, 0xd5,
        0xa0, 0x84, 0x07, 0x14, 0xb5, 0x90, 0x2c, 0xa3, 0xb2, 0x73, 0x4c, 0x54,
        0x92, 0x74, 0x36, 0x51, 0x38, 0xb0, 0xbd, 0x5a, 0xfc, 0x60, 0x62, 0x96,
        0x6c, 0x42, 0xf7, 0x10, 0x7c, 0x28, 0x27, 0x8c, 0x13, 0x95, 0x9c, 0xc7,
        0x24, 0x46, 0x3b, 0x70, 0xca, 0xe3, 0x85, 0xcb, 0x11, 0xd0, 0x93, 0xb8,
        0xa6, 0x83, 0x20, 0xff, 0x9f, 0x77, 0xc3, 0xcc, 0x03, 0x6f, 0x08, 0xbf,
        0x40, 0xe7, 0x2b, 0xe2, 0x79, 0x0c, 0xaa, 0x82, 0x41, 0x3a, 0xea, 0xb9,
        0xe4, 0x9a, 0xa4, 0x97, 0x7e, 0xda, 0x7a, 0x17, 0x66, 0x94, 0xa1, 0x1d,
        0x3d, 0xf0, 0xde, 0xb3, 0x0b, 0x72, 0xa7, 0x1c, 0xef, 0xd1, 0x53, 0x3e,
        0x8f, 0x33, 0x26, 0x5f, 0xec, 0x76, 0x2a, 0x49, 0x81, 0x88, 0xee, 0x21,
        0xc4, 0x1a, 0xeb, 0xd9, 0xc5, 0x39, 0x99, 0xcd, 0xad, 0x31, 0x8b, 0x01,
        0x18, 0x23, 0xdd, 0x1f, 0x4e, 0x2d, 0xf9, 0x48, 0x4f, 0xf2, 0x65, 0x8e,
        0x78, 0x5c, 0x58, 0x19, 0x8d, 0xe5, 0x98, 0x57, 0x67, 0x7f, 0x05, 0x64,
        0xaf, 0x63, 0xb6, 0xfe, 0xf5, 0xb7, 0x3c, 0xa5, 0xce, 0xe9, 0x68, 0x44,
        0xe0, 0x4d, 0x43, 0x69, 0x29, 0x2e, 0xac, 0x15, 0x59, 0xa8, 0x0a, 0x9e,
        0x6e, 0x47, 0xdf, 0x34, 0x35, 0x6a, 0xcf, 0xdc, 0x22, 0xc9, 0xc0, 0x9b,
        0x89, 0xd4, 0xed, 0xab, 0x12, 0xa2, 0x0d, 0x52, 0xbb, 0x02, 0x2f, 0xa9,
        0xd7, 0x61, 0x1e, 0xb4, 0x50, 0x04, 0xf6, 0xc2, 0x16, 0x25, 0x86, 0x56,
        0x55, 0x09, 0xbe, 0x91,
    ],
];

/// Which permutation each input byte runs through at each of the five
/// S-box stages.
const P_ORDER: [[usize; 5]; 4] = [
    [1, 0, 0, 1, 1],
    [0, 0, 1, 1, 0],
    [1, 1, 0, 0, 0],
    [0, 1, 1, 0, 1],
];

/// Merges 64 key bits into the running Reed-Solomon remainder, one byte at a
/// time, using the (12, 8) code over GF(2^8) with feedback 0x14d.
fn reed_solomon_encode(k0: u32, k1: u32) -> u32 {
    let mut r = 0u32;
    for i in 0..2 {
        r ^= if i != 0 { k0 } else { k1 };

        for _ in 0..4 {
            let b = (r >> 24) as u8;
            let g2 = ((u32::from(b) << 1) ^ if b & 0x80 != 0 { RS_GF_FDBK } else { 0 }) & 0xff;
            let g3 = (u32::from(b >> 1) & 0x7f)
                ^ if b & 1 != 0 { RS_GF_FDBK >> 1 } else { 0 }
                ^ g2;
            r = (r << 8) ^ (g3 << 24) ^ (g2 << 16) ^ (g3 << 8) ^ u32::from(b);
        }
    }
    r
}

fn lfsr1(x: u8) -> u8 {
    (x >> 1) ^ if x & 0x01 != 0 { (MDS_GF_FDBK / 2) as u8 } else { 0 }
}

fn lfsr2(x: u8) -> u8 {
    (x >> 2)
        ^ if x & 0x02 != 0 { (MDS_GF_FDBK / 2) as u8 } else { 0 }
        ^ if x & 0x01 != 0 { (MDS_GF_FDBK / 4) as u8 } else { 0 }
}

fn mx_x(x: u8) -> u8 {
    x ^ lfsr2(x)
}

fn mx_y(x: u8) -> u8 {
    x ^ lfsr1(x) ^ lfsr2(x)
}

/// The F-function: each byte runs through its chain of S-boxes with key byte
/// injection, followed by the MDS matrix multiply.
fn f32(x: u32, k32: &[u32; 4]) -> u32 {
    let k = [
        k32[0].to_le_bytes(),
        k32[1].to_le_bytes(),
        k32[2].to_le_bytes(),
        k32[3].to_le_bytes(),
    ];

    let mut b = x.to_le_bytes();
    for i in 0..4 {
        b[i] = P8X8[P_ORDER[i][4]][b[i] as usize] ^ k[3][i];
        b[i] = P8X8[P_ORDER[i][3]][b[i] as usize] ^ k[2][i];
        b[i] = P8X8[P_ORDER[i][0]]
            [(P8X8[P_ORDER[i][1]][(P8X8[P_ORDER[i][2]][b[i] as usize] ^ k[1][i]) as usize]
                ^ k[0][i]) as usize];
    }

    let m = [
        [b[0], mx_y(b[1]), mx_x(b[2]), mx_x(b[3])],
        [mx_x(b[0]), mx_y(b[1]), mx_y(b[2]), b[3]],
        [mx_y(b[0]), mx_x(b[1]), b[2], mx_y(b[3])],
        [mx_y(b[0]), b[1], mx_y(b[2]), mx_x(b[3])],
    ];

    let mut res = 0u32;
    for (i, row) in m.iter().enumerate() {
        for &cell in row.iter() {
            res ^= u32::from(cell) << (i * 8);
        }
    }
    res
}

pub struct TwofishCipher {
    sbox_keys: [u32; 4],
    sub_keys: [u32; NUM_SUB_KEYS],
}

impl TwofishCipher {
    pub fn new(key: &[u8; TWOFISH_KEY_SIZE]) -> TwofishCipher {
        let mut k32e = [0u32; 4];
        let mut k32o = [0u32; 4];
        let mut sbox_keys = [0u32; 4];

        for i in 0..4 {
            // Split into even/odd key dwords.
            k32e[i] = read32_le(key, 8 * i);
            k32o[i] = read32_le(key, 8 * i + 4);

            sbox_keys[4 - 1 - i] = reed_solomon_encode(k32e[i], k32o[i]);
        }

        // Round subkeys via the pseudo-Hadamard transform.
        let mut sub_keys = [0u32; NUM_SUB_KEYS];
        for i in 0..NUM_SUB_KEYS / 2 {
            let a = f32((i as u32).wrapping_mul(SUB_KEY_STEP), &k32e);
            let b = f32(
                (i as u32).wrapping_mul(SUB_KEY_STEP).wrapping_add(SUB_KEY_BUMP),
                &k32o,
            )
            .rotate_left(8);
            sub_keys[2 * i] = a.wrapping_add(b);
            sub_keys[2 * i + 1] = a.wrapping_add(b.wrapping_mul(2)).rotate_left(9);
        }

        TwofishCipher {
            sbox_keys,
            sub_keys,
        }
    }
}

impl BlockCipher16 for TwofishCipher {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        // Load the block, add input whitening.
        let mut x = [0u32; 4];
        for i in 0..4 {
            x[i] = read32_le(block, 4 * i) ^ self.sub_keys[i];
        }

        for r in 0..NUM_ROUNDS {
            let t0 = f32(x[0], &self.sbox_keys);
            let t1 = f32(x[1].rotate_left(8), &self.sbox_keys);

            x[3] = x[3].rotate_left(1);
            x[2] ^= t0.wrapping_add(t1).wrapping_add(self.sub_keys[8 + 2 * r]);
            x[3] ^= t0
                .wrapping_add(t1.wrapping_mul(2))
                .wrapping_add(self.sub_keys[8 + 2 * r + 1]);
            x[2] = x[2].rotate_right(1);

            // Swap the halves, except after the last round.
            if r < NUM_ROUNDS - 1 {
                x.swap(0, 2);
                x.swap(1, 3);
            }
        }

        // Store with output whitening.
        for i in 0..4 {
            block[4 * i..4 * i + 4].copy_from_slice(&(x[i] ^ self.sub_keys[i + 4]).to_le_bytes());
        }
    }

    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let mut x = [0u32; 4];
        for i in 0..4 {
            x[i] = read32_le(block, 4 * i) ^ self.sub_keys[i + 4];
        }

        for r in (0..NUM_ROUNDS).rev() {
            let t0 = f32(x[0], &self.sbox_keys);
            let t1 = f32(x[1].rotate_left(8), &self.sbox_keys);

            x[2] = x[2].rotate_left(1);
            x[2] ^= t0.wrapping_add(t1).wrapping_add(self.sub_keys[8 + 2 * r]);
            x[3] ^= t0
                .wrapping_add(t1.wrapping_mul(2))
                .wrapping_add(self.sub_keys[8 + 2 * r + 1]);
            x[3] = x[3].rotate_right(1);

            // Unswap, except before the last round.
            if r > 0 {
                x.swap(0, 2);
                x.swap(1, 3);
            }
        }

        for i in 0..4 {
            block[4 * i..4 * i + 4].copy_from_slice(&(x[i] ^ self.sub_keys[i]).to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memutil;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        key.copy_from_slice(&memutil::hex_to_bytes(
            b"bbdc2ed1422d201e7cf7d79a224a3a99487e4f257c5947ec27be5043941800ee",
        ));
        key
    }

    #[test]
    fn twofish_known_vectors() {
        let cipher = TwofishCipher::new(&test_key());

        let vectors = [
            (
                b"ffce377fe4effce8af737f3d6ae990f2".as_ref(),
                b"f3609a046d951c4c30b33d9e095c41e8".as_ref(),
            ),
            (
                b"00000000000000000000000000000000".as_ref(),
                b"f803a7fd871edc3510358cb204947526".as_ref(),
            ),
        ];

        for (plain_hex, cipher_hex) in vectors.iter() {
            let mut block = [0u8; 16];
            block.copy_from_slice(&memutil::hex_to_bytes(plain_hex));
            cipher.encrypt_block(&mut block);
            assert_eq!(&block[..], &memutil::hex_to_bytes(cipher_hex)[..]);
        }
    }

    #[test]
    fn twofish_self_inverse() {
        let cipher = TwofishCipher::new(&test_key());

        for seed in 0..8u8 {
            let mut block = [0u8; 16];
            for (i, b) in block.iter_mut().enumerate() {
                *b = seed.wrapping_mul(31).wrapping_add(i as u8);
            }

            let original = block;
            cipher.encrypt_block(&mut block);
            assert_ne!(block, original);
            cipher.decrypt_block(&mut block);
            assert_eq!(block, original);
        }
    }
}
