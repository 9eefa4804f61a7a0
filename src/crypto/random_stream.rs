//! The inner random stream that masks protected values inside the KDBX XML
//! payload. XOR with a deterministic Salsa20 keystream; applying the same
//! sequence of calls twice recovers the plaintext.

use sha2::{Digest, Sha256};

use super::cipher::salsa20::{Salsa20, SALSA20_BLOCK_SIZE};

/// Fixed initialization vector of the inner stream.
pub const INNER_STREAM_IV: [u8; 8] = [0xe8, 0x30, 0x09, 0x4b, 0x97, 0x20, 0x5d, 0x2a];

/// Inner random stream identifiers as stored in the KDBX header.
#[repr(u32)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum InnerStreamAlgorithm {
    None = 0,

    /// A variant of the ARCFour algorithm (RC4 incompatible).
    /// Insecure; for backward compatibility only. Not supported.
    ArcFourVariant = 1,

    /// Salsa20 stream cipher. The only algorithm this library speaks.
    Salsa20 = 2,
}

impl InnerStreamAlgorithm {
    pub fn from_int(n: u32) -> Option<InnerStreamAlgorithm> {
        match n {
            0 => Some(InnerStreamAlgorithm::None),
            1 => Some(InnerStreamAlgorithm::ArcFourVariant),
            2 => Some(InnerStreamAlgorithm::Salsa20),
            _ => None,
        }
    }

    pub fn to_int(self) -> u32 {
        self as u32
    }
}

/// Stateful keystream consumer. Reads and writes must visit protected values
/// in the same document order or the plaintext scrambles.
pub struct RandomObfuscator {
    cipher: Salsa20,
    buffer: [u8; SALSA20_BLOCK_SIZE],
    buffer_pos: usize,
}

impl RandomObfuscator {
    /// Builds an obfuscator from an already-hashed 32-byte key.
    pub fn new(key: &[u8; 32]) -> RandomObfuscator {
        RandomObfuscator {
            cipher: Salsa20::new(key, &INNER_STREAM_IV),
            buffer: [0u8; SALSA20_BLOCK_SIZE],
            buffer_pos: SALSA20_BLOCK_SIZE,
        }
    }

    /// Builds an obfuscator from the raw inner-random-stream key found in the
    /// KDBX header; the effective key is its SHA-256.
    pub fn from_stream_key(raw_key: &[u8]) -> RandomObfuscator {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(raw_key)[..]);
        RandomObfuscator::new(&key)
    }

    /// XORs `data` against the next keystream bytes.
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for &b in data.iter() {
            if self.buffer_pos == self.buffer.len() {
                self.cipher.next_block(&mut self.buffer);
                self.buffer_pos = 0;
            }
            out.push(b ^ self.buffer[self.buffer_pos]);
            self.buffer_pos += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_is_self_inverse() {
        let key = [0x5Au8; 32];
        let mut sealing = RandomObfuscator::new(&key);
        let mut opening = RandomObfuscator::new(&key);

        let masked = sealing.process(b"first secret");
        assert_ne!(&masked[..], b"first secret");
        assert_eq!(opening.process(&masked), b"first secret");

        // The keystream advances, so a second value uses fresh bytes.
        let masked = sealing.process(b"second secret");
        assert_eq!(opening.process(&masked), b"second secret");
    }

    #[test]
    fn keystream_spans_block_boundaries() {
        let key = [0x21u8; 32];
        let mut sealing = RandomObfuscator::new(&key);
        let mut opening = RandomObfuscator::new(&key);

        let data: Vec<u8> = (0..1000u32).map(|n| (n % 256) as u8).collect();
        let masked = sealing.process(&data);
        assert_eq!(opening.process(&masked), data);
    }

    #[test]
    fn stream_key_is_hashed() {
        // Identical raw keys of different shapes produce the same stream.
        let mut a = RandomObfuscator::from_stream_key(&[1, 2, 3]);
        let mut b = RandomObfuscator::from_stream_key(&[1, 2, 3]);
        assert_eq!(a.process(b"check"), b.process(b"check"));
    }
}
