use aes::cipher::{Block, BlockDecrypt, BlockEncrypt, Key, KeyInit};
use aes::Aes256;

use super::{BlockCipher16, BLOCK_SIZE};

pub const AES_KEY_SIZE: usize = 32;

/// AES-256 block primitive, delegated to the `aes` crate.
pub struct AesCipher {
    inner: Aes256,
}

impl AesCipher {
    pub fn new(key: &[u8; AES_KEY_SIZE]) -> AesCipher {
        AesCipher {
            inner: Aes256::new(Key::<Aes256>::from_slice(key)),
        }
    }
}

impl BlockCipher16 for AesCipher {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let mut gblock = Block::<Aes256>::clone_from_slice(block);
        self.inner.encrypt_block(&mut gblock);
        block.copy_from_slice(&gblock);
    }

    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let mut gblock = Block::<Aes256>::clone_from_slice(block);
        self.inner.decrypt_block(&mut gblock);
        block.copy_from_slice(&gblock);
    }
}
