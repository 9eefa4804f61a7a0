pub mod aes;
pub mod salsa20;
pub mod twofish;

/// Block size shared by both payload ciphers.
pub const BLOCK_SIZE: usize = 16;

/// A 16-byte block permutation keyed on 256 bits.
pub trait BlockCipher16 {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]);
}

impl<T: BlockCipher16 + ?Sized> BlockCipher16 for Box<T> {
    fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        (**self).encrypt_block(block)
    }

    fn decrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        (**self).decrypt_block(block)
    }
}
