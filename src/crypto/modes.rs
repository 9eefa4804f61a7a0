//! ECB and CBC modes over the 16-byte block ciphers. ECB only ever touches
//! the 32-byte key-transformation buffer; CBC carries the encrypted payload
//! with PKCS#7 padding.

use crate::error::Error;
use crate::memutil;

use super::cipher::{BlockCipher16, BLOCK_SIZE};

/// Encrypts a 32-byte buffer in place as two independent 16-byte blocks.
pub fn ecb_encrypt_32<C: BlockCipher16>(cipher: &C, buffer: &mut [u8; 32]) {
    let mut block = [0u8; BLOCK_SIZE];

    block.copy_from_slice(&buffer[0..BLOCK_SIZE]);
    cipher.encrypt_block(&mut block);
    buffer[0..BLOCK_SIZE].copy_from_slice(&block);

    block.copy_from_slice(&buffer[BLOCK_SIZE..]);
    cipher.encrypt_block(&mut block);
    buffer[BLOCK_SIZE..].copy_from_slice(&block);
}

/// Decrypts a 32-byte buffer in place as two independent 16-byte blocks.
pub fn ecb_decrypt_32<C: BlockCipher16>(cipher: &C, buffer: &mut [u8; 32]) {
    let mut block = [0u8; BLOCK_SIZE];

    block.copy_from_slice(&buffer[0..BLOCK_SIZE]);
    cipher.decrypt_block(&mut block);
    buffer[0..BLOCK_SIZE].copy_from_slice(&block);

    block.copy_from_slice(&buffer[BLOCK_SIZE..]);
    cipher.decrypt_block(&mut block);
    buffer[BLOCK_SIZE..].copy_from_slice(&block);
}

/// CBC-encrypts `data`, always appending PKCS#7 padding: inputs that are a
/// multiple of the block size gain one extra block of value 16.
pub fn cbc_encrypt<C: BlockCipher16>(cipher: &C, iv: &[u8; BLOCK_SIZE], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + BLOCK_SIZE);
    let mut chain = *iv;

    let mut chunks = data.chunks_exact(BLOCK_SIZE);
    for chunk in &mut chunks {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        memutil::xor_slices(&mut block, &chain);
        cipher.encrypt_block(&mut block);
        out.extend_from_slice(&block);
        chain = block;
    }

    let remainder = chunks.remainder();
    let pad = (BLOCK_SIZE - remainder.len()) as u8;
    let mut block = [pad; BLOCK_SIZE];
    block[0..remainder.len()].copy_from_slice(remainder);
    memutil::xor_slices(&mut block, &chain);
    cipher.encrypt_block(&mut block);
    out.extend_from_slice(&block);

    out
}

fn corrupt() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        "corrupt CBC stream",
    ))
}

/// CBC-decrypts `data` and strips the PKCS#7 padding. A ciphertext that is
/// not a whole number of blocks, or whose final padding bytes are
/// inconsistent, is corrupt. An empty input decrypts to an empty output.
pub fn cbc_decrypt<C: BlockCipher16>(
    cipher: &C,
    iv: &[u8; BLOCK_SIZE],
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data.len() % BLOCK_SIZE != 0 {
        return Err(corrupt());
    }

    let mut out = Vec::with_capacity(data.len());
    let mut chain = *iv;

    for chunk in data.chunks_exact(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        cipher.decrypt_block(&mut block);
        memutil::xor_slices(&mut block, &chain);
        out.extend_from_slice(&block);
        chain.copy_from_slice(chunk);
    }

    let pad = usize::from(out[out.len() - 1]);
    if pad > BLOCK_SIZE {
        return Err(corrupt());
    }
    for &b in &out[out.len() - pad..] {
        if usize::from(b) != pad {
            return Err(corrupt());
        }
    }
    out.truncate(out.len() - pad);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::cipher::aes::AesCipher;
    use crate::crypto::cipher::twofish::TwofishCipher;

    fn key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, b) in key.iter_mut().enumerate() {
            *b = (i * 7 + 3) as u8;
        }
        key
    }

    const IV: [u8; 16] = [0x42; 16];

    #[test]
    fn ecb_is_two_independent_blocks() {
        let cipher = AesCipher::new(&key());

        let mut buffer = [0u8; 32];
        ecb_encrypt_32(&cipher, &mut buffer);

        // Identical plaintext halves produce identical ciphertext halves.
        let (left, right) = buffer.split_at(16);
        assert_eq!(left, right);
    }

    #[test]
    fn ecb_round_trip() {
        let cipher = AesCipher::new(&key());

        let mut buffer = *b"two sixteen byte blocks of data!";
        let original = buffer;
        ecb_encrypt_32(&cipher, &mut buffer);
        assert_ne!(buffer, original);
        ecb_decrypt_32(&cipher, &mut buffer);
        assert_eq!(buffer, original);
    }

    #[test]
    fn cbc_round_trip_all_lengths() {
        let cipher = AesCipher::new(&key());

        for len in 0..64 {
            let data: Vec<u8> = (0..len).map(|n| n as u8).collect();
            let encrypted = cbc_encrypt(&cipher, &IV, &data);

            assert_eq!(encrypted.len() % 16, 0);
            assert!(encrypted.len() > data.len());

            let decrypted = cbc_decrypt(&cipher, &IV, &encrypted).unwrap();
            assert_eq!(decrypted, data);
        }
    }

    #[test]
    fn cbc_round_trip_twofish() {
        let cipher = TwofishCipher::new(&key());

        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let encrypted = cbc_encrypt(&cipher, &IV, &data);
        assert_eq!(cbc_decrypt(&cipher, &IV, &encrypted).unwrap(), data);
    }

    #[test]
    fn cbc_full_block_input_gains_padding_block() {
        let cipher = AesCipher::new(&key());

        let data = [0u8; 32];
        let encrypted = cbc_encrypt(&cipher, &IV, &data);
        assert_eq!(encrypted.len(), 48);
    }

    #[test]
    fn cbc_rejects_partial_blocks() {
        let cipher = AesCipher::new(&key());
        assert!(cbc_decrypt(&cipher, &IV, &[0u8; 17]).is_err());
    }

    /// Builds a single-block ciphertext whose plaintext is chosen freely,
    /// bypassing the padding the encrypt path would add.
    fn encrypt_raw_block(cipher: &AesCipher, plaintext: [u8; 16]) -> Vec<u8> {
        let mut block = plaintext;
        crate::memutil::xor_slices(&mut block, &IV);
        cipher.encrypt_block(&mut block);
        block.to_vec()
    }

    #[test]
    fn cbc_rejects_oversized_padding() {
        let cipher = AesCipher::new(&key());

        let mut plaintext = [0u8; 16];
        plaintext[15] = 17; // claims more padding than a block holds
        let encrypted = encrypt_raw_block(&cipher, plaintext);
        assert!(cbc_decrypt(&cipher, &IV, &encrypted).is_err());
    }

    #[test]
    fn cbc_rejects_inconsistent_padding() {
        let cipher = AesCipher::new(&key());

        let mut plaintext = [0u8; 16];
        plaintext[13] = 9;
        plaintext[14] = 9;
        plaintext[15] = 3; // the three final bytes should all read 3
        let encrypted = encrypt_raw_block(&cipher, plaintext);
        assert!(cbc_decrypt(&cipher, &IV, &encrypted).is_err());
    }

    #[test]
    fn cbc_wrong_key_does_not_yield_the_plaintext() {
        let cipher = AesCipher::new(&key());
        let data = b"some secret content here".to_vec();
        let encrypted = cbc_encrypt(&cipher, &IV, &data);

        let mut other_key = key();
        other_key[0] ^= 1;
        let wrong = AesCipher::new(&other_key);

        // A wrong key generically produces a padding error; in the unlucky
        // case where the padding happens to validate, the content is still
        // garbage.
        match cbc_decrypt(&wrong, &IV, &encrypted) {
            Err(_) => {}
            Ok(plain) => assert_ne!(plain, data),
        }
    }
}
