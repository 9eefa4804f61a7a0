//! User credentials: a passphrase and/or a key file, combined into the
//! 32-byte master key and run through the KeePass key transformation.

use std::io::prelude::*;
use std::path::Path;

use sha2::{Digest, Sha256};
use xml::reader::{EventReader, XmlEvent};

use crate::crypto::cipher::aes::AesCipher;
use crate::crypto::modes::ecb_encrypt_32;
use crate::error::Error;
use crate::memutil;
use crate::security::ProtectedBinary;

/// How the present sub-keys combine into the master key. KDBX always hashes;
/// KDB hashes only when both a password and a key file are present.
#[derive(Copy, Clone, PartialEq, Eq)]
pub enum SubKeyResolution {
    HashSubKeys,
    HashSubKeysOnlyIfComposite,
}

/// The composite credential. Each sub-key is the SHA-256 of its source.
pub struct Key {
    password_key: Option<ProtectedBinary>,
    keyfile_key: Option<ProtectedBinary>,
}

impl Key {
    pub fn new() -> Key {
        Key {
            password_key: None,
            keyfile_key: None,
        }
    }

    /// Convenience constructor for the common password-only credential.
    pub fn with_password(password: &str) -> Key {
        let mut key = Key::new();
        key.set_password(password);
        key
    }

    pub fn set_password(&mut self, password: &str) {
        let hash = Sha256::digest(password.as_bytes());
        self.password_key = Some(ProtectedBinary::copy_slice(&hash));
    }

    /// Loads a key file. Accepted forms, tried in order: an XML document with
    /// `KeyFile/Key/Data` holding base64 of 32 bytes, or a file of exactly 64
    /// hexadecimal characters.
    pub fn set_key_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let mut file = std::fs::File::open(path).map_err(|_| Error::FileNotFound)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(Error::Io)?;

        if let Some(result) = parse_xml_key_file(&data) {
            self.keyfile_key = Some(ProtectedBinary::copy_slice(&result?));
            return Ok(());
        }

        if data.len() == 64 && data.iter().all(|b| b.is_ascii_hexdigit()) {
            let bytes = memutil::hex_to_bytes(&data);
            self.keyfile_key = Some(ProtectedBinary::copy_slice(&bytes));
            return Ok(());
        }

        Err(Error::Format("Unknown key file format."))
    }

    /// Combines the present sub-keys into the raw 32-byte master key.
    fn resolve(&self, resolution: SubKeyResolution) -> [u8; 32] {
        let mut key = [0u8; 32];

        match resolution {
            SubKeyResolution::HashSubKeys => {
                let mut hasher = Sha256::new();
                if let Some(ref password) = self.password_key {
                    hasher.update(password);
                }
                if let Some(ref keyfile) = self.keyfile_key {
                    hasher.update(keyfile);
                }
                key.copy_from_slice(&hasher.finalize()[..]);
            }
            SubKeyResolution::HashSubKeysOnlyIfComposite => {
                match (&self.password_key, &self.keyfile_key) {
                    (Some(password), Some(keyfile)) => {
                        let mut hasher = Sha256::new();
                        hasher.update(password);
                        hasher.update(keyfile);
                        key.copy_from_slice(&hasher.finalize()[..]);
                    }
                    (Some(password), None) => key.copy_from_slice(password),
                    (None, Some(keyfile)) => key.copy_from_slice(keyfile),
                    (None, None) => {}
                }
            }
        }

        key
    }

    /// The CPU-bound proof-of-work step: the resolved key is AES-ECB
    /// encrypted with the transform seed `rounds` times, then hashed.
    pub fn transform(
        &self,
        seed: &[u8; 32],
        rounds: u64,
        resolution: SubKeyResolution,
    ) -> [u8; 32] {
        let cipher = AesCipher::new(seed);

        let mut buffer = self.resolve(resolution);
        for _ in 0..rounds {
            ecb_encrypt_32(&cipher, &mut buffer);
        }

        let mut transformed = [0u8; 32];
        transformed.copy_from_slice(&Sha256::digest(buffer)[..]);
        memutil::zero_slice(&mut buffer);

        transformed
    }
}

impl Default for Key {
    fn default() -> Key {
        Key::new()
    }
}

/// Computes the key fed to the payload cipher from the header's master seed
/// and the transformed credential.
pub fn compose_final_key(master_seed: &[u8], transformed_key: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(master_seed);
    hasher.update(transformed_key);

    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize()[..]);
    key
}

/// Tries to read `data` as an XML key file. `None` means the bytes are not
/// XML at all; `Some(Err(..))` means they are XML but not a valid key file.
fn parse_xml_key_file(data: &[u8]) -> Option<Result<[u8; 32], Error>> {
    let mut xml = EventReader::new(data);
    let mut path: Vec<String> = Vec::new();
    let mut key_data = String::new();

    loop {
        match xml.next() {
            Ok(XmlEvent::StartElement { name, .. }) => path.push(name.local_name),
            Ok(XmlEvent::EndElement { .. }) => {
                path.pop();
            }
            Ok(XmlEvent::Characters(text)) => {
                if path == ["KeyFile", "Key", "Data"] {
                    key_data = text;
                }
            }
            Ok(XmlEvent::EndDocument) => break,
            Ok(_) => {}
            Err(_) => return None,
        }
    }

    let decoded = match base64::decode(key_data.trim().as_bytes()) {
        Ok(bytes) => bytes,
        Err(_) => return Some(Err(Error::Format("Invalid key data in key file."))),
    };
    if decoded.len() != 32 {
        return Some(Err(Error::Format("Invalid key size in key file.")));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&decoded);
    Some(Ok(key))
}
