//! Import and export of KeePass password databases in the legacy KDB (1.x)
//! and KDBX (2.x, critical version up to 3.1) container formats.
//!
//! A [`Key`] built from a passphrase and/or a key file unlocks a file into a
//! [`Database`]: a tree of groups and entries together with the container
//! parameters needed to write it back out, round-trip stable.

pub mod error;

pub mod database;
pub mod keys;
pub mod security;

mod compress;
mod ioutil;
mod memutil;
mod timeutil;

pub mod crypto;
pub mod kdb;
pub mod kdbx;

use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

pub use crate::database::Database;
pub use crate::error::Error;
pub use crate::keys::Key;

/// On-disk container formats.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DatabaseFormat {
    Kdb,
    Kdbx,
}

/// Reads the database at `path`, picking the codec from the file signature.
pub fn import<P: AsRef<Path>>(path: P, key: &Key) -> Result<Database, Error> {
    let file = std::fs::File::open(&path).map_err(|_| Error::FileNotFound)?;
    let mut input = BufReader::new(file);

    let mut signature = [0u8; 8];
    input
        .read_exact(&mut signature)
        .map_err(|_| Error::Format("Not a KeePass database."))?;

    match sniff_format(&signature) {
        Some(DatabaseFormat::Kdb) => kdb::import(path, key),
        Some(DatabaseFormat::Kdbx) => kdbx::import(path, key),
        None => Err(Error::Format("Not a KeePass database.")),
    }
}

/// Writes `db` to `path` in the requested container format.
pub fn export<P: AsRef<Path>>(
    path: P,
    db: &Database,
    key: &Key,
    format: DatabaseFormat,
) -> Result<(), Error> {
    match format {
        DatabaseFormat::Kdb => kdb::export(path, db, key),
        DatabaseFormat::Kdbx => kdbx::export(path, db, key),
    }
}

fn sniff_format(signature: &[u8; 8]) -> Option<DatabaseFormat> {
    let signature0 = memutil::bytes_to_u32(&signature[0..4]);
    let signature1 = memutil::bytes_to_u32(&signature[4..8]);

    if signature0 != 0x9AA2D903 {
        return None;
    }
    match signature1 {
        0xB54BFB65 => Some(DatabaseFormat::Kdb),
        0xB54BFB67 => Some(DatabaseFormat::Kdbx),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_sniffing() {
        let mut signature = [0u8; 8];
        signature[0..4].copy_from_slice(&0x9AA2D903u32.to_le_bytes());

        signature[4..8].copy_from_slice(&0xB54BFB65u32.to_le_bytes());
        assert_eq!(sniff_format(&signature), Some(DatabaseFormat::Kdb));

        signature[4..8].copy_from_slice(&0xB54BFB67u32.to_le_bytes());
        assert_eq!(sniff_format(&signature), Some(DatabaseFormat::Kdbx));

        signature[4..8].copy_from_slice(&0xB54BFB66u32.to_le_bytes());
        assert_eq!(sniff_format(&signature), None);
    }

    #[test]
    fn import_of_missing_file() {
        let key = Key::with_password("password");
        assert!(matches!(
            import("/nonexistent/database.kdbx", &key),
            Err(Error::FileNotFound)
        ));
    }
}
