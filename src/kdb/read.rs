use std::collections::HashMap;
use std::io::prelude::*;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::rc::Rc;

use sha2::{Digest, Sha256};

use crate::crypto::cipher::aes::AesCipher;
use crate::crypto::cipher::twofish::TwofishCipher;
use crate::crypto::cipher::BlockCipher16;
use crate::crypto::modes::cbc_decrypt;
use crate::database::{
    Attachment, Binary, BinaryRef, Cipher, Database, Entry, EntryRef, Group, GroupRef, Uuid,
};
use crate::error::Error;
use crate::ioutil;
use crate::keys::{compose_final_key, Key, SubKeyResolution};
use crate::security::{ProtectedBinary, ProtectedString};
use crate::timeutil;

use super::*;

pub(crate) struct KdbHeader {
    pub flags: u32,
    pub version: u32,
    pub master_seed: [u8; 16],
    pub init_vector: [u8; 16],
    pub num_groups: u32,
    pub num_entries: u32,
    pub content_hash: [u8; 32],
    pub transform_seed: [u8; 32],
    pub transform_rounds: u32,
}

fn read_header<R: Read>(input: &mut R) -> Result<KdbHeader, Error> {
    // A file too short to hold the header is simply not a KDB database.
    let not_kdb = |_| Error::Format("Not a KDB database.");

    let signature0 = ioutil::io_read_u32(input).map_err(not_kdb)?;
    let signature1 = ioutil::io_read_u32(input).map_err(not_kdb)?;
    if (signature0, signature1) != KDB_SIGNATURE {
        return Err(Error::Format("Not a KDB database."));
    }

    let flags = ioutil::io_read_u32(input).map_err(not_kdb)?;
    let version = ioutil::io_read_u32(input).map_err(not_kdb)?;

    let header = KdbHeader {
        flags,
        version,
        master_seed: ioutil::io_read_array(input).map_err(not_kdb)?,
        init_vector: ioutil::io_read_array(input).map_err(not_kdb)?,
        num_groups: ioutil::io_read_u32(input).map_err(not_kdb)?,
        num_entries: ioutil::io_read_u32(input).map_err(not_kdb)?,
        content_hash: ioutil::io_read_array(input).map_err(not_kdb)?,
        transform_seed: ioutil::io_read_array(input).map_err(not_kdb)?,
        transform_rounds: ioutil::io_read_u32(input).map_err(not_kdb)?,
    };

    if (header.version & KDB_VERSION_CRITICAL_MASK) != KDB_FILE_VERSION {
        return Err(Error::Format("Unsupported KDB version."));
    }

    Ok(header)
}

fn read_time<R: Read>(input: &mut R) -> Result<chrono::DateTime<chrono::Utc>, Error> {
    let packed: [u8; 5] = ioutil::io_read_array(input)?;
    timeutil::decode_kdb_time(&packed)
}

/// Reads one group record. Returns the group together with its on-disk id
/// and tree depth.
pub(crate) fn read_group<R: Read>(src: &mut R) -> Result<(GroupRef, u32, u16), Error> {
    let mut group = Group::new();
    let mut id = 0u32;
    let mut level = 0u16;

    loop {
        let field_type = ioutil::io_read_u16(src)?;
        let field_size = ioutil::io_read_u32(src)?;

        // Each field is decoded from its own bounded buffer so that an
        // overlong decode cannot spill into the next field and unknown
        // payload bytes are skipped completely.
        let field = ioutil::io_read_bytes(src, field_size as usize)?;
        let mut fsrc = Cursor::new(&field[..]);

        match field_type {
            GROUP_FIELD_EMPTY => {}
            GROUP_FIELD_ID => id = ioutil::io_read_u32(&mut fsrc)?,
            GROUP_FIELD_NAME => {
                group.name = ioutil::io_read_string_nul(&mut fsrc, field.len())?
            }
            GROUP_FIELD_CREATION_TIME => group.creation_time = read_time(&mut fsrc)?,
            GROUP_FIELD_MODIFICATION_TIME => group.modification_time = read_time(&mut fsrc)?,
            GROUP_FIELD_ACCESS_TIME => group.access_time = read_time(&mut fsrc)?,
            GROUP_FIELD_EXPIRY_TIME => group.expiry_time = read_time(&mut fsrc)?,
            GROUP_FIELD_ICON => group.icon = ioutil::io_read_u32(&mut fsrc)?,
            GROUP_FIELD_LEVEL => level = ioutil::io_read_u16(&mut fsrc)?,
            GROUP_FIELD_FLAGS => group.flags = ioutil::io_read_u16(&mut fsrc)?,
            GROUP_FIELD_END => return Ok((group.wrap(), id, level)),
            _ => return Err(Error::Format("Illegal group field in KDB.")),
        }
    }
}

/// Reads one entry record. Returns the entry and the id of the group that
/// owns it.
pub(crate) fn read_entry<R: Read>(src: &mut R) -> Result<(EntryRef, u32), Error> {
    let mut entry = Entry::new();
    let mut group_id = 0u32;
    let mut attachment_name: Option<String> = None;
    let mut attachment_binary: Option<BinaryRef> = None;

    loop {
        let field_type = ioutil::io_read_u16(src)?;
        let field_size = ioutil::io_read_u32(src)?;

        let field = ioutil::io_read_bytes(src, field_size as usize)?;
        let mut fsrc = Cursor::new(&field[..]);

        match field_type {
            ENTRY_FIELD_EMPTY => {}
            ENTRY_FIELD_UUID => {
                let bytes: [u8; 16] = ioutil::io_read_array(&mut fsrc)?;
                entry.uuid = Uuid::wrap(bytes);
            }
            ENTRY_FIELD_GROUP_ID => group_id = ioutil::io_read_u32(&mut fsrc)?,
            ENTRY_FIELD_ICON => entry.icon = ioutil::io_read_u32(&mut fsrc)?,
            ENTRY_FIELD_TITLE => {
                entry.title =
                    ProtectedString::plain(ioutil::io_read_string_nul(&mut fsrc, field.len())?)
            }
            ENTRY_FIELD_URL => {
                entry.url =
                    ProtectedString::plain(ioutil::io_read_string_nul(&mut fsrc, field.len())?)
            }
            ENTRY_FIELD_USERNAME => {
                entry.username =
                    ProtectedString::plain(ioutil::io_read_string_nul(&mut fsrc, field.len())?)
            }
            ENTRY_FIELD_PASSWORD => {
                entry.password =
                    ProtectedString::plain(ioutil::io_read_string_nul(&mut fsrc, field.len())?)
            }
            ENTRY_FIELD_NOTES => {
                entry.notes =
                    ProtectedString::plain(ioutil::io_read_string_nul(&mut fsrc, field.len())?)
            }
            ENTRY_FIELD_CREATION_TIME => entry.creation_time = read_time(&mut fsrc)?,
            ENTRY_FIELD_MODIFICATION_TIME => entry.modification_time = read_time(&mut fsrc)?,
            ENTRY_FIELD_ACCESS_TIME => entry.access_time = read_time(&mut fsrc)?,
            ENTRY_FIELD_EXPIRY_TIME => entry.expiry_time = read_time(&mut fsrc)?,
            ENTRY_FIELD_ATTACHMENT_NAME => {
                let name = ioutil::io_read_string_nul(&mut fsrc, field.len())?;
                // KeePass 1.x writes a name field holding a lone NUL when
                // there is no attachment.
                if !name.is_empty() {
                    attachment_name = Some(name);
                }
            }
            ENTRY_FIELD_ATTACHMENT_DATA => {
                if !field.is_empty() {
                    attachment_binary =
                        Some(Rc::new(Binary::new(ProtectedBinary::copy_slice(&field))));
                }
            }
            ENTRY_FIELD_END => {
                if attachment_name.is_some() || attachment_binary.is_some() {
                    entry.add_attachment(Attachment::new(
                        attachment_name.unwrap_or_default(),
                        attachment_binary,
                    ));
                }
                return Ok((entry.wrap(), group_id));
            }
            _ => return Err(Error::Format("Illegal entry field in KDB.")),
        }
    }
}

pub fn import<P: AsRef<Path>>(path: P, key: &Key) -> Result<Database, Error> {
    let file = std::fs::File::open(path).map_err(|_| Error::FileNotFound)?;
    import_reader(&mut BufReader::new(file), key)
}

pub(crate) fn import_reader<R: Read>(input: &mut R, key: &Key) -> Result<Database, Error> {
    let header = read_header(input)?;

    let mut db = Database::new();
    db.master_seed = header.master_seed.to_vec();
    db.init_vector = header.init_vector;
    db.transform_seed = header.transform_seed;
    db.transform_rounds = u64::from(header.transform_rounds);

    // Produce the final key used for decrypting the contents.
    let transformed_key = key.transform(
        &header.transform_seed,
        u64::from(header.transform_rounds),
        SubKeyResolution::HashSubKeysOnlyIfComposite,
    );
    let final_key = compose_final_key(&header.master_seed, &transformed_key);

    let cipher: Box<dyn BlockCipher16> = if header.flags & KDB_FLAG_RIJNDAEL != 0 {
        db.cipher = Cipher::Aes;
        Box::new(AesCipher::new(&final_key))
    } else if header.flags & KDB_FLAG_TWOFISH != 0 {
        db.cipher = Cipher::Twofish;
        Box::new(TwofishCipher::new(&final_key))
    } else {
        return Err(Error::Format("Unknown cipher in KDB."));
    };

    let mut ciphertext = Vec::new();
    input.read_to_end(&mut ciphertext).map_err(Error::Io)?;

    let content = cbc_decrypt(&cipher, &header.init_vector, &ciphertext)
        .map_err(|_| Error::BadPassword)?;

    // A hash mismatch means the password was wrong.
    if Sha256::digest(&content)[..] != header.content_hash[..] {
        return Err(Error::BadPassword);
    }

    let mut src = Cursor::new(&content[..]);

    let mut groups: Vec<(GroupRef, u16)> = Vec::new();
    let mut group_map: HashMap<u32, GroupRef> = HashMap::new();
    for _ in 0..header.num_groups {
        let (group, id, level) = read_group(&mut src)?;
        groups.push((group.clone(), level));
        debug_assert!(!group_map.contains_key(&id), "duplicate group id in KDB");
        group_map.insert(id, group);
    }

    let mut entries: Vec<(EntryRef, u32)> = Vec::new();
    for _ in 0..header.num_entries {
        entries.push(read_entry(&mut src)?);
    }

    // Rebuild the tree from the flat record sequence: each group attaches to
    // the group last seen one level up, with the synthetic root at level
    // zero. Back-jumps simply resume from the shallower parent.
    let root = Group::new().wrap();
    let mut last_level = 0u32;
    let mut last_by_level: Vec<GroupRef> = vec![root.clone()];

    for (group, disk_level) in groups {
        let level = u32::from(disk_level) + 1;

        if level > last_level {
            if level != last_level + 1 {
                return Err(Error::Format("Malformed group tree."));
            }
            last_by_level[(level - 1) as usize]
                .borrow_mut()
                .add_group(group.clone());
            last_by_level.push(group.clone());
        } else {
            last_by_level[(level - 1) as usize]
                .borrow_mut()
                .add_group(group.clone());
            last_by_level[level as usize] = group.clone();
        }

        last_level = level;
    }

    for (entry, entry_group_id) in entries {
        let group = group_map
            .get(&entry_group_id)
            .ok_or(Error::Format("Database contains an orphaned entry."))?;
        group.borrow_mut().add_entry(entry);
    }

    db.root = root;
    Ok(db)
}
