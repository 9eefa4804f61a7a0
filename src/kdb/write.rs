use std::io::prelude::*;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::crypto::cipher::aes::AesCipher;
use crate::crypto::cipher::twofish::TwofishCipher;
use crate::crypto::cipher::BlockCipher16;
use crate::crypto::modes::cbc_encrypt;
use crate::database::{Cipher, Database, Entry, Group, GroupRef};
use crate::error::Error;
use crate::ioutil;
use crate::keys::{compose_final_key, Key, SubKeyResolution};
use crate::timeutil;

use super::*;

fn write_string_field<W: Write>(dst: &mut W, field_type: u16, value: &str) -> Result<(), Error> {
    ioutil::io_write_u16(dst, field_type)?;
    ioutil::io_write_u32(dst, value.len() as u32 + 1)?;
    ioutil::io_write_string_nul(dst, value)
}

fn write_time_field<W: Write>(
    dst: &mut W,
    field_type: u16,
    time: &chrono::DateTime<chrono::Utc>,
) -> Result<(), Error> {
    ioutil::io_write_u16(dst, field_type)?;
    ioutil::io_write_u32(dst, 5)?;
    ioutil::io_write_bytes(dst, &timeutil::encode_kdb_time(time))
}

pub(crate) fn write_group<W: Write>(
    dst: &mut W,
    group: &Group,
    group_id: u32,
    level: u16,
) -> Result<(), Error> {
    ioutil::io_write_u16(dst, GROUP_FIELD_ID)?;
    ioutil::io_write_u32(dst, 4)?;
    ioutil::io_write_u32(dst, group_id)?;

    write_string_field(dst, GROUP_FIELD_NAME, &group.name)?;

    write_time_field(dst, GROUP_FIELD_CREATION_TIME, &group.creation_time)?;
    write_time_field(dst, GROUP_FIELD_MODIFICATION_TIME, &group.modification_time)?;
    write_time_field(dst, GROUP_FIELD_ACCESS_TIME, &group.access_time)?;
    write_time_field(dst, GROUP_FIELD_EXPIRY_TIME, &group.expiry_time)?;

    ioutil::io_write_u16(dst, GROUP_FIELD_ICON)?;
    ioutil::io_write_u32(dst, 4)?;
    ioutil::io_write_u32(dst, group.icon)?;

    ioutil::io_write_u16(dst, GROUP_FIELD_LEVEL)?;
    ioutil::io_write_u32(dst, 2)?;
    ioutil::io_write_u16(dst, level)?;

    ioutil::io_write_u16(dst, GROUP_FIELD_FLAGS)?;
    ioutil::io_write_u32(dst, 2)?;
    ioutil::io_write_u16(dst, group.flags)?;

    ioutil::io_write_u16(dst, GROUP_FIELD_END)?;
    ioutil::io_write_u32(dst, 0)
}

pub(crate) fn write_entry<W: Write>(dst: &mut W, entry: &Entry, group_id: u32) -> Result<(), Error> {
    ioutil::io_write_u16(dst, ENTRY_FIELD_UUID)?;
    ioutil::io_write_u32(dst, 16)?;
    ioutil::io_write_bytes(dst, entry.uuid.as_bytes())?;

    ioutil::io_write_u16(dst, ENTRY_FIELD_GROUP_ID)?;
    ioutil::io_write_u32(dst, 4)?;
    ioutil::io_write_u32(dst, group_id)?;

    ioutil::io_write_u16(dst, ENTRY_FIELD_ICON)?;
    ioutil::io_write_u32(dst, 4)?;
    ioutil::io_write_u32(dst, entry.icon)?;

    write_string_field(dst, ENTRY_FIELD_TITLE, entry.title.value())?;
    write_string_field(dst, ENTRY_FIELD_URL, entry.url.value())?;
    write_string_field(dst, ENTRY_FIELD_USERNAME, entry.username.value())?;
    write_string_field(dst, ENTRY_FIELD_PASSWORD, entry.password.value())?;
    write_string_field(dst, ENTRY_FIELD_NOTES, entry.notes.value())?;

    write_time_field(dst, ENTRY_FIELD_CREATION_TIME, &entry.creation_time)?;
    write_time_field(dst, ENTRY_FIELD_MODIFICATION_TIME, &entry.modification_time)?;
    write_time_field(dst, ENTRY_FIELD_ACCESS_TIME, &entry.access_time)?;
    write_time_field(dst, ENTRY_FIELD_EXPIRY_TIME, &entry.expiry_time)?;

    if entry.has_attachment() {
        debug_assert!(entry.attachments.len() == 1, "KDB stores a single attachment");
        let attachment = &entry.attachments[0];

        if !attachment.name.is_empty() {
            write_string_field(dst, ENTRY_FIELD_ATTACHMENT_NAME, &attachment.name)?;
        }

        if let Some(ref binary) = attachment.binary {
            if !binary.is_empty() {
                ioutil::io_write_u16(dst, ENTRY_FIELD_ATTACHMENT_DATA)?;
                ioutil::io_write_u32(dst, binary.data.len() as u32)?;
                ioutil::io_write_bytes(dst, &binary.data)?;
            }
        }
    }

    ioutil::io_write_u16(dst, ENTRY_FIELD_END)?;
    ioutil::io_write_u32(dst, 0)
}

/// Flattens the group tree in depth-first order, recording each group's
/// depth. The synthetic root is not included.
fn collect_groups(group: &GroupRef, level: usize, flat: &mut Vec<(GroupRef, usize)>) {
    for child in group.borrow().groups.iter() {
        flat.push((child.clone(), level));
        collect_groups(child, level + 1, flat);
    }
}

pub fn export<P: AsRef<Path>>(path: P, db: &Database, key: &Key) -> Result<(), Error> {
    if db.master_seed.len() != 16 {
        debug_assert!(false, "KDB requires a 16 byte master seed");
        return Err(Error::Internal("KDB master seed must be 16 bytes."));
    }
    if db.transform_rounds > u64::from(u32::MAX) {
        debug_assert!(false, "KDB transform rounds exceed u32");
        return Err(Error::Internal("Transform round count exceeds KDB maximum."));
    }

    let mut file = std::fs::File::create(path).map_err(Error::Io)?;

    // Produce the final key used for encrypting the contents.
    let transformed_key = key.transform(
        &db.transform_seed,
        db.transform_rounds,
        SubKeyResolution::HashSubKeysOnlyIfComposite,
    );
    let final_key = compose_final_key(&db.master_seed, &transformed_key);

    let cipher: Box<dyn BlockCipher16> = match db.cipher {
        Cipher::Aes => Box::new(AesCipher::new(&final_key)),
        Cipher::Twofish => Box::new(TwofishCipher::new(&final_key)),
    };

    let mut flat: Vec<(GroupRef, usize)> = Vec::new();
    collect_groups(&db.root, 0, &mut flat);

    if flat.len() > u32::MAX as usize {
        debug_assert!(false, "group count exceeds u32");
        return Err(Error::Internal("Group count exceeds KDB maximum."));
    }

    // Write groups, then entries, assigning synthetic sequential ids that
    // match the traversal order.
    let mut content = Vec::new();
    for (group_id, (group, level)) in flat.iter().enumerate() {
        if *level > usize::from(u16::MAX) {
            debug_assert!(false, "group depth exceeds u16");
            return Err(Error::Internal("Group hierarchy exceeds KDB maximum."));
        }
        write_group(&mut content, &group.borrow(), group_id as u32, *level as u16)?;
    }

    let mut num_entries = 0u32;
    for (group_id, (group, _)) in flat.iter().enumerate() {
        for entry in group.borrow().entries.iter() {
            write_entry(&mut content, &entry.borrow(), group_id as u32)?;
            num_entries = num_entries
                .checked_add(1)
                .ok_or(Error::Internal("Entry count exceeds KDB maximum."))?;
        }
    }

    let content_hash = Sha256::digest(&content);

    let mut header = Vec::new();
    ioutil::io_write_u32(&mut header, KDB_SIGNATURE.0)?;
    ioutil::io_write_u32(&mut header, KDB_SIGNATURE.1)?;
    ioutil::io_write_u32(
        &mut header,
        match db.cipher {
            Cipher::Aes => KDB_FLAG_RIJNDAEL,
            Cipher::Twofish => KDB_FLAG_TWOFISH,
        },
    )?;
    ioutil::io_write_u32(&mut header, KDB_FILE_VERSION)?;
    ioutil::io_write_bytes(&mut header, &db.master_seed)?;
    ioutil::io_write_bytes(&mut header, &db.init_vector)?;
    ioutil::io_write_u32(&mut header, flat.len() as u32)?;
    ioutil::io_write_u32(&mut header, num_entries)?;
    ioutil::io_write_bytes(&mut header, &content_hash[..])?;
    ioutil::io_write_bytes(&mut header, &db.transform_seed)?;
    ioutil::io_write_u32(&mut header, db.transform_rounds as u32)?;

    file.write_all(&header).map_err(Error::Io)?;

    let encrypted = cbc_encrypt(&cipher, &db.init_vector, &content);
    file.write_all(&encrypted).map_err(Error::Io)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::read::{read_entry, read_group};
    use super::*;
    use crate::database::{Attachment, Binary, Uuid};
    use crate::security::{ProtectedBinary, ProtectedString};
    use chrono::offset::{Local, TimeZone, Utc};
    use std::io::Cursor;
    use std::rc::Rc;

    fn local_time(
        y: i32,
        mo: u32,
        d: u32,
        h: u32,
        mi: u32,
        s: u32,
    ) -> chrono::DateTime<Utc> {
        Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn group_record_round_trip() {
        let mut group = Group::new();
        group.name = "Internet".into();
        group.icon = 5;
        group.flags = 3;
        group.creation_time = local_time(2014, 2, 1, 12, 0, 0);
        group.modification_time = local_time(2014, 2, 2, 13, 30, 5);
        group.access_time = local_time(2014, 2, 3, 6, 15, 59);
        group.expiry_time = timeutil::never();

        let mut record = Vec::new();
        write_group(&mut record, &group, 7, 2).unwrap();

        let mut src = Cursor::new(&record[..]);
        let (parsed, id, level) = read_group(&mut src).unwrap();
        let parsed = parsed.borrow();

        assert_eq!(id, 7);
        assert_eq!(level, 2);
        assert_eq!(parsed.name, "Internet");
        assert_eq!(parsed.icon, 5);
        assert_eq!(parsed.flags, 3);
        assert_eq!(parsed.creation_time, group.creation_time);
        assert_eq!(parsed.modification_time, group.modification_time);
        assert_eq!(parsed.access_time, group.access_time);
        assert_eq!(parsed.expiry_time, timeutil::never());
        assert_eq!(src.position() as usize, record.len());
    }

    #[test]
    fn entry_record_round_trip() {
        let mut entry = Entry::new();
        entry.uuid = Uuid::wrap([9u8; 16]);
        entry.icon = 2;
        entry.title = ProtectedString::plain("Mail");
        entry.url = ProtectedString::plain("https://example.org");
        entry.username = ProtectedString::plain("user");
        entry.password = ProtectedString::plain("secret");
        entry.notes = ProtectedString::plain("notes");
        entry.creation_time = local_time(2014, 5, 20, 8, 0, 0);
        entry.add_attachment(Attachment::new(
            "file.bin".into(),
            Some(Rc::new(Binary::new(ProtectedBinary::copy_slice(
                b"attachment bytes",
            )))),
        ));

        let mut record = Vec::new();
        write_entry(&mut record, &entry, 4).unwrap();

        let mut src = Cursor::new(&record[..]);
        let (parsed, group_id) = read_entry(&mut src).unwrap();
        let parsed = parsed.borrow();

        assert_eq!(group_id, 4);
        assert_eq!(parsed.uuid, entry.uuid);
        assert_eq!(parsed.title.value(), "Mail");
        assert_eq!(parsed.password.value(), "secret");
        assert_eq!(parsed.attachments.len(), 1);
        assert_eq!(parsed.attachments[0].name, "file.bin");
        assert_eq!(
            &parsed.attachments[0].binary.as_ref().unwrap().data[..],
            b"attachment bytes"
        );
        assert_eq!(src.position() as usize, record.len());
    }

    #[test]
    fn unknown_field_tag_is_a_format_error() {
        let mut record = Vec::new();
        ioutil::io_write_u16(&mut record, 0x0042).unwrap();
        ioutil::io_write_u32(&mut record, 0).unwrap();

        let mut src = Cursor::new(&record[..]);
        assert!(matches!(
            read_group(&mut src),
            Err(Error::Format("Illegal group field in KDB."))
        ));
    }

    #[test]
    fn unknown_payload_in_known_field_is_skipped() {
        // An oversized icon field decodes its u32 and ignores the rest.
        let mut record = Vec::new();
        ioutil::io_write_u16(&mut record, GROUP_FIELD_ICON).unwrap();
        ioutil::io_write_u32(&mut record, 8).unwrap();
        ioutil::io_write_u32(&mut record, 11).unwrap();
        ioutil::io_write_u32(&mut record, 0xFFFF_FFFF).unwrap();
        ioutil::io_write_u16(&mut record, GROUP_FIELD_END).unwrap();
        ioutil::io_write_u32(&mut record, 0).unwrap();

        let mut src = Cursor::new(&record[..]);
        let (group, _, _) = read_group(&mut src).unwrap();
        assert_eq!(group.borrow().icon, 11);
    }
}
