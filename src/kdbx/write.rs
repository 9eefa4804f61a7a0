use std::io::prelude::*;
use std::path::Path;
use std::rc::Rc;

use chrono::offset::Utc;
use chrono::DateTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use rand::prelude::*;
use sha2::{Digest, Sha256};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent};

use crate::compress;
use crate::crypto::cipher::aes::AesCipher;
use crate::crypto::hashed_block_stream::HashedBlockWrite;
use crate::crypto::modes::cbc_encrypt;
use crate::crypto::random_stream::{InnerStreamAlgorithm, RandomObfuscator};
use crate::database::{BinaryRef, Cipher, Database, Entry, Group, Metadata};
use crate::error::Error;
use crate::ioutil;
use crate::keys::{compose_final_key, Key, SubKeyResolution};
use crate::security::ProtectedString;
use crate::timeutil;

use super::*;

fn emit_error(err: xml::writer::Error) -> Error {
    match err {
        xml::writer::Error::Io(io_err) => Error::Io(io_err),
        _ => Error::Internal("XML write error."),
    }
}

fn write_header_field<W: Write>(dst: &mut W, id: u8, data: &[u8]) -> Result<(), Error> {
    debug_assert!(data.len() <= usize::from(u16::MAX));
    ioutil::io_write_u8(dst, id)?;
    ioutil::io_write_u16(dst, data.len() as u16)?;
    ioutil::io_write_bytes(dst, data)
}

fn bool_text(value: bool) -> &'static str {
    if value {
        VAL_TRUE
    } else {
        VAL_FALSE
    }
}

struct XmlComposer {
    obfuscator: RandomObfuscator,
    header_hash: [u8; 32],
    binary_pool: Vec<(String, BinaryRef)>,
}

impl XmlComposer {
    fn new(obfuscator: RandomObfuscator, header_hash: [u8; 32]) -> XmlComposer {
        XmlComposer {
            obfuscator,
            header_hash,
            binary_pool: Vec::new(),
        }
    }

    fn write_document<W: Write>(&mut self, dst: W, db: &Database) -> Result<W, Error> {
        let default_meta;
        let meta = match db.meta {
            Some(ref meta) => meta,
            None => {
                default_meta = Metadata::new();
                &default_meta
            }
        };

        let mut xml = EmitterConfig::new().perform_indent(true).create_writer(dst);

        xml.write(XmlEvent::start_element(ELEM_DOC_NODE))
            .map_err(emit_error)?;

        xml.write(XmlEvent::start_element(ELEM_META))
            .map_err(emit_error)?;
        self.write_meta(&mut xml, meta)?;
        xml.write(XmlEvent::end_element()).map_err(emit_error)?;

        xml.write(XmlEvent::start_element(ELEM_ROOT))
            .map_err(emit_error)?;
        xml.write(XmlEvent::start_element(ELEM_GROUP))
            .map_err(emit_error)?;
        self.write_group(&mut xml, &db.root.borrow())?;
        xml.write(XmlEvent::end_element()).map_err(emit_error)?;
        xml.write(XmlEvent::end_element()).map_err(emit_error)?;

        xml.write(XmlEvent::end_element()).map_err(emit_error)?;

        Ok(xml.into_inner())
    }

    fn write_text_element<W: Write>(
        &mut self,
        xml: &mut EventWriter<W>,
        name: &str,
        text: &str,
    ) -> Result<(), Error> {
        xml.write(XmlEvent::start_element(name)).map_err(emit_error)?;
        if !text.is_empty() {
            xml.write(XmlEvent::characters(text)).map_err(emit_error)?;
        }
        xml.write(XmlEvent::end_element()).map_err(emit_error)
    }

    fn write_time_element<W: Write>(
        &mut self,
        xml: &mut EventWriter<W>,
        name: &str,
        time: &DateTime<Utc>,
    ) -> Result<(), Error> {
        let text = timeutil::format_kdbx_time(time);
        self.write_text_element(xml, name, &text)
    }

    fn write_meta<W: Write>(
        &mut self,
        xml: &mut EventWriter<W>,
        meta: &Metadata,
    ) -> Result<(), Error> {
        let header_hash = base64::encode(self.header_hash);
        self.write_text_element(xml, ELEM_HEADER_HASH, &header_hash)?;
        self.write_text_element(xml, ELEM_GENERATOR, &meta.generator)?;

        self.write_text_element(xml, ELEM_DB_NAME, meta.database_name.value())?;
        self.write_time_element(xml, ELEM_DB_NAME_CHANGED, &meta.database_name.time())?;
        self.write_text_element(xml, ELEM_DB_DESC, meta.database_desc.value())?;
        self.write_time_element(xml, ELEM_DB_DESC_CHANGED, &meta.database_desc.time())?;
        self.write_text_element(xml, ELEM_DB_DEFAULT_USER, meta.default_username.value())?;
        self.write_time_element(
            xml,
            ELEM_DB_DEFAULT_USER_CHANGED,
            &meta.default_username.time(),
        )?;

        self.write_text_element(
            xml,
            ELEM_DB_MNTNC_HISTORY_DAYS,
            &meta.maintenance_hist_days.to_string(),
        )?;
        self.write_text_element(xml, ELEM_DB_COLOR, &meta.database_color)?;
        self.write_time_element(xml, ELEM_DB_KEY_CHANGED, &meta.master_key_changed)?;
        self.write_text_element(
            xml,
            ELEM_DB_KEY_CHANGE_REC,
            &meta.master_key_change_rec.to_string(),
        )?;
        self.write_text_element(
            xml,
            ELEM_DB_KEY_CHANGE_FORCE,
            &meta.master_key_change_force.to_string(),
        )?;

        xml.write(XmlEvent::start_element(ELEM_MEMORY_PROT))
            .map_err(emit_error)?;
        self.write_text_element(xml, ELEM_PROT_TITLE, bool_text(meta.memory_protection.title))?;
        self.write_text_element(
            xml,
            ELEM_PROT_USER_NAME,
            bool_text(meta.memory_protection.username),
        )?;
        self.write_text_element(
            xml,
            ELEM_PROT_PASSWORD,
            bool_text(meta.memory_protection.password),
        )?;
        self.write_text_element(xml, ELEM_PROT_URL, bool_text(meta.memory_protection.url))?;
        self.write_text_element(xml, ELEM_PROT_NOTES, bool_text(meta.memory_protection.notes))?;
        xml.write(XmlEvent::end_element()).map_err(emit_error)?;

        match meta.recycle_bin.upgrade() {
            Some(bin) => {
                self.write_text_element(xml, ELEM_RECYCLE_BIN_ENABLED, VAL_TRUE)?;
                let uuid = bin.borrow().uuid.to_base64();
                self.write_text_element(xml, ELEM_RECYCLE_BIN_UUID, &uuid)?;
            }
            None => self.write_text_element(xml, ELEM_RECYCLE_BIN_ENABLED, VAL_FALSE)?,
        }
        self.write_time_element(xml, ELEM_RECYCLE_BIN_CHANGED, &meta.recycle_bin_changed)?;

        if let Some(templates) = meta.entry_templates.upgrade() {
            let uuid = templates.borrow().uuid.to_base64();
            self.write_text_element(xml, ELEM_ENTRY_TEMPLATES_GROUP, &uuid)?;
        }
        self.write_time_element(
            xml,
            ELEM_ENTRY_TEMPLATES_GROUP_CHANGED,
            &meta.entry_templates_changed,
        )?;

        self.write_text_element(
            xml,
            ELEM_HISTORY_MAX_ITEMS,
            &meta.history_max_items.to_string(),
        )?;
        self.write_text_element(
            xml,
            ELEM_HISTORY_MAX_SIZE,
            &meta.history_max_size.to_string(),
        )?;

        if let Some(group) = meta.last_selected_group.upgrade() {
            let uuid = group.borrow().uuid.to_base64();
            self.write_text_element(xml, ELEM_LAST_SELECTED_GROUP, &uuid)?;
        }
        if let Some(group) = meta.last_visible_group.upgrade() {
            let uuid = group.borrow().uuid.to_base64();
            self.write_text_element(xml, ELEM_LAST_TOP_VISIBLE_GROUP, &uuid)?;
        }

        xml.write(XmlEvent::start_element(ELEM_CUSTOM_ICONS))
            .map_err(emit_error)?;
        for icon in meta.icons.iter() {
            xml.write(XmlEvent::start_element(ELEM_CUSTOM_ICON_ITEM))
                .map_err(emit_error)?;
            self.write_text_element(xml, ELEM_UUID, &icon.uuid.to_base64())?;
            self.write_text_element(xml, ELEM_CUSTOM_ICON_ITEM_DATA, &base64::encode(&icon.data))?;
            xml.write(XmlEvent::end_element()).map_err(emit_error)?;
        }
        xml.write(XmlEvent::end_element()).map_err(emit_error)?;

        xml.write(XmlEvent::start_element(ELEM_BINARIES))
            .map_err(emit_error)?;
        for (binary_id, binary) in meta.binaries.iter().enumerate() {
            let id = binary_id.to_string();

            if binary.data.is_protected() {
                let masked = self.obfuscator.process(&binary.data);
                xml.write(
                    XmlEvent::start_element(ELEM_BINARY)
                        .attr(ATTR_ID, &id)
                        .attr(ATTR_PROTECTED, VAL_TRUE),
                )
                .map_err(emit_error)?;
                xml.write(XmlEvent::characters(&base64::encode(masked)))
                    .map_err(emit_error)?;
            } else if binary.compress {
                let packed = compress::gzip(&binary.data)?;
                xml.write(
                    XmlEvent::start_element(ELEM_BINARY)
                        .attr(ATTR_ID, &id)
                        .attr(ATTR_COMPRESSED, VAL_TRUE),
                )
                .map_err(emit_error)?;
                xml.write(XmlEvent::characters(&base64::encode(packed)))
                    .map_err(emit_error)?;
            } else {
                xml.write(XmlEvent::start_element(ELEM_BINARY).attr(ATTR_ID, &id))
                    .map_err(emit_error)?;
                let encoded = base64::encode(&binary.data[..]);
                if !encoded.is_empty() {
                    xml.write(XmlEvent::characters(&encoded)).map_err(emit_error)?;
                }
            }
            xml.write(XmlEvent::end_element()).map_err(emit_error)?;

            self.binary_pool.push((id, binary.clone()));
        }
        xml.write(XmlEvent::end_element()).map_err(emit_error)?;

        xml.write(XmlEvent::start_element(ELEM_CUSTOM_DATA))
            .map_err(emit_error)?;
        for field in meta.fields.iter() {
            xml.write(XmlEvent::start_element(ELEM_CUSTOM_DATA_ITEM))
                .map_err(emit_error)?;
            self.write_text_element(xml, ELEM_KEY, &field.key)?;
            self.write_text_element(xml, ELEM_VALUE, &field.value)?;
            xml.write(XmlEvent::end_element()).map_err(emit_error)?;
        }
        xml.write(XmlEvent::end_element()).map_err(emit_error)?;

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn write_times<W: Write>(
        &mut self,
        xml: &mut EventWriter<W>,
        creation: &DateTime<Utc>,
        modification: &DateTime<Utc>,
        access: &DateTime<Utc>,
        expiry: &DateTime<Utc>,
        location: &DateTime<Utc>,
        expires: bool,
        usage_count: u32,
    ) -> Result<(), Error> {
        xml.write(XmlEvent::start_element(ELEM_TIMES))
            .map_err(emit_error)?;
        self.write_time_element(xml, ELEM_CREATION_TIME, creation)?;
        self.write_time_element(xml, ELEM_LAST_MOD_TIME, modification)?;
        self.write_time_element(xml, ELEM_LAST_ACCESS_TIME, access)?;
        self.write_time_element(xml, ELEM_EXPIRY_TIME, expiry)?;
        self.write_time_element(xml, ELEM_LOCATION_CHANGED, location)?;
        self.write_text_element(xml, ELEM_EXPIRES, bool_text(expires))?;
        self.write_text_element(xml, ELEM_USAGE_COUNT, &usage_count.to_string())?;
        xml.write(XmlEvent::end_element()).map_err(emit_error)
    }

    fn write_protected_string<W: Write>(
        &mut self,
        xml: &mut EventWriter<W>,
        key: &str,
        value: &ProtectedString,
    ) -> Result<(), Error> {
        xml.write(XmlEvent::start_element(ELEM_STRING))
            .map_err(emit_error)?;
        self.write_text_element(xml, ELEM_KEY, key)?;

        if value.is_protected() {
            let masked = self.obfuscator.process(value.as_bytes());
            xml.write(XmlEvent::start_element(ELEM_VALUE).attr(ATTR_PROTECTED, VAL_TRUE))
                .map_err(emit_error)?;
            let encoded = base64::encode(masked);
            if !encoded.is_empty() {
                xml.write(XmlEvent::characters(&encoded)).map_err(emit_error)?;
            }
            xml.write(XmlEvent::end_element()).map_err(emit_error)?;
        } else {
            self.write_text_element(xml, ELEM_VALUE, value.value())?;
        }

        xml.write(XmlEvent::end_element()).map_err(emit_error)
    }

    fn write_entry<W: Write>(&mut self, xml: &mut EventWriter<W>, entry: &Entry) -> Result<(), Error> {
        self.write_text_element(xml, ELEM_UUID, &entry.uuid.to_base64())?;
        self.write_text_element(xml, ELEM_ICON, &entry.icon.to_string())?;
        self.write_text_element(xml, ELEM_FG_COLOR, &entry.fg_color)?;
        self.write_text_element(xml, ELEM_BG_COLOR, &entry.bg_color)?;
        self.write_text_element(xml, ELEM_OVERRIDE_URL, &entry.override_url)?;
        self.write_text_element(xml, ELEM_TAGS, &entry.tags)?;

        if let Some(icon) = entry.custom_icon.upgrade() {
            self.write_text_element(xml, ELEM_CUSTOM_ICON_ID, &icon.uuid.to_base64())?;
        }

        self.write_times(
            xml,
            &entry.creation_time,
            &entry.modification_time,
            &entry.access_time,
            &entry.expiry_time,
            &entry.move_time,
            entry.expires,
            entry.usage_count,
        )?;

        xml.write(XmlEvent::start_element(ELEM_AUTO_TYPE))
            .map_err(emit_error)?;
        self.write_text_element(
            xml,
            ELEM_AUTO_TYPE_ENABLED,
            bool_text(entry.auto_type.enabled),
        )?;
        self.write_text_element(
            xml,
            ELEM_AUTO_TYPE_OBFUSCATION,
            &entry.auto_type.obfuscation.to_string(),
        )?;
        self.write_text_element(
            xml,
            ELEM_AUTO_TYPE_DEFAULT_SEQ,
            &entry.auto_type.default_sequence,
        )?;
        for association in entry.auto_type.associations.iter() {
            xml.write(XmlEvent::start_element(ELEM_AUTO_TYPE_ITEM))
                .map_err(emit_error)?;
            self.write_text_element(xml, ELEM_WINDOW, &association.window)?;
            self.write_text_element(xml, ELEM_KEYSTROKE_SEQUENCE, &association.sequence)?;
            xml.write(XmlEvent::end_element()).map_err(emit_error)?;
        }
        xml.write(XmlEvent::end_element()).map_err(emit_error)?;

        self.write_protected_string(xml, TITLE_FIELD, &entry.title)?;
        self.write_protected_string(xml, URL_FIELD, &entry.url)?;
        self.write_protected_string(xml, USERNAME_FIELD, &entry.username)?;
        self.write_protected_string(xml, PASSWORD_FIELD, &entry.password)?;
        self.write_protected_string(xml, NOTES_FIELD, &entry.notes)?;
        for field in entry.custom_fields.iter() {
            self.write_protected_string(xml, &field.key, &field.value)?;
        }

        for attachment in entry.attachments.iter() {
            xml.write(XmlEvent::start_element(ELEM_BINARY))
                .map_err(emit_error)?;
            self.write_text_element(xml, ELEM_KEY, &attachment.name)?;

            let pooled = attachment.binary.as_ref().and_then(|binary| {
                self.binary_pool
                    .iter()
                    .find(|(_, candidate)| Rc::ptr_eq(candidate, binary))
                    .map(|(id, _)| id.clone())
            });

            match pooled {
                Some(id) => {
                    xml.write(XmlEvent::start_element(ELEM_VALUE).attr(ATTR_REF, &id))
                        .map_err(emit_error)?;
                    xml.write(XmlEvent::end_element()).map_err(emit_error)?;
                }
                None => {
                    let encoded = attachment
                        .binary
                        .as_ref()
                        .map(|binary| base64::encode(&binary.data[..]))
                        .unwrap_or_default();
                    self.write_text_element(xml, ELEM_VALUE, &encoded)?;
                }
            }

            xml.write(XmlEvent::end_element()).map_err(emit_error)?;
        }

        xml.write(XmlEvent::start_element(ELEM_HISTORY))
            .map_err(emit_error)?;
        for history_entry in entry.history.iter() {
            xml.write(XmlEvent::start_element(ELEM_ENTRY))
                .map_err(emit_error)?;
            self.write_entry(xml, &history_entry.borrow())?;
            xml.write(XmlEvent::end_element()).map_err(emit_error)?;
        }
        xml.write(XmlEvent::end_element()).map_err(emit_error)?;

        Ok(())
    }

    fn write_group<W: Write>(&mut self, xml: &mut EventWriter<W>, group: &Group) -> Result<(), Error> {
        self.write_text_element(xml, ELEM_UUID, &group.uuid.to_base64())?;
        self.write_text_element(xml, ELEM_NAME, &group.name)?;
        self.write_text_element(xml, ELEM_NOTES, &group.notes)?;
        self.write_text_element(xml, ELEM_ICON, &group.icon.to_string())?;

        if let Some(icon) = group.custom_icon.upgrade() {
            self.write_text_element(xml, ELEM_CUSTOM_ICON_ID, &icon.uuid.to_base64())?;
        }

        self.write_times(
            xml,
            &group.creation_time,
            &group.modification_time,
            &group.access_time,
            &group.expiry_time,
            &group.move_time,
            group.expires,
            group.usage_count,
        )?;

        self.write_text_element(xml, ELEM_IS_EXPANDED, bool_text(group.expanded))?;
        self.write_text_element(
            xml,
            ELEM_GROUP_DEFAULT_AUTO_TYPE_SEQ,
            &group.default_autotype_sequence,
        )?;
        self.write_text_element(xml, ELEM_ENABLE_AUTO_TYPE, bool_text(group.autotype))?;
        self.write_text_element(xml, ELEM_ENABLE_SEARCHING, bool_text(group.search))?;

        if let Some(entry) = group.last_visible_entry.upgrade() {
            let uuid = entry.borrow().uuid.to_base64();
            self.write_text_element(xml, ELEM_LAST_TOP_VISIBLE_ENTRY, &uuid)?;
        }

        for entry in group.entries.iter() {
            xml.write(XmlEvent::start_element(ELEM_ENTRY))
                .map_err(emit_error)?;
            self.write_entry(xml, &entry.borrow())?;
            xml.write(XmlEvent::end_element()).map_err(emit_error)?;
        }

        for subgroup in group.groups.iter() {
            xml.write(XmlEvent::start_element(ELEM_GROUP))
                .map_err(emit_error)?;
            self.write_group(xml, &subgroup.borrow())?;
            xml.write(XmlEvent::end_element()).map_err(emit_error)?;
        }

        Ok(())
    }
}

pub fn export<P: AsRef<Path>>(path: P, db: &Database, key: &Key) -> Result<(), Error> {
    debug_assert!(db.cipher == Cipher::Aes, "KDBX only writes AES");
    if db.master_seed.len() > usize::from(u16::MAX) {
        debug_assert!(false, "master seed exceeds header field size");
        return Err(Error::Internal("Master seed size exceeds KDBX maximum."));
    }

    let mut file = std::fs::File::create(path).map_err(Error::Io)?;

    // Produce the final key used for encrypting the contents.
    let transformed_key = key.transform(
        &db.transform_seed,
        db.transform_rounds,
        SubKeyResolution::HashSubKeys,
    );
    let final_key = compose_final_key(&db.master_seed, &transformed_key);
    let cipher = AesCipher::new(&final_key);

    let mut start_bytes = [0u8; 32];
    rand::thread_rng().fill(&mut start_bytes[..]);

    // The header is staged in memory so its hash can be embedded in the XML.
    let mut header = Vec::new();
    ioutil::io_write_u32(&mut header, KDBX_SIGNATURE.0)?;
    ioutil::io_write_u32(&mut header, KDBX_SIGNATURE.1)?;
    ioutil::io_write_u32(&mut header, KDBX_FILE_VERSION_3_1)?;

    write_header_field(&mut header, HEADER_CIPHER_ID, &KDBX_CIPHER_AES)?;
    let compression = if db.compress {
        COMPRESSION_GZIP
    } else {
        COMPRESSION_NONE
    };
    write_header_field(
        &mut header,
        HEADER_COMPRESSION_FLAGS,
        &compression.to_le_bytes(),
    )?;
    write_header_field(&mut header, HEADER_MASTER_SEED, &db.master_seed)?;
    write_header_field(&mut header, HEADER_TRANSFORM_SEED, &db.transform_seed)?;
    write_header_field(
        &mut header,
        HEADER_TRANSFORM_ROUNDS,
        &db.transform_rounds.to_le_bytes(),
    )?;
    write_header_field(&mut header, HEADER_ENCRYPTION_IV, &db.init_vector)?;
    write_header_field(
        &mut header,
        HEADER_INNER_RANDOM_STREAM_KEY,
        &db.inner_random_stream_key,
    )?;
    write_header_field(&mut header, HEADER_CONTENT_STREAM_START_BYTES, &start_bytes)?;
    write_header_field(
        &mut header,
        HEADER_INNER_RANDOM_STREAM_ID,
        &InnerStreamAlgorithm::Salsa20.to_int().to_le_bytes(),
    )?;
    write_header_field(&mut header, HEADER_END, &[])?;

    let mut header_hash = [0u8; 32];
    header_hash.copy_from_slice(&Sha256::digest(&header)[..]);

    file.write_all(&header).map_err(Error::Io)?;

    let obfuscator = RandomObfuscator::from_stream_key(&db.inner_random_stream_key);
    let mut composer = XmlComposer::new(obfuscator, header_hash);

    // Assemble the plaintext payload: start bytes, then the hashed block
    // stream carrying the (optionally gzipped) XML document.
    let mut plaintext = Vec::new();
    plaintext.extend_from_slice(&start_bytes);

    let plaintext = if db.compress {
        let gz = GzEncoder::new(
            HashedBlockWrite::new(plaintext),
            Compression::default(),
        );
        let hashed = composer.write_document(gz, db)?.finish().map_err(Error::Io)?;
        hashed.finish().map_err(Error::Io)?
    } else {
        let hashed = composer.write_document(HashedBlockWrite::new(plaintext), db)?;
        hashed.finish().map_err(Error::Io)?
    };

    let encrypted = cbc_encrypt(&cipher, &db.init_vector, &plaintext);
    file.write_all(&encrypted).map_err(Error::Io)?;

    Ok(())
}
