use std::collections::HashMap;
use std::io::prelude::*;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::rc::Rc;

use chrono::offset::Utc;
use chrono::DateTime;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use xml::attribute::OwnedAttribute;
use xml::reader::{EventReader, ParserConfig, XmlEvent};

use crate::compress;
use crate::crypto::cipher::aes::AesCipher;
use crate::crypto::hashed_block_stream::HashedBlockRead;
use crate::crypto::modes::cbc_decrypt;
use crate::crypto::random_stream::{InnerStreamAlgorithm, RandomObfuscator};
use crate::database::{
    Attachment, Binary, BinaryRef, Cipher, Database, Entry, EntryRef, Group, GroupRef, Icon,
    IconRef, Metadata, Timestamped, Uuid,
};
use crate::error::Error;
use crate::ioutil::{self, StoredReadRef};
use crate::keys::{compose_final_key, Key, SubKeyResolution};
use crate::memutil;
use crate::security::{ProtectedBinary, ProtectedString};
use crate::timeutil;

use super::*;

struct KdbxOuterHeader {
    compress: bool,
    master_seed: Vec<u8>,
    transform_seed: [u8; 32],
    transform_rounds: u64,
    init_vector: [u8; 16],
    inner_random_stream_key: [u8; 32],
    content_start_bytes: [u8; 32],
}

fn read_header<R: Read>(input: &mut R) -> Result<KdbxOuterHeader, Error> {
    let not_kdbx = |_| Error::Format("Not a KDBX database.");

    let signature0 = ioutil::io_read_u32(input).map_err(not_kdbx)?;
    let signature1 = ioutil::io_read_u32(input).map_err(not_kdbx)?;
    if (signature0, signature1) != KDBX_SIGNATURE {
        return Err(Error::Format("Not a KDBX database."));
    }

    let version = ioutil::io_read_u32(input).map_err(not_kdbx)?;
    if (version & KDBX_VERSION_CRITICAL_MASK) > (KDBX_FILE_VERSION_3_1 & KDBX_VERSION_CRITICAL_MASK)
    {
        return Err(Error::Format("Unsupported KDBX version."));
    }

    let mut header = KdbxOuterHeader {
        compress: false,
        master_seed: Vec::new(),
        transform_seed: [0u8; 32],
        transform_rounds: 0,
        init_vector: [0u8; 16],
        inner_random_stream_key: [0u8; 32],
        content_start_bytes: [0u8; 32],
    };

    loop {
        let field_id = ioutil::io_read_u8(input)?;
        let field_size = ioutil::io_read_u16(input)?;

        // Read the field into its own bounded buffer before decoding.
        let data = ioutil::io_read_bytes(input, usize::from(field_size))?;

        match field_id {
            HEADER_END => break,
            HEADER_CIPHER_ID => {
                if data[..] != KDBX_CIPHER_AES[..] {
                    return Err(Error::Format("Unknown cipher in KDBX."));
                }
            }
            HEADER_COMPRESSION_FLAGS => {
                if data.len() < 4 {
                    return Err(Error::Format("Illegal compression field size in KDBX."));
                }
                match memutil::bytes_to_u32(&data) {
                    COMPRESSION_NONE => header.compress = false,
                    COMPRESSION_GZIP => header.compress = true,
                    _ => return Err(Error::Format("Unknown compression method in KDBX.")),
                }
            }
            HEADER_MASTER_SEED => header.master_seed = data,
            HEADER_TRANSFORM_SEED => {
                if data.len() != 32 {
                    return Err(Error::Format("Illegal transform seed size in KDBX."));
                }
                header.transform_seed.copy_from_slice(&data);
            }
            HEADER_TRANSFORM_ROUNDS => {
                if data.len() < 8 {
                    return Err(Error::Format("Illegal transform rounds size in KDBX."));
                }
                header.transform_rounds = memutil::bytes_to_u64(&data);
            }
            HEADER_ENCRYPTION_IV => {
                if data.len() != 16 {
                    return Err(Error::Format("Illegal initialization vector size in KDBX."));
                }
                header.init_vector.copy_from_slice(&data);
            }
            HEADER_INNER_RANDOM_STREAM_KEY => {
                if data.len() != 32 {
                    return Err(Error::Format("Illegal protected stream key size in KDBX."));
                }
                header.inner_random_stream_key.copy_from_slice(&data);
            }
            HEADER_CONTENT_STREAM_START_BYTES => {
                if data.len() != 32 {
                    return Err(Error::Format("Illegal stream start sequence size in KDBX."));
                }
                header.content_start_bytes.copy_from_slice(&data);
            }
            HEADER_INNER_RANDOM_STREAM_ID => {
                if data.len() < 4 {
                    return Err(Error::Format("Illegal random stream field size in KDBX."));
                }
                let stream_id = memutil::bytes_to_u32(&data);
                if InnerStreamAlgorithm::from_int(stream_id)
                    != Some(InnerStreamAlgorithm::Salsa20)
                {
                    return Err(Error::Format("Unknown random stream in KDBX."));
                }
            }
            _ => return Err(Error::Format("Illegal header field in KDBX.")),
        }
    }

    Ok(header)
}

fn xml_error(err: xml::reader::Error) -> Error {
    match err.kind() {
        xml::reader::ErrorKind::Io(io_err) => {
            Error::Io(std::io::Error::new(io_err.kind(), io_err.to_string()))
        }
        _ => Error::Format("Malformed XML in KDBX."),
    }
}

fn next_event<R: Read>(xml: &mut EventReader<R>) -> Result<XmlEvent, Error> {
    xml.next().map_err(xml_error)
}

/// Consumes events until the end of the element whose start has just been
/// read.
fn skip_element<R: Read>(xml: &mut EventReader<R>) -> Result<(), Error> {
    let mut depth = 0;
    loop {
        match next_event(xml)? {
            XmlEvent::StartElement { .. } => depth += 1,
            XmlEvent::EndElement { .. } => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            XmlEvent::EndDocument => {
                return Err(Error::Format("Unexpected end of XML document."))
            }
            _ => {}
        }
    }
}

/// Reads the text content of the current element, skipping any nested
/// elements.
fn read_text<R: Read>(xml: &mut EventReader<R>) -> Result<String, Error> {
    let mut depth = 0;
    let mut text = String::new();
    loop {
        match next_event(xml)? {
            XmlEvent::StartElement { .. } => depth += 1,
            XmlEvent::EndElement { .. } => {
                if depth == 0 {
                    return Ok(text);
                }
                depth -= 1;
            }
            XmlEvent::Characters(chars) => {
                if depth == 0 {
                    text = chars;
                }
            }
            XmlEvent::EndDocument => {
                return Err(Error::Format("Unexpected end of XML document."))
            }
            _ => {}
        }
    }
}

/// Boolean text the way the DOM reads it: the first character decides, an
/// empty element keeps the default.
fn parse_bool(text: &str, default: bool) -> bool {
    match text.chars().next() {
        None => default,
        Some(c) => matches!(c, '1' | 't' | 'T' | 'y' | 'Y'),
    }
}

fn read_bool<R: Read>(xml: &mut EventReader<R>, default: bool) -> Result<bool, Error> {
    Ok(parse_bool(&read_text(xml)?, default))
}

fn read_u32<R: Read>(xml: &mut EventReader<R>, default: u32) -> Result<u32, Error> {
    Ok(read_text(xml)?.trim().parse().unwrap_or(default))
}

fn read_i32<R: Read>(xml: &mut EventReader<R>, default: i32) -> Result<i32, Error> {
    Ok(read_text(xml)?.trim().parse().unwrap_or(default))
}

fn read_i64<R: Read>(xml: &mut EventReader<R>, default: i64) -> Result<i64, Error> {
    Ok(read_text(xml)?.trim().parse().unwrap_or(default))
}

fn read_time<R: Read>(xml: &mut EventReader<R>) -> Result<DateTime<Utc>, Error> {
    let text = read_text(xml)?;
    if text.is_empty() {
        return Ok(timeutil::never());
    }
    timeutil::parse_kdbx_time(&text)
}

fn attr_value<'a>(attributes: &'a [OwnedAttribute], name: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|attr| attr.name.local_name == name)
        .map(|attr| attr.value.as_str())
}

fn attr_bool(attributes: &[OwnedAttribute], name: &str) -> bool {
    attr_value(attributes, name)
        .map(|value| parse_bool(value, false))
        .unwrap_or(false)
}

fn decode_base64(text: &str) -> Result<Vec<u8>, Error> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    base64::decode(text.as_bytes()).map_err(|_| Error::Format("Invalid Base64 data."))
}

#[derive(Default)]
struct Times {
    creation: Option<DateTime<Utc>>,
    modification: Option<DateTime<Utc>>,
    access: Option<DateTime<Utc>>,
    expiry: Option<DateTime<Utc>>,
    location: Option<DateTime<Utc>>,
    expires: bool,
    usage_count: u32,
}

struct XmlParser {
    obfuscator: RandomObfuscator,
    group_pool: HashMap<String, GroupRef>,
    icon_pool: HashMap<String, IconRef>,
    binary_pool: HashMap<String, BinaryRef>,
    header_hash: Vec<u8>,
    meta: Metadata,
    root: Option<GroupRef>,
    last_selected_group: String,
    last_visible_group: String,
}

impl XmlParser {
    fn new(obfuscator: RandomObfuscator) -> XmlParser {
        XmlParser {
            obfuscator,
            group_pool: HashMap::new(),
            icon_pool: HashMap::new(),
            binary_pool: HashMap::new(),
            header_hash: Vec::new(),
            meta: Metadata::new(),
            root: None,
            last_selected_group: String::new(),
            last_visible_group: String::new(),
        }
    }

    /// Fetches the group a UUID refers to, allocating an empty shell when the
    /// reference precedes the definition. The definition pass later patches
    /// the shell in place.
    fn get_group(&mut self, uuid_str: &str) -> Result<Option<GroupRef>, Error> {
        if uuid_str.is_empty() {
            return Ok(None);
        }
        if let Some(group) = self.group_pool.get(uuid_str) {
            return Ok(Some(group.clone()));
        }

        let mut shell = Group::new();
        shell.uuid = Uuid::from_base64(uuid_str)?;
        let group = shell.wrap();
        self.group_pool.insert(uuid_str.to_string(), group.clone());
        Ok(Some(group))
    }

    fn parse<R: Read>(&mut self, input: R) -> Result<(), Error> {
        let config = ParserConfig::new()
            .trim_whitespace(true)
            .ignore_comments(true)
            .coalesce_characters(true);
        let mut xml = EventReader::new_with_config(input, config);

        let mut seen_doc_node = false;
        loop {
            match next_event(&mut xml)? {
                XmlEvent::StartElement { name, .. } => {
                    if name.local_name == ELEM_DOC_NODE {
                        seen_doc_node = true;
                        self.parse_doc_node(&mut xml)?;
                    } else {
                        skip_element(&mut xml)?;
                    }
                }
                XmlEvent::EndDocument => break,
                _ => {}
            }
        }

        if !seen_doc_node {
            return Err(Error::Format("No KeePassFile element in KDBX XML."));
        }
        Ok(())
    }

    fn parse_doc_node<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<(), Error> {
        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    ELEM_META => self.parse_meta(xml)?,
                    ELEM_ROOT => self.parse_root(xml)?,
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => return Ok(()),
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }
    }

    fn parse_root<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<(), Error> {
        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => {
                    if name.local_name == ELEM_GROUP {
                        let root = self.parse_group(xml)?;
                        self.root = Some(root);
                    } else {
                        skip_element(xml)?;
                    }
                }
                XmlEvent::EndElement { .. } => return Ok(()),
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }
    }

    fn parse_meta<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<(), Error> {
        let mut name_value = String::new();
        let mut name_time = timeutil::never();
        let mut desc_value = String::new();
        let mut desc_time = timeutil::never();
        let mut user_value = String::new();
        let mut user_time = timeutil::never();

        let mut recycle_bin_enabled = true;
        let mut recycle_bin_uuid = String::new();
        let mut entry_templates_uuid = String::new();

        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    ELEM_HEADER_HASH => self.header_hash = decode_base64(&read_text(xml)?)?,
                    ELEM_GENERATOR => self.meta.generator = read_text(xml)?,
                    ELEM_DB_NAME => name_value = read_text(xml)?,
                    ELEM_DB_NAME_CHANGED => name_time = read_time(xml)?,
                    ELEM_DB_DESC => desc_value = read_text(xml)?,
                    ELEM_DB_DESC_CHANGED => desc_time = read_time(xml)?,
                    ELEM_DB_DEFAULT_USER => user_value = read_text(xml)?,
                    ELEM_DB_DEFAULT_USER_CHANGED => user_time = read_time(xml)?,
                    ELEM_DB_MNTNC_HISTORY_DAYS => {
                        self.meta.maintenance_hist_days = read_u32(xml, 365)?
                    }
                    ELEM_DB_COLOR => self.meta.database_color = read_text(xml)?,
                    ELEM_DB_KEY_CHANGED => self.meta.master_key_changed = read_time(xml)?,
                    ELEM_DB_KEY_CHANGE_REC => {
                        self.meta.master_key_change_rec = read_i64(xml, -1)?
                    }
                    ELEM_DB_KEY_CHANGE_FORCE => {
                        self.meta.master_key_change_force = read_i64(xml, -1)?
                    }
                    ELEM_MEMORY_PROT => self.parse_memory_protection(xml)?,
                    ELEM_RECYCLE_BIN_ENABLED => recycle_bin_enabled = read_bool(xml, true)?,
                    ELEM_RECYCLE_BIN_UUID => recycle_bin_uuid = read_text(xml)?,
                    ELEM_RECYCLE_BIN_CHANGED => {
                        self.meta.recycle_bin_changed = read_time(xml)?
                    }
                    ELEM_ENTRY_TEMPLATES_GROUP => entry_templates_uuid = read_text(xml)?,
                    ELEM_ENTRY_TEMPLATES_GROUP_CHANGED => {
                        self.meta.entry_templates_changed = read_time(xml)?
                    }
                    ELEM_HISTORY_MAX_ITEMS => {
                        self.meta.history_max_items = read_i32(xml, -1)?
                    }
                    ELEM_HISTORY_MAX_SIZE => {
                        self.meta.history_max_size = read_i64(xml, -1)?
                    }
                    // All groups have to be parsed before these two can be
                    // resolved; remember the references for later.
                    ELEM_LAST_SELECTED_GROUP => self.last_selected_group = read_text(xml)?,
                    ELEM_LAST_TOP_VISIBLE_GROUP => self.last_visible_group = read_text(xml)?,
                    ELEM_CUSTOM_ICONS => self.parse_custom_icons(xml)?,
                    ELEM_BINARIES => self.parse_binaries(xml)?,
                    ELEM_CUSTOM_DATA => self.parse_custom_data(xml)?,
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => break,
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }

        self.meta.database_name = Timestamped::new(name_value, name_time);
        self.meta.database_desc = Timestamped::new(desc_value, desc_time);
        self.meta.default_username = Timestamped::new(user_value, user_time);

        if recycle_bin_enabled {
            if let Some(group) = self.get_group(&recycle_bin_uuid)? {
                self.meta.recycle_bin = Rc::downgrade(&group);
            }
        }
        if let Some(group) = self.get_group(&entry_templates_uuid)? {
            self.meta.entry_templates = Rc::downgrade(&group);
        }

        Ok(())
    }

    fn parse_memory_protection<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<(), Error> {
        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    ELEM_PROT_TITLE => {
                        self.meta.memory_protection.title = read_bool(xml, false)?
                    }
                    ELEM_PROT_USER_NAME => {
                        self.meta.memory_protection.username = read_bool(xml, false)?
                    }
                    ELEM_PROT_PASSWORD => {
                        self.meta.memory_protection.password = read_bool(xml, true)?
                    }
                    ELEM_PROT_URL => self.meta.memory_protection.url = read_bool(xml, false)?,
                    ELEM_PROT_NOTES => {
                        self.meta.memory_protection.notes = read_bool(xml, false)?
                    }
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => return Ok(()),
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }
    }

    fn parse_custom_icons<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<(), Error> {
        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => {
                    if name.local_name == ELEM_CUSTOM_ICON_ITEM {
                        self.parse_custom_icon(xml)?;
                    } else {
                        skip_element(xml)?;
                    }
                }
                XmlEvent::EndElement { .. } => return Ok(()),
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }
    }

    fn parse_custom_icon<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<(), Error> {
        let mut uuid_str = String::new();
        let mut data = Vec::new();

        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    ELEM_UUID => uuid_str = read_text(xml)?,
                    ELEM_CUSTOM_ICON_ITEM_DATA => data = decode_base64(&read_text(xml)?)?,
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => break,
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }

        if data.is_empty() {
            return Ok(());
        }

        let icon = Rc::new(Icon::new(Uuid::from_base64(&uuid_str)?, data));
        self.meta.add_icon(icon.clone());
        self.icon_pool.insert(uuid_str, icon);
        Ok(())
    }

    fn parse_binaries<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<(), Error> {
        loop {
            match next_event(xml)? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    if name.local_name == ELEM_BINARY {
                        let id = attr_value(&attributes, ATTR_ID)
                            .unwrap_or_default()
                            .to_string();
                        let binary = Rc::new(self.read_binary_value(xml, &attributes)?);
                        self.meta.add_binary(binary.clone());
                        self.binary_pool.insert(id, binary);
                    } else {
                        skip_element(xml)?;
                    }
                }
                XmlEvent::EndElement { .. } => return Ok(()),
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }
    }

    fn parse_custom_data<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<(), Error> {
        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => {
                    if name.local_name == ELEM_CUSTOM_DATA_ITEM {
                        let mut key = String::new();
                        let mut value = String::new();
                        loop {
                            match next_event(xml)? {
                                XmlEvent::StartElement { name, .. } => {
                                    match name.local_name.as_str() {
                                        ELEM_KEY => key = read_text(xml)?,
                                        ELEM_VALUE => value = read_text(xml)?,
                                        _ => skip_element(xml)?,
                                    }
                                }
                                XmlEvent::EndElement { .. } => break,
                                XmlEvent::EndDocument => {
                                    return Err(Error::Format(
                                        "Unexpected end of XML document.",
                                    ))
                                }
                                _ => {}
                            }
                        }

                        if key.is_empty() {
                            debug_assert!(false, "custom data item without a key");
                            continue;
                        }
                        self.meta.add_field(key, value);
                    } else {
                        skip_element(xml)?;
                    }
                }
                XmlEvent::EndElement { .. } => return Ok(()),
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }
    }

    /// Reads a `Value`-style protected string: masked values are base64 of
    /// the XOR with the inner random stream.
    fn read_protected_value<R: Read>(
        &mut self,
        xml: &mut EventReader<R>,
        attributes: &[OwnedAttribute],
    ) -> Result<ProtectedString, Error> {
        let protected = attr_bool(attributes, ATTR_PROTECTED);
        let text = read_text(xml)?;

        if protected {
            let raw = decode_base64(&text)?;
            if !raw.is_empty() {
                let plain = self.obfuscator.process(&raw);
                let value = String::from_utf8(plain)
                    .map_err(|_| Error::Format("Invalid UTF-8 in protected value."))?;
                return Ok(ProtectedString::new(value, true));
            }
            return Ok(ProtectedString::new(String::new(), true));
        }

        let in_memory = attr_bool(attributes, ATTR_PROTECTED_IN_MEMORY);
        Ok(ProtectedString::new(text, in_memory))
    }

    /// Reads binary content from the current element, honoring the
    /// `Protected` and `Compressed` attributes.
    fn read_binary_value<R: Read>(
        &mut self,
        xml: &mut EventReader<R>,
        attributes: &[OwnedAttribute],
    ) -> Result<Binary, Error> {
        if attr_bool(attributes, ATTR_PROTECTED) {
            let raw = decode_base64(&read_text(xml)?)?;
            let data = self.obfuscator.process(&raw);
            return Ok(Binary::new(ProtectedBinary::new(data, true)));
        }

        let in_memory = attr_bool(attributes, ATTR_PROTECTED_IN_MEMORY);
        if attr_bool(attributes, ATTR_COMPRESSED) {
            let raw = decode_base64(&read_text(xml)?)?;
            let data = compress::gunzip(&raw)?;
            let mut binary = Binary::new(ProtectedBinary::new(data, in_memory));
            binary.compress = true;
            return Ok(binary);
        }

        let data = decode_base64(&read_text(xml)?)?;
        Ok(Binary::new(ProtectedBinary::new(data, in_memory)))
    }

    fn parse_times<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<Times, Error> {
        let mut times = Times::default();
        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    ELEM_CREATION_TIME => times.creation = Some(read_time(xml)?),
                    ELEM_LAST_MOD_TIME => times.modification = Some(read_time(xml)?),
                    ELEM_LAST_ACCESS_TIME => times.access = Some(read_time(xml)?),
                    ELEM_EXPIRY_TIME => times.expiry = Some(read_time(xml)?),
                    ELEM_LOCATION_CHANGED => times.location = Some(read_time(xml)?),
                    ELEM_EXPIRES => times.expires = read_bool(xml, false)?,
                    ELEM_USAGE_COUNT => times.usage_count = read_u32(xml, 0)?,
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => return Ok(times),
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }
    }

    fn parse_auto_type<R: Read>(
        &mut self,
        xml: &mut EventReader<R>,
        entry: &mut Entry,
    ) -> Result<(), Error> {
        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    ELEM_AUTO_TYPE_ENABLED => {
                        entry.auto_type.enabled = read_bool(xml, false)?
                    }
                    ELEM_AUTO_TYPE_OBFUSCATION => {
                        entry.auto_type.obfuscation = read_u32(xml, 0)?
                    }
                    ELEM_AUTO_TYPE_DEFAULT_SEQ => {
                        entry.auto_type.default_sequence = read_text(xml)?
                    }
                    ELEM_AUTO_TYPE_ITEM => {
                        let mut window = String::new();
                        let mut sequence = String::new();
                        loop {
                            match next_event(xml)? {
                                XmlEvent::StartElement { name, .. } => {
                                    match name.local_name.as_str() {
                                        ELEM_WINDOW => window = read_text(xml)?,
                                        ELEM_KEYSTROKE_SEQUENCE => sequence = read_text(xml)?,
                                        _ => skip_element(xml)?,
                                    }
                                }
                                XmlEvent::EndElement { .. } => break,
                                XmlEvent::EndDocument => {
                                    return Err(Error::Format(
                                        "Unexpected end of XML document.",
                                    ))
                                }
                                _ => {}
                            }
                        }
                        entry.auto_type.add_association(window, sequence);
                    }
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => return Ok(()),
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }
    }

    fn parse_entry_string<R: Read>(
        &mut self,
        xml: &mut EventReader<R>,
        entry: &mut Entry,
    ) -> Result<(), Error> {
        let mut key = String::new();
        let mut value = ProtectedString::empty();

        loop {
            match next_event(xml)? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => match name.local_name.as_str() {
                    ELEM_KEY => key = read_text(xml)?,
                    ELEM_VALUE => value = self.read_protected_value(xml, &attributes)?,
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => break,
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }

        match key.as_str() {
            TITLE_FIELD => entry.title = value,
            URL_FIELD => entry.url = value,
            USERNAME_FIELD => entry.username = value,
            PASSWORD_FIELD => entry.password = value,
            NOTES_FIELD => entry.notes = value,
            _ => entry.add_custom_field(key, value),
        }
        Ok(())
    }

    fn parse_entry_binary<R: Read>(
        &mut self,
        xml: &mut EventReader<R>,
        bin_attributes: &[OwnedAttribute],
        entry: &mut Entry,
    ) -> Result<(), Error> {
        let mut key = String::new();
        let mut binary: Option<BinaryRef> = None;

        loop {
            match next_event(xml)? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => match name.local_name.as_str() {
                    ELEM_KEY => key = read_text(xml)?,
                    ELEM_VALUE => {
                        if let Some(reference) = attr_value(&attributes, ATTR_REF) {
                            let reference = reference.to_string();
                            let _ = read_text(xml)?;
                            binary = Some(
                                self.binary_pool
                                    .get(&reference)
                                    .ok_or(Error::Format(
                                        "Entry attachment refers to non-existing binary data.",
                                    ))?
                                    .clone(),
                            );
                        } else {
                            binary = Some(Rc::new(self.read_binary_value(xml, bin_attributes)?));
                        }
                    }
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => break,
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }

        entry.add_attachment(Attachment::new(key, binary));
        Ok(())
    }

    fn parse_entry<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<EntryRef, Error> {
        let mut entry = Entry::new();

        loop {
            match next_event(xml)? {
                XmlEvent::StartElement {
                    name, attributes, ..
                } => match name.local_name.as_str() {
                    ELEM_UUID => entry.uuid = Uuid::from_base64(&read_text(xml)?)?,
                    ELEM_ICON => entry.icon = read_u32(xml, 0)?,
                    ELEM_FG_COLOR => entry.fg_color = read_text(xml)?,
                    ELEM_BG_COLOR => entry.bg_color = read_text(xml)?,
                    ELEM_OVERRIDE_URL => entry.override_url = read_text(xml)?,
                    ELEM_TAGS => entry.tags = read_text(xml)?,
                    ELEM_CUSTOM_ICON_ID => {
                        let uuid_str = read_text(xml)?;
                        match self.icon_pool.get(&uuid_str) {
                            Some(icon) => entry.custom_icon = Rc::downgrade(icon),
                            // An unknown icon reference is dropped.
                            None => debug_assert!(false, "unknown custom icon reference"),
                        }
                    }
                    ELEM_TIMES => {
                        let times = self.parse_times(xml)?;
                        entry.creation_time = times.creation.unwrap_or_else(timeutil::never);
                        entry.modification_time =
                            times.modification.unwrap_or_else(timeutil::never);
                        entry.access_time = times.access.unwrap_or_else(timeutil::never);
                        entry.expiry_time = times.expiry.unwrap_or_else(timeutil::never);
                        entry.move_time = times.location.unwrap_or_else(timeutil::never);
                        entry.expires = times.expires;
                        entry.usage_count = times.usage_count;
                    }
                    ELEM_AUTO_TYPE => self.parse_auto_type(xml, &mut entry)?,
                    ELEM_STRING => self.parse_entry_string(xml, &mut entry)?,
                    ELEM_BINARY => self.parse_entry_binary(xml, &attributes, &mut entry)?,
                    ELEM_HISTORY => loop {
                        match next_event(xml)? {
                            XmlEvent::StartElement { name, .. } => {
                                if name.local_name == ELEM_ENTRY {
                                    let history_entry = self.parse_entry(xml)?;
                                    entry.add_history_entry(history_entry);
                                } else {
                                    skip_element(xml)?;
                                }
                            }
                            XmlEvent::EndElement { .. } => break,
                            XmlEvent::EndDocument => {
                                return Err(Error::Format(
                                    "Unexpected end of XML document.",
                                ))
                            }
                            _ => {}
                        }
                    },
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => break,
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }

        Ok(entry.wrap())
    }

    fn parse_group<R: Read>(&mut self, xml: &mut EventReader<R>) -> Result<GroupRef, Error> {
        let mut group = Group::new();
        let mut uuid_str = String::new();
        let mut last_top_entry = Uuid::zero();

        loop {
            match next_event(xml)? {
                XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                    ELEM_UUID => {
                        uuid_str = read_text(xml)?;
                        group.uuid = Uuid::from_base64(&uuid_str)?;
                    }
                    ELEM_NAME => group.name = read_text(xml)?,
                    ELEM_NOTES => group.notes = read_text(xml)?,
                    ELEM_ICON => group.icon = read_u32(xml, 0)?,
                    ELEM_CUSTOM_ICON_ID => {
                        let icon_uuid = read_text(xml)?;
                        match self.icon_pool.get(&icon_uuid) {
                            Some(icon) => group.custom_icon = Rc::downgrade(icon),
                            None => debug_assert!(false, "unknown custom icon reference"),
                        }
                    }
                    ELEM_TIMES => {
                        let times = self.parse_times(xml)?;
                        group.creation_time = times.creation.unwrap_or_else(timeutil::never);
                        group.modification_time =
                            times.modification.unwrap_or_else(timeutil::never);
                        group.access_time = times.access.unwrap_or_else(timeutil::never);
                        group.expiry_time = times.expiry.unwrap_or_else(timeutil::never);
                        group.move_time = times.location.unwrap_or_else(timeutil::never);
                        group.expires = times.expires;
                        group.usage_count = times.usage_count;
                    }
                    ELEM_IS_EXPANDED => group.expanded = read_bool(xml, false)?,
                    ELEM_GROUP_DEFAULT_AUTO_TYPE_SEQ => {
                        group.default_autotype_sequence = read_text(xml)?
                    }
                    ELEM_ENABLE_AUTO_TYPE => group.autotype = read_bool(xml, false)?,
                    ELEM_ENABLE_SEARCHING => group.search = read_bool(xml, false)?,
                    ELEM_LAST_TOP_VISIBLE_ENTRY => {
                        let text = read_text(xml)?;
                        if !text.is_empty() {
                            last_top_entry = Uuid::from_base64(&text)?;
                        }
                    }
                    ELEM_ENTRY => {
                        let entry = self.parse_entry(xml)?;
                        if entry.borrow().uuid == last_top_entry {
                            group.last_visible_entry = Rc::downgrade(&entry);
                        }
                        group.add_entry(entry);
                    }
                    ELEM_GROUP => {
                        let subgroup = self.parse_group(xml)?;
                        group.add_group(subgroup);
                    }
                    _ => skip_element(xml)?,
                },
                XmlEvent::EndElement { .. } => break,
                XmlEvent::EndDocument => {
                    return Err(Error::Format("Unexpected end of XML document."))
                }
                _ => {}
            }
        }

        // Commit into the pool: a shell allocated for a forward reference is
        // patched in place so every earlier handle sees the parsed group.
        if uuid_str.is_empty() {
            return Ok(group.wrap());
        }
        if let Some(shell) = self.group_pool.get(&uuid_str) {
            let shell = shell.clone();
            *shell.borrow_mut() = group;
            return Ok(shell);
        }
        let group = group.wrap();
        self.group_pool.insert(uuid_str, group.clone());
        Ok(group)
    }
}

pub fn import<P: AsRef<Path>>(path: P, key: &Key) -> Result<Database, Error> {
    let file = std::fs::File::open(path).map_err(|_| Error::FileNotFound)?;
    import_reader(&mut BufReader::new(file), key)
}

pub(crate) fn import_reader<R: Read>(input: &mut R, key: &Key) -> Result<Database, Error> {
    let (header, header_data) = {
        let mut stored = StoredReadRef::new(input);
        let header = read_header(&mut stored)?;
        (header, stored.data())
    };
    let header_hash = Sha256::digest(&header_data);

    let mut db = Database::new();
    db.cipher = Cipher::Aes;
    db.compress = header.compress;
    db.master_seed = header.master_seed.clone();
    db.init_vector = header.init_vector;
    db.transform_seed = header.transform_seed;
    db.inner_random_stream_key = header.inner_random_stream_key;
    db.transform_rounds = header.transform_rounds;

    // Produce the final key used for decrypting the contents.
    let transformed_key = key.transform(
        &header.transform_seed,
        header.transform_rounds,
        SubKeyResolution::HashSubKeys,
    );
    let final_key = compose_final_key(&db.master_seed, &transformed_key);

    let mut ciphertext = Vec::new();
    input.read_to_end(&mut ciphertext).map_err(Error::Io)?;

    let cipher = AesCipher::new(&final_key);
    let content =
        cbc_decrypt(&cipher, &header.init_vector, &ciphertext).map_err(|_| Error::BadPassword)?;

    // The decrypted payload opens with the start bytes from the header.
    if content.len() < 32 || content[0..32] != header.content_start_bytes {
        return Err(Error::BadPassword);
    }

    let obfuscator = RandomObfuscator::from_stream_key(&header.inner_random_stream_key);
    let mut parser = XmlParser::new(obfuscator);

    let block_stream = HashedBlockRead::new(Cursor::new(&content[32..]), true);
    if header.compress {
        parser.parse(GzDecoder::new(block_stream))?;
    } else {
        parser.parse(block_stream)?;
    }

    if !parser.header_hash.is_empty() && parser.header_hash[..] != header_hash[..] {
        return Err(Error::Format("Header checksum error in KDBX."));
    }

    let root = parser
        .root
        .take()
        .ok_or(Error::Format("No Root group in KDBX XML."))?;

    let mut meta = parser.meta;
    if let Some(group) = parser.group_pool.get(&parser.last_selected_group) {
        meta.last_selected_group = Rc::downgrade(group);
    }
    if let Some(group) = parser.group_pool.get(&parser.last_visible_group) {
        meta.last_visible_group = Rc::downgrade(group);
    }

    db.root = root;
    db.meta = Some(meta);
    Ok(db)
}
