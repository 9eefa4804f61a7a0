//! The in-memory database model: a tree of groups and entries plus the
//! metadata, binaries and icons that a KDBX container carries around it.
//!
//! Groups and entries are shared through `Rc<RefCell<..>>`; every
//! back-reference (custom icons, recycle bin, last visible entry, ...) is a
//! `Weak` handle that dangles safely when its target goes away.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use chrono::offset::Utc;
use chrono::DateTime;
use rand::prelude::*;

use crate::error::Error;
use crate::security::{ProtectedBinary, ProtectedString};
use crate::timeutil;

pub type GroupRef = Rc<RefCell<Group>>;
pub type WeakGroupRef = Weak<RefCell<Group>>;
pub type EntryRef = Rc<RefCell<Entry>>;
pub type WeakEntryRef = Weak<RefCell<Entry>>;
pub type IconRef = Rc<Icon>;
pub type WeakIconRef = Weak<Icon>;
pub type BinaryRef = Rc<Binary>;

/// The standard size of a UUID in bytes.
pub const UUID_SIZE: usize = 16;

/// Default number of key transformation rounds.
pub const DEFAULT_TRANSFORM_ROUNDS: u64 = 8192;

/// Compares two weak handles: equal when both are dead or both point at the
/// same live allocation.
fn weak_refs_equal<T>(a: &Weak<T>, b: &Weak<T>) -> bool {
    match (a.upgrade(), b.upgrade()) {
        (None, None) => true,
        (Some(x), Some(y)) => Rc::ptr_eq(&x, &y),
        _ => false,
    }
}

/// A 16-byte identifier for groups, entries and icons. Generated values are
/// cryptographically random and never all-zero.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Uuid([u8; UUID_SIZE]);

impl Uuid {
    pub const ZERO: Uuid = Uuid([0u8; UUID_SIZE]);

    pub const fn wrap(data: [u8; UUID_SIZE]) -> Uuid {
        Uuid(data)
    }

    pub fn from_slice(data: &[u8]) -> Uuid {
        debug_assert!(data.len() >= UUID_SIZE, "not enough bytes for a UUID");
        let mut uuid = Uuid::ZERO;
        uuid.0.copy_from_slice(&data[0..UUID_SIZE]);
        uuid
    }

    pub const fn zero() -> Uuid {
        Uuid::ZERO
    }

    /// Creates a new random UUID.
    pub fn random() -> Uuid {
        let mut rng = rand::thread_rng();
        let mut uuid = Uuid::zero();
        loop {
            rng.fill(&mut uuid.0);
            if !uuid.is_zero() {
                break;
            }
        }
        uuid
    }

    pub fn is_zero(&self) -> bool {
        self.0 == Uuid::ZERO.0
    }

    pub fn as_bytes(&self) -> &[u8; UUID_SIZE] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        base64::encode(self.0)
    }

    pub fn from_base64(text: &str) -> Result<Uuid, Error> {
        let bytes =
            base64::decode(text.as_bytes()).map_err(|_| Error::Format("Invalid UUID encoding."))?;
        if bytes.len() != UUID_SIZE {
            return Err(Error::Format("Invalid UUID size."));
        }
        Ok(Uuid::from_slice(&bytes))
    }
}

impl Default for Uuid {
    fn default() -> Uuid {
        Uuid::zero()
    }
}

impl std::fmt::Display for Uuid {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let hex = crate::memutil::to_hex_string(&self.0);
        let mut first = true;
        for chunk in hex.as_bytes().chunks(8) {
            if !first {
                write!(f, "-")?;
            }
            write!(f, "{}", std::str::from_utf8(chunk).unwrap_or(""))?;
            first = false;
        }
        Ok(())
    }
}

/// Payload cipher selection. KDB may use either; KDBX always writes AES.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Cipher {
    Aes,
    Twofish,
}

/// A value paired with the time it was last modified. Assigning through
/// `set` stamps the current time.
#[derive(Clone, PartialEq)]
pub struct Timestamped<T> {
    value: T,
    time: DateTime<Utc>,
}

impl<T> Timestamped<T> {
    pub fn new(value: T, time: DateTime<Utc>) -> Timestamped<T> {
        Timestamped { value, time }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.time = Utc::now();
    }
}

impl<T: Default> Default for Timestamped<T> {
    fn default() -> Timestamped<T> {
        Timestamped::new(T::default(), timeutil::never())
    }
}

/// A custom icon: image bytes keyed by UUID. Compared by image content.
pub struct Icon {
    pub uuid: Uuid,
    pub data: Vec<u8>,
}

impl Icon {
    pub fn new(uuid: Uuid, data: Vec<u8>) -> Icon {
        Icon { uuid, data }
    }
}

impl PartialEq for Icon {
    fn eq(&self, other: &Icon) -> bool {
        self.data == other.data
    }
}

impl Eq for Icon {}

/// A byte string, possibly shared by several attachments. The `compress`
/// flag is a serialization hint only and does not take part in equality.
#[derive(Debug)]
pub struct Binary {
    pub data: ProtectedBinary,
    pub compress: bool,
}

impl Binary {
    pub fn new(data: ProtectedBinary) -> Binary {
        Binary {
            data,
            compress: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl PartialEq for Binary {
    fn eq(&self, other: &Binary) -> bool {
        self.data == other.data
    }
}

impl Eq for Binary {}

/// A named attachment. The binary may be shared with other attachments when
/// the container pools it.
#[derive(Clone, Debug)]
pub struct Attachment {
    pub name: String,
    pub binary: Option<BinaryRef>,
}

impl Attachment {
    pub fn new(name: String, binary: Option<BinaryRef>) -> Attachment {
        Attachment { name, binary }
    }

    pub fn to_json(&self) -> String {
        let mut json = String::from("{");
        if !self.name.is_empty() {
            json.push_str(&format!("\"name\":\"{}\"", self.name));
        }
        if let Some(ref binary) = self.binary {
            if !binary.is_empty() {
                if !self.name.is_empty() {
                    json.push(',');
                }
                json.push_str(&format!(
                    "\"data\":\"{}\"",
                    String::from_utf8_lossy(&binary.data)
                ));
            }
        }
        json.push('}');
        json
    }
}

impl PartialEq for Attachment {
    fn eq(&self, other: &Attachment) -> bool {
        let same_binary = match (&self.binary, &other.binary) {
            (Some(a), Some(b)) => **a == **b,
            (None, None) => true,
            _ => false,
        };
        self.name == other.name && same_binary
    }
}

impl Eq for Attachment {}

/// One auto-type window/keystroke pair.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Association {
    pub window: String,
    pub sequence: String,
}

impl Association {
    pub fn new(window: String, sequence: String) -> Association {
        Association { window, sequence }
    }
}

/// Auto-type configuration of an entry.
#[derive(Clone, PartialEq, Eq, Default, Debug)]
pub struct AutoType {
    pub enabled: bool,
    pub obfuscation: u32,
    pub default_sequence: String,
    pub associations: Vec<Association>,
}

impl AutoType {
    pub fn add_association(&mut self, window: String, sequence: String) {
        self.associations.push(Association::new(window, sequence));
    }
}

/// A custom string field on an entry.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct EntryField {
    pub key: String,
    pub value: ProtectedString,
}

impl EntryField {
    pub fn new(key: String, value: ProtectedString) -> EntryField {
        EntryField { key, value }
    }
}

/// A password entry.
#[derive(Debug)]
pub struct Entry {
    pub uuid: Uuid,
    pub icon: u32,
    pub custom_icon: WeakIconRef,
    pub title: ProtectedString,
    pub url: ProtectedString,
    pub override_url: String,
    pub username: ProtectedString,
    pub password: ProtectedString,
    pub notes: ProtectedString,
    pub tags: String,
    pub creation_time: DateTime<Utc>,
    pub modification_time: DateTime<Utc>,
    pub access_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub move_time: DateTime<Utc>,
    pub expires: bool,
    pub usage_count: u32,
    pub bg_color: String,
    pub fg_color: String,
    pub auto_type: AutoType,
    pub attachments: Vec<Attachment>,

    /// Older versions of this entry.
    pub history: Vec<EntryRef>,

    pub custom_fields: Vec<EntryField>,
}

impl Entry {
    pub fn new() -> Entry {
        Entry {
            uuid: Uuid::random(),
            icon: 0,
            custom_icon: Weak::new(),
            title: ProtectedString::empty(),
            url: ProtectedString::empty(),
            override_url: String::new(),
            username: ProtectedString::empty(),
            password: ProtectedString::empty(),
            notes: ProtectedString::empty(),
            tags: String::new(),
            creation_time: timeutil::never(),
            modification_time: timeutil::never(),
            access_time: timeutil::never(),
            expiry_time: timeutil::never(),
            move_time: timeutil::never(),
            expires: false,
            usage_count: 0,
            bg_color: String::new(),
            fg_color: String::new(),
            auto_type: AutoType::default(),
            attachments: Vec::new(),
            history: Vec::new(),
            custom_fields: Vec::new(),
        }
    }

    #[inline]
    pub fn wrap(self) -> EntryRef {
        Rc::new(RefCell::new(self))
    }

    pub fn add_attachment(&mut self, attachment: Attachment) {
        self.attachments.push(attachment);
    }

    pub fn has_attachment(&self) -> bool {
        !self.attachments.is_empty()
    }

    pub fn add_history_entry(&mut self, entry: EntryRef) {
        self.history.push(entry);
    }

    pub fn add_custom_field(&mut self, key: String, value: ProtectedString) {
        self.custom_fields.push(EntryField::new(key, value));
    }

    pub fn has_non_default_auto_type(&self) -> bool {
        self.auto_type != AutoType::default()
    }

    /// KeePass 1.x embeds per-group settings as sentinel entries. They are
    /// hidden from logical views.
    pub fn is_meta_entry(&self) -> bool {
        let has_binstream_attachment = self
            .attachments
            .iter()
            .any(|attachment| attachment.name == "bin-stream");

        self.title.value() == "Meta-Info"
            && self.url.value() == "$"
            && self.username.value() == "SYSTEM"
            && !self.notes.is_empty()
            && has_binstream_attachment
    }

    pub fn to_json(&self) -> String {
        let mut json = String::from("{");
        json.push_str(&format!("\"icon\":{}", self.icon));
        if !self.title.is_empty() {
            json.push_str(&format!(",\"title\":\"{}\"", self.title.value()));
        }
        if !self.url.is_empty() {
            json.push_str(&format!(",\"url\":\"{}\"", self.url.value()));
        }
        if !self.username.is_empty() {
            json.push_str(&format!(",\"username\":\"{}\"", self.username.value()));
        }
        if !self.password.is_empty() {
            json.push_str(&format!(",\"password\":\"{}\"", self.password.value()));
        }
        if !self.notes.is_empty() {
            json.push_str(&format!(",\"notes\":\"{}\"", self.notes.value()));
        }
        if self.creation_time != timeutil::never() {
            json.push_str(&format!(
                ",\"creation_time\":\"{}\"",
                timeutil::format_local_time(&self.creation_time)
            ));
        }
        if self.modification_time != timeutil::never() {
            json.push_str(&format!(
                ",\"modification_time\":\"{}\"",
                timeutil::format_local_time(&self.modification_time)
            ));
        }
        if self.access_time != timeutil::never() {
            json.push_str(&format!(
                ",\"access_time\":\"{}\"",
                timeutil::format_local_time(&self.access_time)
            ));
        }
        if self.expiry_time != timeutil::never() {
            json.push_str(&format!(
                ",\"expiry_time\":\"{}\"",
                timeutil::format_local_time(&self.expiry_time)
            ));
        }
        for attachment in self.attachments.iter() {
            json.push_str(&format!(",\"attachment\":{}", attachment.to_json()));
        }
        json.push('}');
        json
    }
}

impl Default for Entry {
    fn default() -> Entry {
        Entry::new()
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        if self.history.len() != other.history.len() {
            return false;
        }
        let same_history = self
            .history
            .iter()
            .zip(other.history.iter())
            .all(|(a, b)| *a.borrow() == *b.borrow());

        self.uuid == other.uuid
            && self.icon == other.icon
            && weak_refs_equal(&self.custom_icon, &other.custom_icon)
            && self.title == other.title
            && self.url == other.url
            && self.override_url == other.override_url
            && self.username == other.username
            && self.password == other.password
            && self.notes == other.notes
            && self.tags == other.tags
            && self.creation_time == other.creation_time
            && self.modification_time == other.modification_time
            && self.access_time == other.access_time
            && self.expiry_time == other.expiry_time
            && self.move_time == other.move_time
            && self.expires == other.expires
            && self.usage_count == other.usage_count
            && self.bg_color == other.bg_color
            && self.fg_color == other.fg_color
            && self.auto_type == other.auto_type
            && self.attachments == other.attachments
            && same_history
            && self.custom_fields == other.custom_fields
    }
}

impl Eq for Entry {}

/// A group containing entries and subgroups. Groups form a tree rooted at
/// `Database::root`.
pub struct Group {
    pub uuid: Uuid,
    pub icon: u32,
    pub custom_icon: WeakIconRef,
    pub name: String,
    pub notes: String,
    pub creation_time: DateTime<Utc>,
    pub modification_time: DateTime<Utc>,
    pub access_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub move_time: DateTime<Utc>,

    /// Legacy KDB flags.
    pub flags: u16,

    pub expires: bool,
    pub expanded: bool,
    pub autotype: bool,
    pub search: bool,
    pub usage_count: u32,
    pub default_autotype_sequence: String,
    pub last_visible_entry: WeakEntryRef,

    pub groups: Vec<GroupRef>,
    pub entries: Vec<EntryRef>,
}

impl Group {
    pub fn new() -> Group {
        Group {
            uuid: Uuid::random(),
            icon: 0,
            custom_icon: Weak::new(),
            name: String::new(),
            notes: String::new(),
            creation_time: timeutil::never(),
            modification_time: timeutil::never(),
            access_time: timeutil::never(),
            expiry_time: timeutil::never(),
            move_time: timeutil::never(),
            flags: 0,
            expires: false,
            expanded: false,
            autotype: false,
            search: false,
            usage_count: 0,
            default_autotype_sequence: String::new(),
            last_visible_entry: Weak::new(),
            groups: Vec::new(),
            entries: Vec::new(),
        }
    }

    #[inline]
    pub fn wrap(self) -> GroupRef {
        Rc::new(RefCell::new(self))
    }

    pub fn add_group(&mut self, group: GroupRef) {
        self.groups.push(group);
    }

    pub fn add_entry(&mut self, entry: EntryRef) {
        self.entries.push(entry);
    }

    pub fn has_non_meta_entries(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| !entry.borrow().is_meta_entry())
    }

    pub fn to_json(&self) -> String {
        let mut json = String::from("{");
        json.push_str(&format!("\"icon\":{}", self.icon));
        if self.custom_icon.upgrade().is_some() {
            json.push_str(",\"custom_icon\":\"1\"");
        }
        if !self.name.is_empty() {
            json.push_str(&format!(",\"name\":\"{}\"", self.name));
        }
        if !self.notes.is_empty() {
            json.push_str(&format!(",\"notes\":\"{}\"", self.notes));
        }
        if self.creation_time != timeutil::never() {
            json.push_str(&format!(
                ",\"creation_time\":\"{}\"",
                timeutil::format_local_time(&self.creation_time)
            ));
        }
        if self.modification_time != timeutil::never() {
            json.push_str(&format!(
                ",\"modification_time\":\"{}\"",
                timeutil::format_local_time(&self.modification_time)
            ));
        }
        if self.access_time != timeutil::never() {
            json.push_str(&format!(
                ",\"access_time\":\"{}\"",
                timeutil::format_local_time(&self.access_time)
            ));
        }
        if self.expiry_time != timeutil::never() {
            json.push_str(&format!(
                ",\"expiry_time\":\"{}\"",
                timeutil::format_local_time(&self.expiry_time)
            ));
        }
        if self.move_time != timeutil::never() {
            json.push_str(&format!(
                ",\"move_time\":\"{}\"",
                timeutil::format_local_time(&self.move_time)
            ));
        }
        if self.flags != 0 {
            json.push_str(&format!(",\"flags\":{}", self.flags));
        }
        if !self.groups.is_empty() {
            json.push_str(",\"groups\":[");
            let mut sep = "";
            for group in self.groups.iter() {
                json.push_str(sep);
                json.push_str(&group.borrow().to_json());
                sep = ",";
            }
            json.push(']');
        }
        if self.has_non_meta_entries() {
            json.push_str(",\"entries\":[");
            let mut sep = "";
            for entry in self.entries.iter() {
                let entry = entry.borrow();
                if entry.is_meta_entry() {
                    continue;
                }
                json.push_str(sep);
                json.push_str(&entry.to_json());
                sep = ",";
            }
            json.push(']');
        }
        json.push('}');
        json
    }
}

impl Default for Group {
    fn default() -> Group {
        Group::new()
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Group) -> bool {
        if self.groups.len() != other.groups.len() || self.entries.len() != other.entries.len() {
            return false;
        }

        let same_groups = self
            .groups
            .iter()
            .zip(other.groups.iter())
            .all(|(a, b)| *a.borrow() == *b.borrow());
        let same_entries = self
            .entries
            .iter()
            .zip(other.entries.iter())
            .all(|(a, b)| *a.borrow() == *b.borrow());

        self.uuid == other.uuid
            && self.icon == other.icon
            && weak_refs_equal(&self.custom_icon, &other.custom_icon)
            && self.name == other.name
            && self.notes == other.notes
            && self.creation_time == other.creation_time
            && self.modification_time == other.modification_time
            && self.access_time == other.access_time
            && self.expiry_time == other.expiry_time
            && self.move_time == other.move_time
            && self.flags == other.flags
            && self.expires == other.expires
            && self.expanded == other.expanded
            && self.usage_count == other.usage_count
            && self.default_autotype_sequence == other.default_autotype_sequence
            && self.autotype == other.autotype
            && self.search == other.search
            && weak_refs_equal(&self.last_visible_entry, &other.last_visible_entry)
            && same_groups
            && same_entries
    }
}

impl Eq for Group {}

/// Memory protection configuration of the standard entry fields.
#[derive(Clone, PartialEq, Eq)]
pub struct MemoryProtection {
    pub title: bool,
    pub username: bool,
    pub password: bool,
    pub url: bool,
    pub notes: bool,
}

impl Default for MemoryProtection {
    fn default() -> MemoryProtection {
        MemoryProtection {
            title: false,
            username: false,
            password: true,
            url: false,
            notes: false,
        }
    }
}

/// A custom key/value item in the database metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct MetaField {
    pub key: String,
    pub value: String,
}

impl MetaField {
    pub fn new(key: String, value: String) -> MetaField {
        MetaField { key, value }
    }
}

/// KDBX database metadata.
#[derive(Clone)]
pub struct Metadata {
    pub generator: String,
    pub database_name: Timestamped<String>,
    pub database_desc: Timestamped<String>,
    pub default_username: Timestamped<String>,
    pub maintenance_hist_days: u32,
    pub database_color: String,
    pub master_key_changed: DateTime<Utc>,
    pub master_key_change_rec: i64,
    pub master_key_change_force: i64,
    pub memory_protection: MemoryProtection,
    pub recycle_bin: WeakGroupRef,
    pub recycle_bin_changed: DateTime<Utc>,
    pub entry_templates: WeakGroupRef,
    pub entry_templates_changed: DateTime<Utc>,
    pub history_max_items: i32,
    pub history_max_size: i64,
    pub last_selected_group: WeakGroupRef,
    pub last_visible_group: WeakGroupRef,
    pub binaries: Vec<BinaryRef>,
    pub icons: Vec<IconRef>,
    pub fields: Vec<MetaField>,
}

impl Metadata {
    pub fn new() -> Metadata {
        Metadata {
            generator: String::new(),
            database_name: Timestamped::default(),
            database_desc: Timestamped::default(),
            default_username: Timestamped::default(),
            maintenance_hist_days: 365,
            database_color: String::new(),
            master_key_changed: timeutil::never(),
            master_key_change_rec: -1,
            master_key_change_force: -1,
            memory_protection: MemoryProtection::default(),
            recycle_bin: Weak::new(),
            recycle_bin_changed: timeutil::never(),
            entry_templates: Weak::new(),
            entry_templates_changed: timeutil::never(),
            history_max_items: -1,
            history_max_size: -1,
            last_selected_group: Weak::new(),
            last_visible_group: Weak::new(),
            binaries: Vec::new(),
            icons: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn add_binary(&mut self, binary: BinaryRef) {
        self.binaries.push(binary);
    }

    pub fn add_icon(&mut self, icon: IconRef) {
        self.icons.push(icon);
    }

    pub fn add_field(&mut self, key: String, value: String) {
        self.fields.push(MetaField::new(key, value));
    }
}

impl Default for Metadata {
    fn default() -> Metadata {
        Metadata::new()
    }
}

/// A password database: the group tree plus the container parameters needed
/// to write it back out.
pub struct Database {
    pub root: GroupRef,
    pub cipher: Cipher,

    /// KDB uses a fixed 16 bytes; KDBX stores a variable length seed,
    /// typically 32 bytes.
    pub master_seed: Vec<u8>,
    pub init_vector: [u8; 16],
    pub transform_seed: [u8; 32],

    /// KDBX only.
    pub inner_random_stream_key: [u8; 32],
    pub transform_rounds: u64,

    /// KDBX only.
    pub compress: bool,

    /// KDBX only.
    pub meta: Option<Metadata>,
}

impl Database {
    pub fn new() -> Database {
        Database {
            root: Group::new().wrap(),
            cipher: Cipher::Aes,
            master_seed: Vec::new(),
            init_vector: [0u8; 16],
            transform_seed: [0u8; 32],
            inner_random_stream_key: [0u8; 32],
            transform_rounds: DEFAULT_TRANSFORM_ROUNDS,
            compress: false,
            meta: None,
        }
    }
}

impl Default for Database {
    fn default() -> Database {
        Database::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn uuid_generation_is_unique() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(Group::new().uuid));
            assert!(seen.insert(Entry::new().uuid));
        }
    }

    #[test]
    fn base64_round_trip() {
        let text = b"Lorem ipsum dolor sit amet, consectetur adipis";
        let encoded = base64::encode(&text[..]);
        assert_eq!(
            encoded,
            "TG9yZW0gaXBzdW0gZG9sb3Igc2l0IGFtZXQsIGNvbnNlY3RldHVyIGFkaXBpcw=="
        );
        assert_eq!(base64::decode(encoded.as_bytes()).unwrap(), text.to_vec());
    }

    #[test]
    fn uuid_base64_round_trip() {
        let uuid = Uuid::random();
        assert_eq!(Uuid::from_base64(&uuid.to_base64()).unwrap(), uuid);
        assert!(Uuid::from_base64("c2hvcnQ=").is_err());
    }

    #[test]
    fn uuid_display_groups_hex() {
        let uuid = Uuid::wrap([0xAB; 16]);
        assert_eq!(
            format!("{}", uuid),
            "ABABABAB-ABABABAB-ABABABAB-ABABABAB"
        );
    }

    fn sample_entry() -> Entry {
        let mut entry = Entry::new();
        entry.icon = 4;
        entry.title = ProtectedString::plain("Sample");
        entry.username = ProtectedString::plain("user");
        entry.password = ProtectedString::new("secret", true);
        entry
    }

    #[test]
    fn entry_equality_is_by_value() {
        let mut a = sample_entry();
        let mut b = sample_entry();
        b.uuid = a.uuid;
        assert_eq!(a, b);

        b.password = ProtectedString::new("secret", false);
        assert_ne!(a, b);

        b.password = ProtectedString::new("secret", true);
        a.attachments
            .push(Attachment::new("file".into(), None));
        assert_ne!(a, b);
    }

    #[test]
    fn meta_entry_detection() {
        let mut entry = Entry::new();
        entry.title = ProtectedString::plain("Meta-Info");
        entry.url = ProtectedString::plain("$");
        entry.username = ProtectedString::plain("SYSTEM");
        entry.notes = ProtectedString::plain("KPX_GROUP_TREE_STATE");
        assert!(!entry.is_meta_entry());

        entry.attachments.push(Attachment::new(
            "bin-stream".into(),
            Some(Rc::new(Binary::new(ProtectedBinary::copy_slice(b"\x00")))),
        ));
        assert!(entry.is_meta_entry());
    }

    #[test]
    fn meta_entries_are_suppressed_from_json() {
        let mut group = Group::new();
        group.name = "General".into();

        let mut meta = Entry::new();
        meta.title = ProtectedString::plain("Meta-Info");
        meta.url = ProtectedString::plain("$");
        meta.username = ProtectedString::plain("SYSTEM");
        meta.notes = ProtectedString::plain("state");
        meta.attachments.push(Attachment::new(
            "bin-stream".into(),
            Some(Rc::new(Binary::new(ProtectedBinary::copy_slice(b"x")))),
        ));
        group.add_entry(meta.wrap());

        assert!(!group.has_non_meta_entries());
        assert!(!group.to_json().contains("entries"));

        group.add_entry(sample_entry().wrap());
        assert!(group.has_non_meta_entries());

        let json = group.to_json();
        assert!(json.contains("\"entries\""));
        assert!(json.contains("Sample"));
        assert!(!json.contains("Meta-Info"));
    }

    #[test]
    fn group_json_shape() {
        let mut group = Group::new();
        group.name = "Internet".into();
        group.icon = 1;

        let mut child = Group::new();
        child.name = "Shopping".into();
        group.add_group(child.wrap());

        assert_eq!(
            group.to_json(),
            "{\"icon\":1,\"name\":\"Internet\",\"groups\":[{\"icon\":0,\"name\":\"Shopping\"}]}"
        );
    }

    #[test]
    fn weak_back_references_dangle_safely() {
        let mut entry = sample_entry();
        {
            let icon = Rc::new(Icon::new(Uuid::random(), vec![1, 2, 3]));
            entry.custom_icon = Rc::downgrade(&icon);
            assert!(entry.custom_icon.upgrade().is_some());
        }
        // The icon owner is gone; the reference is dead but harmless.
        assert!(entry.custom_icon.upgrade().is_none());
    }

    #[test]
    fn timestamped_set_updates_time() {
        let mut name: Timestamped<String> = Timestamped::default();
        assert_eq!(name.time(), timeutil::never());

        name.set("My Database".into());
        assert_eq!(name.value(), "My Database");
        assert!(name.time() > timeutil::never());
    }
}
