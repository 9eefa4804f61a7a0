//! The legacy KeePass 1.x container: a fixed 124-byte header followed by a
//! CBC-encrypted stream of field-tagged group and entry records.

pub mod read;
pub mod write;

pub use self::read::import;
pub use self::write::export;

pub(crate) const KDB_SIGNATURE: (u32, u32) = (0x9AA2D903, 0xB54BFB65);

pub(crate) const KDB_FLAG_RIJNDAEL: u32 = 0x0000_0002;
pub(crate) const KDB_FLAG_TWOFISH: u32 = 0x0000_0008;

pub(crate) const KDB_FILE_VERSION: u32 = 0x0003_0000;
pub(crate) const KDB_VERSION_CRITICAL_MASK: u32 = 0xFFFF_0000;

// Group record field tags. A group ends at the end tag.
pub(crate) const GROUP_FIELD_EMPTY: u16 = 0x0000;
pub(crate) const GROUP_FIELD_ID: u16 = 0x0001;
pub(crate) const GROUP_FIELD_NAME: u16 = 0x0002;
pub(crate) const GROUP_FIELD_CREATION_TIME: u16 = 0x0003;
pub(crate) const GROUP_FIELD_MODIFICATION_TIME: u16 = 0x0004;
pub(crate) const GROUP_FIELD_ACCESS_TIME: u16 = 0x0005;
pub(crate) const GROUP_FIELD_EXPIRY_TIME: u16 = 0x0006;
pub(crate) const GROUP_FIELD_ICON: u16 = 0x0007;
pub(crate) const GROUP_FIELD_LEVEL: u16 = 0x0008;
pub(crate) const GROUP_FIELD_FLAGS: u16 = 0x0009;
pub(crate) const GROUP_FIELD_END: u16 = 0xFFFF;

// Entry record field tags.
pub(crate) const ENTRY_FIELD_EMPTY: u16 = 0x0000;
pub(crate) const ENTRY_FIELD_UUID: u16 = 0x0001;
pub(crate) const ENTRY_FIELD_GROUP_ID: u16 = 0x0002;
pub(crate) const ENTRY_FIELD_ICON: u16 = 0x0003;
pub(crate) const ENTRY_FIELD_TITLE: u16 = 0x0004;
pub(crate) const ENTRY_FIELD_URL: u16 = 0x0005;
pub(crate) const ENTRY_FIELD_USERNAME: u16 = 0x0006;
pub(crate) const ENTRY_FIELD_PASSWORD: u16 = 0x0007;
pub(crate) const ENTRY_FIELD_NOTES: u16 = 0x0008;
pub(crate) const ENTRY_FIELD_CREATION_TIME: u16 = 0x0009;
pub(crate) const ENTRY_FIELD_MODIFICATION_TIME: u16 = 0x000A;
pub(crate) const ENTRY_FIELD_ACCESS_TIME: u16 = 0x000B;
pub(crate) const ENTRY_FIELD_EXPIRY_TIME: u16 = 0x000C;
pub(crate) const ENTRY_FIELD_ATTACHMENT_NAME: u16 = 0x000D;
pub(crate) const ENTRY_FIELD_ATTACHMENT_DATA: u16 = 0x000E;
pub(crate) const ENTRY_FIELD_END: u16 = 0xFFFF;
