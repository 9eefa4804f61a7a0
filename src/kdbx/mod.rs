//! The KeePass 2.x container (critical version up to 3.1): an outer header
//! followed by an AES-CBC payload that carries a hashed-block stream, an
//! optional gzip layer and the XML document with its Salsa20 overlay.

pub mod read;
pub mod write;

pub use self::read::import;
pub use self::write::export;

pub(crate) const KDBX_SIGNATURE: (u32, u32) = (0x9AA2D903, 0xB54BFB67);

/// File version written by this module; the high 16 bits are critical.
pub(crate) const KDBX_FILE_VERSION_3_1: u32 = 0x0003_0001;
pub(crate) const KDBX_VERSION_CRITICAL_MASK: u32 = 0xFFFF_0000;

/// UUID of the AES-256 payload cipher, the only one KDBX 3.1 files use here.
pub(crate) const KDBX_CIPHER_AES: [u8; 16] = [
    0x31, 0xC1, 0xF2, 0xE6, 0xBF, 0x71, 0x43, 0x50, 0xBE, 0x58, 0x05, 0x21, 0x6A, 0xFC, 0x5A,
    0xFF,
];

// Outer header field ids. Each field is `{u8 id, u16 size, size bytes}`.
pub(crate) const HEADER_END: u8 = 0;
pub(crate) const HEADER_CIPHER_ID: u8 = 2;
pub(crate) const HEADER_COMPRESSION_FLAGS: u8 = 3;
pub(crate) const HEADER_MASTER_SEED: u8 = 4;
pub(crate) const HEADER_TRANSFORM_SEED: u8 = 5;
pub(crate) const HEADER_TRANSFORM_ROUNDS: u8 = 6;
pub(crate) const HEADER_ENCRYPTION_IV: u8 = 7;
pub(crate) const HEADER_INNER_RANDOM_STREAM_KEY: u8 = 8;
pub(crate) const HEADER_CONTENT_STREAM_START_BYTES: u8 = 9;
pub(crate) const HEADER_INNER_RANDOM_STREAM_ID: u8 = 10;

pub(crate) const COMPRESSION_NONE: u32 = 0;
pub(crate) const COMPRESSION_GZIP: u32 = 1;

pub(crate) const ELEM_DOC_NODE: &str = "KeePassFile";
pub(crate) const ELEM_META: &str = "Meta";
pub(crate) const ELEM_ROOT: &str = "Root";
pub(crate) const ELEM_GROUP: &str = "Group";
pub(crate) const ELEM_ENTRY: &str = "Entry";

pub(crate) const ELEM_GENERATOR: &str = "Generator";
pub(crate) const ELEM_HEADER_HASH: &str = "HeaderHash";
pub(crate) const ELEM_DB_NAME: &str = "DatabaseName";
pub(crate) const ELEM_DB_NAME_CHANGED: &str = "DatabaseNameChanged";
pub(crate) const ELEM_DB_DESC: &str = "DatabaseDescription";
pub(crate) const ELEM_DB_DESC_CHANGED: &str = "DatabaseDescriptionChanged";
pub(crate) const ELEM_DB_DEFAULT_USER: &str = "DefaultUserName";
pub(crate) const ELEM_DB_DEFAULT_USER_CHANGED: &str = "DefaultUserNameChanged";
pub(crate) const ELEM_DB_MNTNC_HISTORY_DAYS: &str = "MaintenanceHistoryDays";
pub(crate) const ELEM_DB_COLOR: &str = "Color";
pub(crate) const ELEM_DB_KEY_CHANGED: &str = "MasterKeyChanged";
pub(crate) const ELEM_DB_KEY_CHANGE_REC: &str = "MasterKeyChangeRec";
pub(crate) const ELEM_DB_KEY_CHANGE_FORCE: &str = "MasterKeyChangeForce";
pub(crate) const ELEM_RECYCLE_BIN_ENABLED: &str = "RecycleBinEnabled";
pub(crate) const ELEM_RECYCLE_BIN_UUID: &str = "RecycleBinUUID";
pub(crate) const ELEM_RECYCLE_BIN_CHANGED: &str = "RecycleBinChanged";
pub(crate) const ELEM_ENTRY_TEMPLATES_GROUP: &str = "EntryTemplatesGroup";
pub(crate) const ELEM_ENTRY_TEMPLATES_GROUP_CHANGED: &str = "EntryTemplatesGroupChanged";
pub(crate) const ELEM_HISTORY_MAX_ITEMS: &str = "HistoryMaxItems";
pub(crate) const ELEM_HISTORY_MAX_SIZE: &str = "HistoryMaxSize";
pub(crate) const ELEM_LAST_SELECTED_GROUP: &str = "LastSelectedGroup";
pub(crate) const ELEM_LAST_TOP_VISIBLE_GROUP: &str = "LastTopVisibleGroup";

pub(crate) const ELEM_MEMORY_PROT: &str = "MemoryProtection";
pub(crate) const ELEM_PROT_TITLE: &str = "ProtectTitle";
pub(crate) const ELEM_PROT_USER_NAME: &str = "ProtectUserName";
pub(crate) const ELEM_PROT_PASSWORD: &str = "ProtectPassword";
pub(crate) const ELEM_PROT_URL: &str = "ProtectURL";
pub(crate) const ELEM_PROT_NOTES: &str = "ProtectNotes";

pub(crate) const ELEM_CUSTOM_ICONS: &str = "CustomIcons";
pub(crate) const ELEM_CUSTOM_ICON_ITEM: &str = "Icon";
pub(crate) const ELEM_CUSTOM_ICON_ITEM_DATA: &str = "Data";

pub(crate) const ELEM_BINARIES: &str = "Binaries";
pub(crate) const ELEM_BINARY: &str = "Binary";
pub(crate) const ELEM_CUSTOM_DATA: &str = "CustomData";
pub(crate) const ELEM_CUSTOM_DATA_ITEM: &str = "Item";

pub(crate) const ELEM_NAME: &str = "Name";
pub(crate) const ELEM_NOTES: &str = "Notes";
pub(crate) const ELEM_UUID: &str = "UUID";
pub(crate) const ELEM_ICON: &str = "IconID";
pub(crate) const ELEM_CUSTOM_ICON_ID: &str = "CustomIconUUID";
pub(crate) const ELEM_FG_COLOR: &str = "ForegroundColor";
pub(crate) const ELEM_BG_COLOR: &str = "BackgroundColor";
pub(crate) const ELEM_OVERRIDE_URL: &str = "OverrideURL";
pub(crate) const ELEM_TAGS: &str = "Tags";

pub(crate) const ELEM_TIMES: &str = "Times";
pub(crate) const ELEM_CREATION_TIME: &str = "CreationTime";
pub(crate) const ELEM_LAST_MOD_TIME: &str = "LastModificationTime";
pub(crate) const ELEM_LAST_ACCESS_TIME: &str = "LastAccessTime";
pub(crate) const ELEM_EXPIRY_TIME: &str = "ExpiryTime";
pub(crate) const ELEM_LOCATION_CHANGED: &str = "LocationChanged";
pub(crate) const ELEM_EXPIRES: &str = "Expires";
pub(crate) const ELEM_USAGE_COUNT: &str = "UsageCount";

pub(crate) const ELEM_IS_EXPANDED: &str = "IsExpanded";
pub(crate) const ELEM_GROUP_DEFAULT_AUTO_TYPE_SEQ: &str = "DefaultAutoTypeSequence";
pub(crate) const ELEM_ENABLE_AUTO_TYPE: &str = "EnableAutoType";
pub(crate) const ELEM_ENABLE_SEARCHING: &str = "EnableSearching";
pub(crate) const ELEM_LAST_TOP_VISIBLE_ENTRY: &str = "LastTopVisibleEntry";

pub(crate) const ELEM_AUTO_TYPE: &str = "AutoType";
pub(crate) const ELEM_AUTO_TYPE_ENABLED: &str = "Enabled";
pub(crate) const ELEM_AUTO_TYPE_OBFUSCATION: &str = "DataTransferObfuscation";
pub(crate) const ELEM_AUTO_TYPE_DEFAULT_SEQ: &str = "DefaultSequence";
pub(crate) const ELEM_AUTO_TYPE_ITEM: &str = "Association";
pub(crate) const ELEM_WINDOW: &str = "Window";
pub(crate) const ELEM_KEYSTROKE_SEQUENCE: &str = "KeystrokeSequence";

pub(crate) const ELEM_HISTORY: &str = "History";

pub(crate) const ELEM_STRING: &str = "String";
pub(crate) const ELEM_KEY: &str = "Key";
pub(crate) const ELEM_VALUE: &str = "Value";

pub(crate) const ATTR_ID: &str = "ID";
pub(crate) const ATTR_REF: &str = "Ref";
pub(crate) const ATTR_PROTECTED: &str = "Protected";
pub(crate) const ATTR_PROTECTED_IN_MEMORY: &str = "ProtectedInMemory";
pub(crate) const ATTR_COMPRESSED: &str = "Compressed";

pub(crate) const VAL_TRUE: &str = "True";
pub(crate) const VAL_FALSE: &str = "False";

pub(crate) const TITLE_FIELD: &str = "Title";
pub(crate) const URL_FIELD: &str = "URL";
pub(crate) const USERNAME_FIELD: &str = "UserName";
pub(crate) const PASSWORD_FIELD: &str = "Password";
pub(crate) const NOTES_FIELD: &str = "Notes";
