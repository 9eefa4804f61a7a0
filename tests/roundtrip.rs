//! End-to-end import/export round trips for both container formats, driven
//! through temporary files the way the library is used in practice.

use std::rc::Rc;

use kpdb::database::{
    Attachment, Binary, Cipher, Database, Entry, Group, Icon, Metadata, Timestamped, Uuid,
};
use kpdb::security::{ProtectedBinary, ProtectedString};
use kpdb::{DatabaseFormat, Error, Key};

fn utc(text: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%SZ")
        .unwrap()
        .and_utc()
}

fn fill_seeds(db: &mut Database) {
    db.master_seed = b"0123456789abcdef".to_vec();
    db.init_vector = *b"fedcba9876543210";
    db.transform_seed = *b"seed.seed.seed.seed.seed.seed..!";
    db.inner_random_stream_key = *b"inner.random.stream.key.32.byte!";
    // Keep the proof-of-work cheap in tests.
    db.transform_rounds = 64;
}

fn sample_entry(title: &str, password: &str) -> Entry {
    let mut entry = Entry::new();
    entry.icon = 1;
    entry.title = ProtectedString::plain(title);
    entry.url = ProtectedString::plain("https://example.org");
    entry.username = ProtectedString::plain("joe");
    entry.password = ProtectedString::new(password, true);
    entry.notes = ProtectedString::plain("some notes");
    entry.creation_time = utc("2014-06-01T10:00:00Z");
    entry.modification_time = utc("2014-06-02T11:30:00Z");
    entry.access_time = utc("2014-06-03T12:45:30Z");
    entry
}

fn sample_kdb_database(cipher: Cipher) -> Database {
    let mut db = Database::new();
    db.cipher = cipher;
    fill_seeds(&mut db);

    let mut general = Group::new();
    general.name = "General".into();
    general.icon = 48;
    general.creation_time = utc("2014-01-01T08:00:00Z");

    let mut internet = Group::new();
    internet.name = "Internet".into();
    internet.icon = 1;
    internet.flags = 2;

    let mut mail = sample_entry("Mail", "hunter2");
    // KDB stores protected strings as plain text fields.
    mail.password = ProtectedString::plain("hunter2");
    mail.add_attachment(Attachment::new(
        "config.bin".into(),
        Some(Rc::new(Binary::new(ProtectedBinary::copy_slice(
            b"attachment payload",
        )))),
    ));
    internet.add_entry(mail.wrap());

    let mut bank = sample_entry("Bank", "s3cret");
    bank.password = ProtectedString::plain("s3cret");
    internet.add_entry(bank.wrap());

    general.add_group(internet.wrap());
    db.root.borrow_mut().add_group(general.wrap());

    let mut homework = Group::new();
    homework.name = "Homework".into();
    db.root.borrow_mut().add_group(homework.wrap());

    db
}

fn sample_kdbx_database(compress: bool) -> Database {
    let mut db = Database::new();
    db.cipher = Cipher::Aes;
    db.compress = compress;
    fill_seeds(&mut db);
    db.master_seed = b"master.seed.of.32.bytes.exactly!".to_vec();

    let mut meta = Metadata::new();
    meta.generator = "kpdb".into();
    meta.database_name = Timestamped::new("Test Database".into(), utc("2014-05-01T09:00:00Z"));
    meta.database_desc = Timestamped::new("round trip fixture".into(), utc("2014-05-01T09:00:00Z"));
    meta.default_username = Timestamped::new("joe".into(), utc("2014-05-01T09:00:00Z"));
    meta.database_color = "#FF0000".into();
    meta.master_key_changed = utc("2014-05-02T09:00:00Z");
    meta.add_field("plugin/setting".into(), "enabled".into());

    let icon = Rc::new(Icon::new(Uuid::random(), vec![0x89, 0x50, 0x4E, 0x47]));
    meta.add_icon(icon.clone());

    let shared = Rc::new(Binary::new(ProtectedBinary::copy_slice(b"shared blob")));
    meta.add_binary(shared.clone());

    let sealed = Rc::new(Binary::new(ProtectedBinary::new(
        b"sealed bytes".to_vec(),
        true,
    )));
    meta.add_binary(sealed.clone());

    let mut squeezed = Binary::new(ProtectedBinary::copy_slice(b"squeeze me, many times over"));
    squeezed.compress = true;
    let squeezed = Rc::new(squeezed);
    meta.add_binary(squeezed.clone());

    let mut accounts = Group::new();
    accounts.name = "Accounts".into();
    accounts.icon = 48;
    accounts.expanded = true;
    accounts.search = true;
    accounts.creation_time = utc("2014-01-01T08:00:00Z");
    accounts.custom_icon = Rc::downgrade(&icon);

    let mut mail = sample_entry("Mail", "hunter2");
    mail.tags = "personal;mail".into();
    mail.fg_color = "#000000".into();
    mail.auto_type.enabled = true;
    mail.auto_type.default_sequence = "{USERNAME}{TAB}{PASSWORD}{ENTER}".into();
    mail.auto_type
        .add_association("Login*".into(), "{PASSWORD}{ENTER}".into());
    mail.add_custom_field(
        "PIN".into(),
        ProtectedString::new("1234", true),
    );
    mail.add_custom_field("Branch".into(), ProtectedString::plain("north"));
    mail.add_attachment(Attachment::new("shared.txt".into(), Some(shared.clone())));
    mail.add_attachment(Attachment::new(
        "inline.txt".into(),
        Some(Rc::new(Binary::new(ProtectedBinary::copy_slice(
            b"inline attachment",
        )))),
    ));

    let mut old_mail = sample_entry("Mail (old)", "hunter1");
    old_mail.modification_time = utc("2014-03-01T10:00:00Z");
    mail.add_history_entry(old_mail.wrap());

    let mail = mail.wrap();
    accounts.last_visible_entry = Rc::downgrade(&mail);
    accounts.add_entry(mail);

    let mut second = sample_entry("Backup", "backup-pass");
    second.add_attachment(Attachment::new("shared-too.txt".into(), Some(shared)));
    accounts.add_entry(second.wrap());

    let accounts = accounts.wrap();

    let mut bin = Group::new();
    bin.name = "Recycle Bin".into();
    let bin = bin.wrap();

    let mut templates = Group::new();
    templates.name = "Templates".into();
    let templates = templates.wrap();

    meta.recycle_bin = Rc::downgrade(&bin);
    meta.recycle_bin_changed = utc("2014-05-03T09:00:00Z");
    meta.entry_templates = Rc::downgrade(&templates);
    meta.entry_templates_changed = utc("2014-05-03T09:30:00Z");
    meta.last_selected_group = Rc::downgrade(&accounts);
    meta.last_visible_group = Rc::downgrade(&accounts);

    {
        let mut root = db.root.borrow_mut();
        root.name = "Root".into();
        root.add_group(accounts);
        root.add_group(bin);
        root.add_group(templates);
    }

    db.meta = Some(meta);
    db
}

#[test]
fn kdb_round_trip_aes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aes.kdb");

    let db = sample_kdb_database(Cipher::Aes);
    let key = Key::with_password("password");

    kpdb::kdb::export(&path, &db, &key).unwrap();
    let imported = kpdb::kdb::import(&path, &key).unwrap();

    assert_eq!(imported.cipher, Cipher::Aes);
    assert_eq!(
        imported.root.borrow().to_json(),
        db.root.borrow().to_json()
    );

    // A second round trip is stable.
    let path2 = dir.path().join("aes2.kdb");
    kpdb::kdb::export(&path2, &imported, &key).unwrap();
    let imported2 = kpdb::kdb::import(&path2, &key).unwrap();
    assert_eq!(
        imported2.root.borrow().to_json(),
        db.root.borrow().to_json()
    );
}

#[test]
fn kdb_round_trip_twofish() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("twofish.kdb");

    let db = sample_kdb_database(Cipher::Twofish);
    let key = Key::with_password("password");

    kpdb::kdb::export(&path, &db, &key).unwrap();
    let imported = kpdb::kdb::import(&path, &key).unwrap();

    assert_eq!(imported.cipher, Cipher::Twofish);
    assert_eq!(
        imported.root.borrow().to_json(),
        db.root.borrow().to_json()
    );
}

#[test]
fn kdb_wrong_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.kdb");

    let db = sample_kdb_database(Cipher::Aes);
    kpdb::kdb::export(&path, &db, &Key::with_password("password")).unwrap();

    let result = kpdb::kdb::import(&path, &Key::with_password("wrong_password"));
    assert!(matches!(result, Err(Error::BadPassword)));
}

#[test]
fn kdb_with_key_file_credential() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.kdb");
    let key_path = dir.path().join("db.key");
    std::fs::write(&key_path, "ab".repeat(32)).unwrap();

    let mut key = Key::with_password("password");
    key.set_key_file(&key_path).unwrap();

    let db = sample_kdb_database(Cipher::Aes);
    kpdb::kdb::export(&path, &db, &key).unwrap();

    let imported = kpdb::kdb::import(&path, &key).unwrap();
    assert_eq!(
        imported.root.borrow().to_json(),
        db.root.borrow().to_json()
    );

    // The password alone no longer opens the file.
    let result = kpdb::kdb::import(&path, &Key::with_password("password"));
    assert!(matches!(result, Err(Error::BadPassword)));
}

#[test]
fn kdb_garbage_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.kdb");
    std::fs::write(&path, b"this is not a database").unwrap();

    let result = kpdb::kdb::import(&path, &Key::with_password("password"));
    assert!(matches!(result, Err(Error::Format(_))));
}

#[test]
fn kdbx_round_trip_stored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stored.kdbx");

    let db = sample_kdbx_database(false);
    let key = Key::with_password("password");

    kpdb::kdbx::export(&path, &db, &key).unwrap();
    let imported = kpdb::kdbx::import(&path, &key).unwrap();

    assert!(!imported.compress);
    assert_eq!(
        imported.root.borrow().to_json(),
        db.root.borrow().to_json()
    );

    let meta = imported.meta.as_ref().unwrap();
    let original_meta = db.meta.as_ref().unwrap();

    assert_eq!(meta.generator, "kpdb");
    assert_eq!(meta.database_name.value(), "Test Database");
    assert_eq!(meta.database_name.time(), original_meta.database_name.time());
    assert_eq!(meta.maintenance_hist_days, 365);
    assert_eq!(meta.history_max_items, -1);
    assert!(meta.memory_protection.password);
    assert!(!meta.memory_protection.title);
    assert_eq!(meta.fields.len(), 1);
    assert_eq!(meta.fields[0].key, "plugin/setting");
    assert_eq!(meta.binaries.len(), 3);
    assert_eq!(meta.icons.len(), 1);

    // Back-references resolve against the parsed tree.
    let recycle_bin = meta.recycle_bin.upgrade().unwrap();
    assert_eq!(recycle_bin.borrow().name, "Recycle Bin");
    let templates = meta.entry_templates.upgrade().unwrap();
    assert_eq!(templates.borrow().name, "Templates");
    let selected = meta.last_selected_group.upgrade().unwrap();
    assert_eq!(selected.borrow().name, "Accounts");
}

#[test]
fn kdbx_round_trip_gzip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gzip.kdbx");

    let db = sample_kdbx_database(true);
    let key = Key::with_password("password");

    kpdb::kdbx::export(&path, &db, &key).unwrap();
    let imported = kpdb::kdbx::import(&path, &key).unwrap();

    assert!(imported.compress);
    assert_eq!(
        imported.root.borrow().to_json(),
        db.root.borrow().to_json()
    );

    // Protected values keep both bytes and flag through the Salsa20 overlay.
    let root = imported.root.borrow();
    let accounts = root.groups[0].borrow();
    let mail = accounts.entries[0].borrow();
    assert_eq!(mail.password.value(), "hunter2");
    assert!(mail.password.is_protected());
    assert_eq!(mail.custom_fields[0].key, "PIN");
    assert_eq!(mail.custom_fields[0].value.value(), "1234");
    assert!(mail.custom_fields[0].value.is_protected());
    assert!(!mail.custom_fields[1].value.is_protected());

    // History entries survive recursively.
    assert_eq!(mail.history.len(), 1);
    assert_eq!(mail.history[0].borrow().title.value(), "Mail (old)");

    // The pooled binary is shared between entries after a round trip.
    let backup = accounts.entries[1].borrow();
    let shared_a = mail.attachments[0].binary.as_ref().unwrap();
    let shared_b = backup.attachments[0].binary.as_ref().unwrap();
    assert!(Rc::ptr_eq(shared_a, shared_b));
    assert_eq!(&shared_a.data[..], b"shared blob");

    // The custom icon reference survives.
    assert!(accounts.custom_icon.upgrade().is_some());

    // The group's last visible entry points at the parsed mail entry.
    let last_visible = accounts.last_visible_entry.upgrade().unwrap();
    assert!(Rc::ptr_eq(&last_visible, &accounts.entries[0]));
}

#[test]
fn kdbx_round_trip_twice_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let path1 = dir.path().join("one.kdbx");
    let path2 = dir.path().join("two.kdbx");

    let db = sample_kdbx_database(true);
    let key = Key::with_password("password");

    kpdb::kdbx::export(&path1, &db, &key).unwrap();
    let first = kpdb::kdbx::import(&path1, &key).unwrap();

    kpdb::kdbx::export(&path2, &first, &key).unwrap();
    let second = kpdb::kdbx::import(&path2, &key).unwrap();

    assert_eq!(
        second.root.borrow().to_json(),
        db.root.borrow().to_json()
    );
}

#[test]
fn kdbx_wrong_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.kdbx");

    let db = sample_kdbx_database(false);
    kpdb::kdbx::export(&path, &db, &Key::with_password("password")).unwrap();

    let result = kpdb::kdbx::import(&path, &Key::with_password("wrong_password"));
    assert!(matches!(result, Err(Error::BadPassword)));
}

#[test]
fn kdbx_key_file_only_credential() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.kdbx");
    let key_path = dir.path().join("db.key");
    std::fs::write(
        &key_path,
        format!(
            "<KeyFile><Key><Data>{}</Data></Key></KeyFile>",
            base64::encode([0x42u8; 32])
        ),
    )
    .unwrap();

    let mut key = Key::new();
    key.set_key_file(&key_path).unwrap();

    let db = sample_kdbx_database(true);
    kpdb::kdbx::export(&path, &db, &key).unwrap();

    let imported = kpdb::kdbx::import(&path, &key).unwrap();
    assert_eq!(
        imported.root.borrow().to_json(),
        db.root.borrow().to_json()
    );
}

#[test]
fn kdbx_tampered_ciphertext_is_a_bad_password() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db.kdbx");

    let db = sample_kdbx_database(false);
    let key = Key::with_password("password");
    kpdb::kdbx::export(&path, &db, &key).unwrap();

    // Flip a bit inside the first ciphertext block; the decrypted start
    // bytes no longer match the header.
    let mut bytes = std::fs::read(&path).unwrap();
    let header_end = outer_header_len(&bytes);
    bytes[header_end] ^= 0x01;
    std::fs::write(&path, &bytes).unwrap();

    let result = kpdb::kdbx::import(&path, &key);
    assert!(matches!(result, Err(Error::BadPassword)));
}

/// Walks the outer header fields to find where the ciphertext starts.
fn outer_header_len(bytes: &[u8]) -> usize {
    let mut pos = 12;
    loop {
        let id = bytes[pos];
        let size = u16::from_le_bytes([bytes[pos + 1], bytes[pos + 2]]) as usize;
        pos += 3 + size;
        if id == 0 {
            return pos;
        }
    }
}

#[test]
fn top_level_import_dispatches_by_signature() {
    let dir = tempfile::tempdir().unwrap();
    let kdb_path = dir.path().join("db.kdb");
    let kdbx_path = dir.path().join("db.kdbx");

    let key = Key::with_password("password");

    let kdb = sample_kdb_database(Cipher::Aes);
    kpdb::export(&kdb_path, &kdb, &key, DatabaseFormat::Kdb).unwrap();
    let kdbx = sample_kdbx_database(true);
    kpdb::export(&kdbx_path, &kdbx, &key, DatabaseFormat::Kdbx).unwrap();

    let imported_kdb = kpdb::import(&kdb_path, &key).unwrap();
    assert!(imported_kdb.meta.is_none());
    assert_eq!(
        imported_kdb.root.borrow().to_json(),
        kdb.root.borrow().to_json()
    );

    let imported_kdbx = kpdb::import(&kdbx_path, &key).unwrap();
    assert!(imported_kdbx.meta.is_some());
    assert_eq!(
        imported_kdbx.root.borrow().to_json(),
        kdbx.root.borrow().to_json()
    );
}

#[test]
fn kdb_meta_entries_stay_hidden_but_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.kdb");

    let db = sample_kdb_database(Cipher::Aes);
    {
        let root = db.root.borrow();
        let mut homework = root.groups[1].borrow_mut();

        let mut meta_entry = Entry::new();
        meta_entry.title = ProtectedString::plain("Meta-Info");
        meta_entry.url = ProtectedString::plain("$");
        meta_entry.username = ProtectedString::plain("SYSTEM");
        meta_entry.notes = ProtectedString::plain("KPX_GROUP_TREE_STATE");
        meta_entry.add_attachment(Attachment::new(
            "bin-stream".into(),
            Some(Rc::new(Binary::new(ProtectedBinary::copy_slice(b"\x00\x01")))),
        ));
        homework.add_entry(meta_entry.wrap());
    }

    let key = Key::with_password("password");
    kpdb::kdb::export(&path, &db, &key).unwrap();
    let imported = kpdb::kdb::import(&path, &key).unwrap();

    let root = imported.root.borrow();
    let homework = root.groups[1].borrow();
    assert_eq!(homework.entries.len(), 1);
    assert!(!homework.has_non_meta_entries());
    assert!(!homework.to_json().contains("Meta-Info"));
}
