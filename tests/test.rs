use std::io::{Cursor, Seek, SeekFrom};

use uepak::{Compression, Error, PakFile, FOOTER_SIZE, MAGIC};

fn save_to_vec(pak: &mut PakFile) -> Vec<u8> {
    let mut writer = Cursor::new(vec![]);
    pak.save_to(&mut writer).unwrap();
    writer.into_inner()
}

fn mount(bytes: Vec<u8>) -> PakFile {
    PakFile::mount_reader(Cursor::new(bytes)).unwrap()
}

fn sha1(data: &[u8]) -> [u8; 20] {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

#[test]
fn test_create_save_mount() {
    let mut pak = PakFile::create("test.pak", "../../../TestGame/", None);
    pak.add_entry("Content/A.uasset", vec![0x01, 0x02, 0x03]).unwrap();
    let bytes = save_to_vec(&mut pak);

    let mut mounted = mount(bytes);
    let names: Vec<_> = mounted.entries().map(|n| n.value().to_owned()).collect();
    assert_eq!(names, vec!["TestGame/Content/A.uasset"]);
    assert_eq!(
        mounted.read_entry("TestGame/Content/A.uasset").unwrap(),
        Some(vec![0x01, 0x02, 0x03])
    );
}

#[test]
fn test_zlib_roundtrip() {
    let mut pak = PakFile::create("test.pak", "../../../TestGame/", Some(Compression::Zlib));
    let payload = vec![0x41u8; 100_000];
    pak.add_entry("Content/A.uasset", payload.clone()).unwrap();
    let bytes = save_to_vec(&mut pak);

    let mut mounted = mount(bytes);
    assert_eq!(
        mounted.read_entry("TestGame/Content/A.uasset").unwrap(),
        Some(payload)
    );
}

#[test]
fn test_mixed_entries_roundtrip_twice() {
    let mut pak = PakFile::create("pack.pak", "../../../Game/", Some(Compression::Zlib));
    let blobs: Vec<(&str, Vec<u8>)> = vec![
        ("root.bin", (0..=255).collect()),
        ("Content/big.bin", vec![0xEE; 200_000]),
        ("Content/Deep/Nested/tiny.txt", b"tiny".to_vec()),
        ("empty.bin", vec![]),
    ];
    for (path, data) in &blobs {
        pak.add_entry(path, data.clone()).unwrap();
    }

    let first = save_to_vec(&mut pak);
    let mut mounted = mount(first);
    let second = save_to_vec(&mut mounted);
    let mut mounted = mount(second);

    for (path, data) in &blobs {
        let stored = format!("Game/{path}");
        assert_eq!(
            mounted.read_entry(&stored).unwrap().as_ref(),
            Some(data),
            "{stored} did not survive the round trip"
        );
    }
}

#[test]
fn test_asset_triple() {
    let mut pak = PakFile::create("assets.pak", "../../../TestGame/", None);
    pak.add_entry("Content/M.uasset", b"main".to_vec()).unwrap();
    pak.add_entry("Content/M.uexp", b"export".to_vec()).unwrap();
    pak.add_entry("Content/M.ubulk", b"bulk".to_vec()).unwrap();
    let mut mounted = mount(save_to_vec(&mut pak));

    let asset = mounted
        .get_asset("TestGame/Content/M.uasset")
        .unwrap()
        .unwrap();
    assert_eq!(asset.main, b"main");
    assert_eq!(asset.export.as_deref(), Some(b"export".as_slice()));
    assert_eq!(asset.bulk.as_deref(), Some(b"bulk".as_slice()));
    assert!(asset.export_path.unwrap().ends_with(".uexp"));
    assert!(asset.bulk_path.unwrap().ends_with(".ubulk"));

    assert!(matches!(
        mounted.get_asset("TestGame/Content/M.uexp"),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_asset_uptnl_fallback() {
    let mut pak = PakFile::create("assets.pak", "../../../TestGame/", None);
    pak.add_entry("Content/M.uasset", b"main".to_vec()).unwrap();
    pak.add_entry("Content/M.uptnl", b"optional".to_vec()).unwrap();
    let mut mounted = mount(save_to_vec(&mut pak));

    let asset = mounted
        .get_asset("TestGame/Content/M.uasset")
        .unwrap()
        .unwrap();
    assert_eq!(asset.export, None);
    assert_eq!(asset.bulk.as_deref(), Some(b"optional".as_slice()));
    assert!(asset.bulk_path.unwrap().ends_with(".uptnl"));
}

#[test]
fn test_encrypted_index_rejected() {
    let mut pak = PakFile::create("enc.pak", "../../../TestGame/", None);
    let mut bytes = save_to_vec(&mut pak);
    let footer = bytes.len() - FOOTER_SIZE as usize;
    bytes[footer + 16] = 1; // encrypted flag
    assert!(matches!(
        PakFile::mount_reader(Cursor::new(bytes)),
        Err(Error::NotSupported(_))
    ));
}

#[test]
fn test_bad_magic_rejected() {
    let mut pak = PakFile::create("magic.pak", "../../../TestGame/", None);
    let mut bytes = save_to_vec(&mut pak);
    let footer = bytes.len() - FOOTER_SIZE as usize;
    bytes[footer + 17..footer + 21].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
    assert!(matches!(
        PakFile::mount_reader(Cursor::new(bytes)),
        Err(Error::Serializer(_))
    ));

    assert!(matches!(
        PakFile::mount_reader(Cursor::new(vec![0u8; 16])),
        Err(Error::Serializer(_))
    ));
}

#[test]
fn test_empty_archive() {
    let mut pak = PakFile::create("empty.pak", "../../../TestGame/", None);
    let bytes = save_to_vec(&mut pak);

    // the trailer occupies exactly the last 221 bytes
    let footer = bytes.len() - FOOTER_SIZE as usize;
    assert_eq!(read_u32(&bytes, footer + 17), MAGIC);
    assert_eq!(read_u32(&bytes, footer + 21), 11);

    let mounted = mount(bytes);
    assert_eq!(mounted.entries().count(), 0);
}

#[test]
fn test_index_hashes_cover_written_ranges() {
    let mut pak = PakFile::create("hashed.pak", "../../../TestGame/", Some(Compression::Zlib));
    pak.add_entry("Content/A.uasset", vec![1; 5000]).unwrap();
    pak.add_entry("Content/Sub/B.uasset", vec![2; 70_000]).unwrap();
    let bytes = save_to_vec(&mut pak);

    let footer = bytes.len() - FOOTER_SIZE as usize;
    let index_offset = read_u64(&bytes, footer + 25) as usize;
    let index_size = read_u64(&bytes, footer + 33) as usize;

    // trailer hash covers the whole primary index
    let primary = &bytes[index_offset..index_offset + index_size];
    assert_eq!(&bytes[footer + 41..footer + 61], &sha1(primary)[..]);

    // walk the primary header to the two 36-byte sub-index slots
    let mount_len = read_u32(primary, 0) as usize;
    let mut at = 4 + mount_len + 4 + 8; // mount fstring, entry count, seed
    assert_eq!(read_u32(primary, at), 1);
    at += 4;
    let phi_offset = read_u64(primary, at) as usize;
    let phi_size = read_u64(primary, at + 8) as usize;
    let phi_hash = &primary[at + 16..at + 36];
    at += 36;
    assert_eq!(read_u32(primary, at), 1);
    at += 4;
    let fdi_offset = read_u64(primary, at) as usize;
    let fdi_size = read_u64(primary, at + 8) as usize;
    let fdi_hash = &primary[at + 16..at + 36];

    assert_eq!(phi_offset, index_offset + index_size);
    assert_eq!(fdi_offset, phi_offset + phi_size);
    assert_eq!(phi_hash, &sha1(&bytes[phi_offset..phi_offset + phi_size])[..]);
    assert_eq!(fdi_hash, &sha1(&bytes[fdi_offset..fdi_offset + fdi_size])[..]);
}

#[test]
fn test_mount_point_resolution() {
    let mut pak = PakFile::create("mp.pak", "../../../TestGame/", None);
    pak.add_entry("Content/A.uasset", vec![9]).unwrap();

    for query in [
        "Content/A.uasset",
        "TestGame/Content/A.uasset",
        "../../../TestGame/Content/A.uasset",
    ] {
        assert!(pak.has_entry(query), "{query} did not resolve");
        assert_eq!(pak.read_entry(query).unwrap(), Some(vec![9]));
    }
    assert!(!pak.has_entry("Other/A.uasset"));
}

#[test]
fn test_add_entry_strips_prefixes() {
    let mut pak = PakFile::create("strip.pak", "../../../TestGame/", None);
    pak.add_entry("../../../TestGame/Content/A.uasset", vec![1]).unwrap();
    let names: Vec<_> = pak.entries().map(|n| n.value().to_owned()).collect();
    assert_eq!(names, vec!["Content/A.uasset"]);

    // the same logical path in any spelling is a duplicate
    assert!(matches!(
        pak.add_entry("TestGame/Content/A.uasset", vec![2]),
        Err(Error::InvalidOperation(_))
    ));
}

#[test]
fn test_insertion_order_and_removal() {
    let mut pak = PakFile::create("order.pak", "../../../Game/", None);
    pak.add_entry("a.bin", vec![1]).unwrap();
    pak.add_entry("b.bin", vec![2]).unwrap();
    pak.add_entry("c.bin", vec![3]).unwrap();

    assert!(pak.remove_entry("b.bin"));
    assert!(!pak.remove_entry("b.bin"));
    pak.add_entry("b.bin", vec![4]).unwrap();

    let names: Vec<_> = pak.entries().map(|n| n.value().to_owned()).collect();
    assert_eq!(names, vec!["a.bin", "c.bin", "b.bin"]);

    // the order survives a save/mount round trip
    let mounted = mount(save_to_vec(&mut pak));
    let names: Vec<_> = mounted.entries().map(|n| n.value().to_owned()).collect();
    assert_eq!(names, vec!["Game/a.bin", "Game/c.bin", "Game/b.bin"]);
}

#[test]
fn test_write_entry_overwrites() {
    let mut pak = PakFile::create("w.pak", "../../../Game/", Some(Compression::Zlib));
    pak.add_entry("a.bin", vec![1; 10]).unwrap();
    pak.write_entry("a.bin", vec![2; 90_000]).unwrap();
    assert!(matches!(
        pak.write_entry("missing.bin", vec![]),
        Err(Error::InvalidOperation(_))
    ));

    let mut mounted = mount(save_to_vec(&mut pak));
    assert_eq!(mounted.read_entry("Game/a.bin").unwrap(), Some(vec![2; 90_000]));
}

#[test]
fn test_save_after_mount_same_buffer() {
    // lazily mounted entries are pulled from the source before writing
    let mut pak = PakFile::create("lazy.pak", "../../../Game/", Some(Compression::Gzip));
    pak.add_entry("one.bin", vec![7; 66_000]).unwrap();
    pak.add_entry("two.bin", b"second".to_vec()).unwrap();
    let bytes = save_to_vec(&mut pak);

    let mut mounted = mount(bytes);
    mounted.write_entry("Game/two.bin", b"patched".to_vec()).unwrap();
    let rewritten = save_to_vec(&mut mounted);

    let mut reread = mount(rewritten);
    assert_eq!(reread.read_entry("Game/one.bin").unwrap(), Some(vec![7; 66_000]));
    assert_eq!(
        reread.read_entry("Game/two.bin").unwrap(),
        Some(b"patched".to_vec())
    );
}

#[test]
fn test_utf16_paths() {
    let mut pak = PakFile::create("wide.pak", "../../../Game/", None);
    pak.add_entry("Data/ファイル.bin", vec![5, 6]).unwrap();
    let mut mounted = mount(save_to_vec(&mut pak));
    assert_eq!(
        mounted.read_entry("Game/Data/ファイル.bin").unwrap(),
        Some(vec![5, 6])
    );
}

#[test]
fn test_rooted_mount_point() {
    let mut pak = PakFile::create("rooted.pak", "/Engine/", None);
    pak.add_entry("Config/Base.ini", b"[Core]".to_vec()).unwrap();
    let mut mounted = mount(save_to_vec(&mut pak));
    // a rooted mount point contributes no relative prefix
    assert_eq!(
        mounted.entries().map(|n| n.value().to_owned()).collect::<Vec<_>>(),
        vec!["Config/Base.ini"]
    );
    assert_eq!(
        mounted.read_entry("/Engine/Config/Base.ini").unwrap(),
        Some(b"[Core]".to_vec())
    );
}

#[test]
fn test_trailer_at_fixed_offset_regardless_of_payload() {
    let mut pak = PakFile::create("fixed.pak", "../../../Game/", None);
    pak.add_entry("a.bin", vec![0xAA; 1234]).unwrap();
    let bytes = save_to_vec(&mut pak);
    let mut cursor = Cursor::new(&bytes);
    cursor
        .seek(SeekFrom::End(-(FOOTER_SIZE as i64)))
        .unwrap();
    let position = cursor.position() as usize;
    assert_eq!(read_u32(&bytes, position + 17), MAGIC);
}
