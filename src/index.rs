//! The metadata trailer's index: a primary header addressing an
//! encoded-entries blob, plus the path-hash and full-directory sub-indices.
//! The full-directory index is authoritative on read; the path-hash body is
//! written for the engine but never consulted here.

use std::io::{self, Read, Seek, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use tracing::{debug, trace};

use crate::entry::Entry;
use crate::ext::{ReadExt, WriteExt};
use crate::footer::Footer;
use crate::hash::{sha1, Hash};
use crate::name::Name;
use crate::ordered_map::OrderedMap;
use crate::pak::relative_mount_point;
use crate::{Compression, Error, Result};

/// Blob offset marking a deleted entry in the full-directory index.
const DELETED_ENTRY: i32 = i32::MIN;

/// One of the two 36-byte sub-index headers embedded in the primary index.
struct SubIndex {
    offset: i64,
    size: i64,
    hash: Hash,
}

impl SubIndex {
    fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(SubIndex {
            offset: reader.read_i64::<LE>()?,
            size: reader.read_i64::<LE>()?,
            hash: Hash(reader.read_hash()?),
        })
    }

    fn patch(&self, slot: &mut [u8]) {
        slot[0..8].copy_from_slice(&self.offset.to_le_bytes());
        slot[8..16].copy_from_slice(&self.size.to_le_bytes());
        slot[16..36].copy_from_slice(&self.hash.0);
    }
}

pub(crate) struct PrimaryIndex {
    pub mount_point: Name,
    pub path_hash_seed: u64,
    pub entries: OrderedMap<Name, Entry>,
}

pub(crate) fn read<R: Read + Seek>(
    reader: &mut R,
    footer: &Footer,
    methods: &[Compression],
) -> Result<PrimaryIndex> {
    reader.seek(io::SeekFrom::Start(footer.index_offset as u64))?;
    let primary = reader.read_len(footer.index_size as usize)?;
    let mut primary = io::Cursor::new(primary);

    let (mount_value, mount_encoding) = primary.read_string()?;
    let entry_count = primary.read_i32::<LE>()?;
    if entry_count < 0 {
        return Err(Error::Serializer(format!(
            "negative entry count {entry_count}"
        )));
    }
    let path_hash_seed = primary.read_u64::<LE>()?;

    if primary.read_i32::<LE>()? != 1 {
        return Err(Error::NotSupported(
            "pak has no path-hash index".to_string(),
        ));
    }
    let path_hash = SubIndex::read(&mut primary)?;
    if primary.read_i32::<LE>()? != 1 {
        return Err(Error::NotSupported(
            "pak has no full-directory index".to_string(),
        ));
    }
    let full_directory = SubIndex::read(&mut primary)?;

    // both sub-indices trail the primary index back to back
    if path_hash.offset != footer.index_offset + footer.index_size {
        return Err(Error::Serializer(format!(
            "unexpected path-hash index offset {}",
            path_hash.offset
        )));
    }
    if full_directory.offset != path_hash.offset + path_hash.size {
        return Err(Error::Serializer(format!(
            "unexpected full-directory index offset {}",
            full_directory.offset
        )));
    }

    let blob_len = primary.read_i32::<LE>()?;
    if blob_len < 0 {
        return Err(Error::Serializer(format!(
            "negative encoded entry size {blob_len}"
        )));
    }
    let encoded = primary.read_len(blob_len as usize)?;
    if primary.read_i32::<LE>()? != 0 {
        return Err(Error::NotSupported(
            "pak carries unencoded entry records".to_string(),
        ));
    }

    reader.seek(io::SeekFrom::Start(full_directory.offset as u64))?;
    let mut directories = io::Cursor::new(reader.read_len(full_directory.size as usize)?);

    let mount_point = Name::with_encoding(mount_value, mount_encoding, path_hash_seed);
    let relative = relative_mount_point(mount_point.value()).to_owned();

    let mut entries = OrderedMap::new();
    let mut blob = io::Cursor::new(encoded);
    let directory_count = directories.read_i32::<LE>()?;
    for _ in 0..directory_count {
        let (directory, _) = directories.read_string()?;
        let file_count = directories.read_i32::<LE>()?;
        for _ in 0..file_count {
            let (filename, _) = directories.read_string()?;
            let record_offset = directories.read_i32::<LE>()?;
            if record_offset == DELETED_ENTRY {
                trace!(directory = %directory, filename = %filename, "skipping deleted entry");
                continue;
            }
            if record_offset < 0 || record_offset as u64 >= blob.get_ref().len() as u64 {
                return Err(Error::Serializer(format!(
                    "entry record offset {record_offset} is outside the encoded blob"
                )));
            }
            blob.set_position(record_offset as u64);
            let entry = Entry::read_encoded(&mut blob, methods)?;
            let path = format!(
                "{relative}{}{filename}",
                directory.strip_prefix('/').unwrap_or(&directory)
            );
            entries.insert(Name::new(path, path_hash_seed), entry);
        }
    }

    if entries.len() != entry_count as usize {
        debug!(
            declared = entry_count,
            walked = entries.len(),
            "entry count differs from full-directory walk"
        );
    }

    Ok(PrimaryIndex {
        mount_point,
        path_hash_seed,
        entries,
    })
}

/// Serializes the primary index and both sub-indices at the writer's current
/// position. Returns `(index_offset, index_size, index_hash)` for the
/// trailer.
pub(crate) fn write<W: Write + Seek>(
    writer: &mut W,
    mount_point: &Name,
    path_hash_seed: u64,
    entries: &OrderedMap<Name, Entry>,
    methods: &[Compression],
) -> Result<(i64, i64, Hash)> {
    let index_offset = writer.stream_position()? as i64;

    // encoded-entries blob, insertion order
    let mut encoded = Vec::new();
    let mut record_offsets = Vec::with_capacity(entries.len());
    for (_, entry) in entries.iter() {
        record_offsets.push(encoded.len() as u32);
        entry.write_encoded(&mut encoded, method_index(methods, entry.compression)?)?;
    }

    // path-hash sub-index: (hash, insertion position) pairs and no
    // directory section of its own
    let mut path_hash_buf = Vec::new();
    path_hash_buf.write_i32::<LE>(entries.len() as i32)?;
    for (position, (name, _)) in entries.iter().enumerate() {
        path_hash_buf.write_u64::<LE>(name.path_hash())?;
        path_hash_buf.write_i32::<LE>(position as i32)?;
    }
    path_hash_buf.write_i32::<LE>(0)?;

    // full-directory sub-index, root first, ancestors before descendants
    let mut directories: OrderedMap<Name, Vec<(Name, u32)>> = OrderedMap::new();
    directories.insert(Name::new("/", path_hash_seed), Vec::new());
    for ((name, _), record_offset) in entries.iter().zip(&record_offsets) {
        let (directory, filename) = split_path_child(name.value()).ok_or_else(|| {
            Error::Serializer(format!("entry path {:?} has no filename", name.value()))
        })?;
        let mut missing = Vec::new();
        let mut walk = directory;
        while !directories.contains_key(walk) {
            missing.push(walk);
            match split_path_child(walk) {
                Some((parent, _)) => walk = parent,
                None => break,
            }
        }
        for ancestor in missing.into_iter().rev() {
            directories.insert(Name::new(ancestor, path_hash_seed), Vec::new());
        }
        if let Some(files) = directories.get_mut(directory) {
            files.push((Name::new(filename, path_hash_seed), *record_offset));
        }
    }

    let mut full_directory_buf = Vec::new();
    full_directory_buf.write_i32::<LE>(directories.len() as i32)?;
    for (directory, files) in directories.iter() {
        full_directory_buf.write_string(directory.value(), directory.encoding())?;
        full_directory_buf.write_i32::<LE>(files.len() as i32)?;
        for (filename, record_offset) in files {
            full_directory_buf.write_string(filename.value(), filename.encoding())?;
            full_directory_buf.write_i32::<LE>(*record_offset as i32)?;
        }
    }

    // primary index with placeholder sub-headers, patched once the
    // sub-index extents are known
    let mut primary = Vec::new();
    primary.write_string(mount_point.value(), mount_point.encoding())?;
    primary.write_i32::<LE>(entries.len() as i32)?;
    primary.write_u64::<LE>(path_hash_seed)?;
    primary.write_i32::<LE>(1)?;
    let path_hash_slot = primary.len();
    primary.extend_from_slice(&[0; 36]);
    primary.write_i32::<LE>(1)?;
    let full_directory_slot = primary.len();
    primary.extend_from_slice(&[0; 36]);
    primary.write_i32::<LE>(encoded.len() as i32)?;
    primary.write_all(&encoded)?;
    primary.write_i32::<LE>(0)?;

    let index_size = primary.len() as i64;
    let path_hash = SubIndex {
        offset: index_offset + index_size,
        size: path_hash_buf.len() as i64,
        hash: sha1(&path_hash_buf),
    };
    let full_directory = SubIndex {
        offset: path_hash.offset + path_hash.size,
        size: full_directory_buf.len() as i64,
        hash: sha1(&full_directory_buf),
    };
    path_hash.patch(&mut primary[path_hash_slot..path_hash_slot + 36]);
    full_directory.patch(&mut primary[full_directory_slot..full_directory_slot + 36]);

    let hash = sha1(&primary);
    writer.write_all(&primary)?;
    writer.write_all(&path_hash_buf)?;
    writer.write_all(&full_directory_buf)?;
    debug!(
        offset = index_offset,
        size = index_size,
        entries = entries.len(),
        "wrote pak index"
    );
    Ok((index_offset, index_size, hash))
}

/// Position of `compression` in the archive's method list (`None` at 0).
pub(crate) fn method_index(methods: &[Compression], compression: Compression) -> Result<u32> {
    methods
        .iter()
        .position(|&method| method == compression)
        .map(|position| position as u32)
        .ok_or_else(|| {
            Error::Serializer(format!(
                "compression method {compression} has no name table slot"
            ))
        })
}

/// Splits a path into `(parent directory, child)`. The parent keeps its
/// trailing slash; top-level children get the synthetic root `/`.
pub(crate) fn split_path_child(path: &str) -> Option<(&str, &str)> {
    if path == "/" || path.is_empty() {
        None
    } else {
        let path = path.strip_suffix('/').unwrap_or(path);
        match path.rfind('/').map(|i| i + 1) {
            Some(i) => Some(path.split_at(i)),
            None => Some(("/", path)),
        }
    }
}
