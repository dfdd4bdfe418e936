use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

use tracing::{debug, trace};

use crate::data::{self, CompressionAdapter};
use crate::entry::Entry;
use crate::footer::{Footer, COMPRESSION_SLOTS, FOOTER_SIZE};
use crate::hash::path_crc32;
use crate::index;
use crate::name::Name;
use crate::ordered_map::OrderedMap;
use crate::{Compression, Error, Result, LATEST_VERSION};

/// Canonical engine-relative prefix of a mount point.
pub(crate) const MOUNT_PREFIX: &str = "../../../";

/// Bulk-data extensions that never name a primary asset.
const BULK_EXTENSIONS: [&str; 3] = [".uexp", ".ubulk", ".uptnl"];

trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// The three data streams making up one cooked asset.
#[derive(Debug)]
pub struct Asset {
    pub main: Vec<u8>,
    pub export: Option<Vec<u8>>,
    pub export_path: Option<String>,
    pub bulk: Option<Vec<u8>>,
    pub bulk_path: Option<String>,
}

/// A pak archive: either mounted from an existing stream, which it then
/// owns until the first save or drop, or created empty in memory.
pub struct PakFile {
    mount_point: Name,
    path_hash_seed: u64,
    version: i16,
    subversion: i16,
    /// Full method list; index 0 is always `None`, the rest name the
    /// trailer's table slots.
    compression: Vec<Compression>,
    entries: OrderedMap<Name, Entry>,
    reader: Option<Box<dyn ReadSeek>>,
    adapter: Option<Box<dyn CompressionAdapter>>,
}

impl PakFile {
    /// Mounts the archive at `path`.
    pub fn mount<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::mount_reader(BufReader::new(File::open(path)?))
    }

    /// Mounts an archive from any seekable stream. The stream stays owned by
    /// the returned archive and backs all lazy entry reads.
    pub fn mount_reader<R: Read + Seek + 'static>(reader: R) -> Result<Self> {
        let mut reader: Box<dyn ReadSeek> = Box::new(reader);
        let end = reader.seek(io::SeekFrom::End(0))?;
        if end < FOOTER_SIZE {
            return Err(Error::Serializer(format!(
                "stream of {end} bytes cannot hold a pak trailer"
            )));
        }
        reader.seek(io::SeekFrom::Start(end - FOOTER_SIZE))?;
        let footer = Footer::read(&mut reader)?;

        let mut methods = vec![Compression::None];
        methods.extend(&footer.compression);
        let primary = index::read(&mut reader, &footer, &methods)?;
        debug!(
            entries = primary.entries.len(),
            mount_point = %primary.mount_point,
            "mounted pak v{}",
            footer.version
        );
        Ok(PakFile {
            mount_point: primary.mount_point,
            path_hash_seed: primary.path_hash_seed,
            version: footer.version,
            subversion: footer.subversion,
            compression: methods,
            entries: primary.entries,
            reader: Some(reader),
            adapter: None,
        })
    }

    /// Creates an empty archive. `file_name` only seeds the path hashes, the
    /// way the engine seeds them from the pak's own case-folded name;
    /// `compression` is the method applied to entries added later.
    pub fn create(file_name: &str, mount_point: &str, compression: Option<Compression>) -> Self {
        let path_hash_seed = path_crc32(file_name) as u64;
        let method = compression.unwrap_or_default();
        let mut methods = vec![Compression::None];
        if method != Compression::None {
            methods.push(method);
        }
        PakFile {
            mount_point: Name::new(mount_point, path_hash_seed),
            path_hash_seed,
            version: LATEST_VERSION,
            subversion: 0,
            compression: methods,
            entries: OrderedMap::new(),
            reader: None,
            adapter: None,
        }
    }

    /// Registers a pluggable codec for methods the crate cannot run itself
    /// (Oodle). May be set after mounting; entries decompress lazily.
    pub fn set_compression_adapter(&mut self, adapter: impl CompressionAdapter + 'static) {
        self.adapter = Some(Box::new(adapter));
    }

    pub fn mount_point(&self) -> &Name {
        &self.mount_point
    }

    pub fn path_hash_seed(&self) -> u64 {
        self.path_hash_seed
    }

    pub fn version(&self) -> i16 {
        self.version
    }

    /// The method newly added entries are compressed with.
    pub fn compression(&self) -> Compression {
        self.compression.get(1).copied().unwrap_or_default()
    }

    /// Entry names in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &Name> {
        self.entries.keys()
    }

    pub fn has_entry(&self, path: &str) -> bool {
        self.find_entry(path).is_some()
    }

    /// Adds a new entry. The stored key is `path` with the canonical
    /// `../../../` prefix and the relative mount point stripped.
    pub fn add_entry(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        let key = self.entry_key(path);
        if key.is_empty() {
            return Err(Error::InvalidOperation("entry path is empty".to_string()));
        }
        if data.len() > u32::MAX as usize {
            return Err(Error::NotSupported(format!(
                "entry of {} bytes exceeds the 32-bit ceiling",
                data.len()
            )));
        }
        if self.entries.contains_key(key) {
            return Err(Error::InvalidOperation(format!(
                "entry {key:?} already exists"
            )));
        }
        let name = Name::new(key, self.path_hash_seed);
        let method = self.compression();
        trace!(entry = %name, bytes = data.len(), "adding entry");
        self.entries.insert(name, Entry::create(data, method));
        Ok(())
    }

    /// Removes the entry resolved from `path`. Returns whether one existed.
    pub fn remove_entry(&mut self, path: &str) -> bool {
        match self.find_entry(path) {
            Some(position) => self.entries.remove_at(position).is_some(),
            None => false,
        }
    }

    /// Replaces the payload of an existing entry. The new bytes are hashed
    /// and compressed when the archive is next saved.
    pub fn write_entry(&mut self, path: &str, data: Vec<u8>) -> Result<()> {
        if data.len() > u32::MAX as usize {
            return Err(Error::NotSupported(format!(
                "entry of {} bytes exceeds the 32-bit ceiling",
                data.len()
            )));
        }
        let entry = self
            .find_entry(path)
            .and_then(|position| self.entries.value_at_mut(position))
            .ok_or_else(|| {
                Error::InvalidOperation(format!("entry {path:?} does not exist"))
            })?;
        entry.uncompressed = data.len() as u32;
        entry.data = Some(data);
        Ok(())
    }

    /// Reads an entry's payload, pulling it from the backing stream on first
    /// access. `None` when no entry resolves from `path`.
    pub fn read_entry(&mut self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.find_entry(path) {
            Some(position) => self.load_entry(position).map(Some),
            None => Ok(None),
        }
    }

    /// Streaming variant of [`Self::read_entry`]. Returns whether the entry
    /// existed.
    pub fn read_entry_to<W: Write>(&mut self, path: &str, writer: &mut W) -> Result<bool> {
        match self.read_entry(path)? {
            Some(data) => {
                writer.write_all(&data)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Resolves a primary asset and its sibling export/bulk streams.
    /// Querying a bulk-extension path directly is a usage error.
    pub fn get_asset(&mut self, path: &str) -> Result<Option<Asset>> {
        if BULK_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            return Err(Error::InvalidOperation(format!(
                "{path:?} names bulk data, not a primary asset"
            )));
        }
        let Some(main) = self.read_entry(path)? else {
            return Ok(None);
        };
        let mut asset = Asset {
            main,
            export: None,
            export_path: None,
            bulk: None,
            bulk_path: None,
        };
        let export_path = with_extension(path, ".uexp");
        if let Some(export) = self.read_entry(&export_path)? {
            asset.export = Some(export);
            asset.export_path = Some(export_path);
        }
        for ext in [".ubulk", ".uptnl"] {
            let bulk_path = with_extension(path, ext);
            if let Some(bulk) = self.read_entry(&bulk_path)? {
                asset.bulk = Some(bulk);
                asset.bulk_path = Some(bulk_path);
                break;
            }
        }
        Ok(Some(asset))
    }

    /// Saves the archive to `path`. Pending payloads are pulled from the
    /// backing stream first and the stream is dropped before the file opens,
    /// so saving over the mounted path is safe.
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.load_all()?;
        self.reader = None;
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_archive(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Saves the archive to an arbitrary seekable stream.
    pub fn save_to<W: Write + Seek>(&mut self, writer: &mut W) -> Result<()> {
        self.load_all()?;
        self.reader = None;
        self.write_archive(writer)
    }

    /// The stored key for a freshly added path: the canonical prefix goes,
    /// then the relative mount point.
    fn entry_key<'a>(&self, path: &'a str) -> &'a str {
        let path = path.strip_prefix(MOUNT_PREFIX).unwrap_or(path);
        let relative = relative_mount_point(self.mount_point.value());
        match relative.is_empty() {
            true => path,
            false => path.strip_prefix(relative).unwrap_or(path),
        }
    }

    /// Looks `path` up as stored, then with the mount point stripped, then
    /// with the relative mount point stripped. First match wins.
    fn find_entry(&self, path: &str) -> Option<usize> {
        if let Some(position) = self.entries.position(path) {
            return Some(position);
        }
        if let Some(position) = path
            .strip_prefix(self.mount_point.value())
            .and_then(|stripped| self.entries.position(stripped))
        {
            return Some(position);
        }
        let relative = relative_mount_point(self.mount_point.value());
        if !relative.is_empty() {
            if let Some(position) = path
                .strip_prefix(relative)
                .and_then(|stripped| self.entries.position(stripped))
            {
                return Some(position);
            }
        }
        None
    }

    fn load_entry(&mut self, position: usize) -> Result<Vec<u8>> {
        let PakFile {
            entries,
            reader,
            adapter,
            ..
        } = self;
        let entry = entries.value_at_mut(position).ok_or_else(|| {
            Error::InvalidOperation(format!("entry position {position} is out of range"))
        })?;
        if entry.data.is_none() {
            let reader = reader.as_mut().ok_or_else(|| {
                Error::Serializer("entry payload is missing and no source stream is open".to_string())
            })?;
            entry.data = Some(entry.read_data(reader, adapter.as_deref())?);
        }
        Ok(entry.data.clone().unwrap_or_default())
    }

    fn load_all(&mut self) -> Result<()> {
        for position in 0..self.entries.len() {
            let pending = self
                .entries
                .get_index(position)
                .is_some_and(|(_, entry)| entry.data.is_none());
            if pending {
                self.load_entry(position)?;
            }
        }
        Ok(())
    }

    /// Writes payloads, index, and trailer at the writer's position.
    fn write_archive<W: Write + Seek>(&mut self, writer: &mut W) -> Result<()> {
        // every method in use needs a name-table slot
        for entry in self.entries.values() {
            if !self.compression.contains(&entry.compression) {
                if self.compression.len() > COMPRESSION_SLOTS {
                    return Err(Error::Serializer(
                        "compression method name table is full".to_string(),
                    ));
                }
                self.compression.push(entry.compression);
            }
        }

        let PakFile {
            mount_point,
            path_hash_seed,
            version,
            subversion,
            compression,
            entries,
            adapter,
            ..
        } = self;
        let adapter = adapter.as_deref();

        for (name, entry) in entries.iter_mut() {
            let Some(data) = entry.data.take() else {
                return Err(Error::Serializer(format!(
                    "entry {name} has no payload to save"
                )));
            };
            let payload = data::build_payload(entry.compression, &data, adapter)?;
            entry.compression = payload.compression;
            entry.uncompressed = data.len() as u32;
            entry.compressed = payload.stored.len() as u32;
            entry.compression_block_size = payload.block_size;
            entry.hash = payload.hash;
            entry.blocks = Entry::blocks_from_lengths(payload.compression, &payload.block_lengths);
            entry.offset = writer.stream_position()?;

            let method = index::method_index(compression, entry.compression)?;
            entry.write_data_record(writer, method)?;
            writer.write_all(&payload.stored)?;
            entry.data = Some(data);
            trace!(entry = %name, offset = entry.offset, "wrote entry payload");
        }

        let (index_offset, index_size, hash) =
            index::write(writer, mount_point, *path_hash_seed, entries, compression)?;

        Footer {
            encryption_guid: [0; 16],
            encrypted: false,
            version: *version,
            subversion: *subversion,
            index_offset,
            index_size,
            hash,
            compression: compression[1..].to_vec(),
        }
        .write(writer)
    }
}

impl std::fmt::Debug for PakFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PakFile")
            .field("mount_point", &self.mount_point)
            .field("version", &self.version)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// A mount point with the canonical `../../../` prefix stripped. Rooted
/// mount points (leading `/` or a drive letter) normalize to empty.
pub(crate) fn relative_mount_point(mount_point: &str) -> &str {
    match mount_point.strip_prefix(MOUNT_PREFIX) {
        Some(relative) => relative,
        None if is_rooted(mount_point) => "",
        None => mount_point,
    }
}

fn is_rooted(path: &str) -> bool {
    let bytes = path.as_bytes();
    path.starts_with('/')
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'/' || bytes[2] == b'\\'))
}

/// Swaps the extension of the final path component; appends when there is
/// none. `extension` carries its leading dot.
fn with_extension(path: &str, extension: &str) -> String {
    let start = path.rfind('/').map_or(0, |i| i + 1);
    match path[start..].rfind('.') {
        Some(dot) if dot > 0 => format!("{}{extension}", &path[..start + dot]),
        _ => format!("{path}{extension}"),
    }
}
