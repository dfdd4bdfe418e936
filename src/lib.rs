//! Reading and writing of Unreal Engine `.pak` archives.
//!
//! A pak archive is a flat run of named entry payloads followed by a
//! two-part metadata index and a fixed 221-byte trailer. [`PakFile`] mounts
//! an existing archive for lazy reads, builds a new one in memory, and
//! serializes either back out in the layout the engine's own packer emits.

mod data;
mod entry;
mod error;
mod ext;
mod footer;
mod hash;
mod index;
mod name;
mod ordered_map;
mod pak;

pub use {
    data::CompressionAdapter,
    error::*,
    footer::FOOTER_SIZE,
    hash::{fnv64_path, path_crc32, Hash},
    name::{Encoding, Name},
    ordered_map::OrderedMap,
    pak::{Asset, PakFile},
};

/// The magic word identifying a pak trailer.
pub const MAGIC: u32 = 0x5A6F12E1;

/// Lowest pak version the crate accepts (`Fnv64BugFix`). Earlier versions
/// lack the seeded path-hash index and are rejected on mount.
pub const MIN_VERSION: i16 = 11;

/// The pak version written by [`PakFile::create`].
pub const LATEST_VERSION: i16 = 11;

/// The possible compression methods of a pak entry. `None` is implicit at
/// method index 0 and never named in the trailer's method table.
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, Debug, strum::Display, strum::EnumString)]
pub enum Compression {
    #[default]
    None,
    Zlib,
    Gzip,
    Oodle,
    LZ4,
    Custom,
}
