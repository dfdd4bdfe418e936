use std::borrow::Borrow;
use std::hash::Hasher;

use crate::hash::{fnv64_path, path_crc32};

/// Wire encoding of a serialized string, fixed when the string is first read
/// or built and preserved across round trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Utf16,
}

impl Encoding {
    pub(crate) fn detect(value: &str) -> Self {
        match value.is_ascii() {
            true => Encoding::Ascii,
            false => Encoding::Utf16,
        }
    }
}

/// A pak string: the value, how it serializes, and the two case-insensitive
/// hashes the format keys its indices by. Both hashes are computed over the
/// lowercased UTF-16 form at construction; equality and map hashing go
/// through the value alone.
#[derive(Debug, Clone)]
pub struct Name {
    value: String,
    encoding: Encoding,
    crc: u32,
    hash: u64,
}

impl Name {
    /// Builds a name, inferring the narrowest wire encoding. `seed` is the
    /// owning archive's path-hash seed, or 0 outside any archive context.
    pub fn new(value: impl Into<String>, seed: u64) -> Self {
        let value = value.into();
        let encoding = Encoding::detect(&value);
        Self::with_encoding(value, encoding, seed)
    }

    pub fn with_encoding(value: impl Into<String>, encoding: Encoding, seed: u64) -> Self {
        let value = value.into();
        let crc = path_crc32(&value);
        let hash = fnv64_path(&value, seed);
        Name {
            value,
            encoding,
            crc,
            hash,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Engine CRC-32 of the case-folded value.
    pub fn crc32(&self) -> u32 {
        self.crc
    }

    /// Seeded FNV-1a-64 of the case-folded value, as serialized into the
    /// path-hash sub-index.
    pub fn path_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Name {}

impl std::hash::Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state)
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)
    }
}
