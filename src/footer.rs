use std::str::FromStr;

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::ext::ReadExt;
use crate::hash::Hash;
use crate::{Compression, Error, Result, LATEST_VERSION, MAGIC, MIN_VERSION};

/// Fixed trailer size: guid 16 + encrypted 1 + magic 4 + version 4 + index
/// offset 8 + index size 8 + hash 20 + five 32-byte method names.
pub const FOOTER_SIZE: u64 = 221;

/// Method-name slots in the trailer. Slot `i` backs method index `i + 1`;
/// index 0 is the implicit `None`.
pub(crate) const COMPRESSION_SLOTS: usize = 5;

#[derive(Debug)]
pub(crate) struct Footer {
    pub encryption_guid: [u8; 16],
    pub encrypted: bool,
    pub version: i16,
    pub subversion: i16,
    pub index_offset: i64,
    pub index_size: i64,
    pub hash: Hash,
    /// Named method slots, in table order. `Compression::None` is implicit
    /// at method index 0 and never stored here.
    pub compression: Vec<Compression>,
}

impl Footer {
    pub fn read<R: std::io::Read>(reader: &mut R) -> Result<Self> {
        let mut encryption_guid = [0u8; 16];
        reader.read_exact(&mut encryption_guid)?;
        let encrypted = reader.read_u8()?;
        let magic = reader.read_u32::<LE>()?;
        if magic != MAGIC {
            return Err(Error::Serializer(format!(
                "found magic of {magic:#x} instead of {MAGIC:#x}"
            )));
        }
        let version = reader.read_i16::<LE>()?;
        let subversion = reader.read_i16::<LE>()?;
        if !(MIN_VERSION..=LATEST_VERSION).contains(&version) {
            return Err(Error::NotSupported(format!(
                "pak version {version} is outside the supported range"
            )));
        }
        if encrypted != 0 {
            return Err(Error::NotSupported("pak index is encrypted".to_string()));
        }
        if encryption_guid != [0; 16] {
            return Err(Error::NotSupported(
                "pak carries an encryption key guid".to_string(),
            ));
        }
        let index_offset = reader.read_i64::<LE>()?;
        let index_size = reader.read_i64::<LE>()?;
        let hash = Hash(reader.read_hash()?);

        let mut compression = Vec::new();
        for _ in 0..COMPRESSION_SLOTS {
            let slot = reader.read_len(32)?;
            let name: String = slot
                .iter()
                .take_while(|&&ch| ch != 0)
                .map(|&ch| ch as char)
                .collect();
            if name.is_empty() {
                // the table fills left to right; the first empty slot ends it
                break;
            }
            compression.push(Compression::from_str(&name).map_err(|_| {
                Error::Serializer(format!("unrecognized compression method name {name:?}"))
            })?);
        }

        Ok(Footer {
            encryption_guid,
            encrypted: false,
            version,
            subversion,
            index_offset,
            index_size,
            hash,
            compression,
        })
    }

    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encryption_guid)?;
        writer.write_u8(self.encrypted as u8)?;
        writer.write_u32::<LE>(MAGIC)?;
        writer.write_i16::<LE>(self.version)?;
        writer.write_i16::<LE>(self.subversion)?;
        writer.write_i64::<LE>(self.index_offset)?;
        writer.write_i64::<LE>(self.index_size)?;
        writer.write_all(&self.hash.0)?;
        for slot in 0..COMPRESSION_SLOTS {
            let mut name = [0u8; 32];
            if let Some(method) = self.compression.get(slot) {
                for (i, b) in method.to_string().as_bytes().iter().enumerate() {
                    name[i] = *b;
                }
            }
            writer.write_all(&name)?;
        }
        Ok(())
    }
}
