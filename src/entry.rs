use std::io::{self, Read, Seek, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::data::{self, CompressionAdapter};
use crate::ext::ReadExt;
use crate::hash::Hash;
use crate::{Compression, Error, Result};

/// Byte range of one compressed block, relative to the entry's offset in the
/// archive (the data record header is part of the range's base).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub start: u64,
    pub end: u64,
}

/// The bit-packed first word of an encoded entry record.
///
/// ```text
/// bit 31    offset fits in u32
/// bit 30    uncompressed size fits in u32
/// bit 29    compressed size fits in u32
/// bits 28-23  compression method index
/// bit 22    encrypted
/// bits 21-6   compression block count
/// bits 5-0    block size code; 0x3f means an explicit u32 follows,
///             anything else shifts left by 11
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryFlags {
    pub offset_is_u32: bool,
    pub uncompressed_is_u32: bool,
    pub compressed_is_u32: bool,
    pub method_index: u32,
    pub encrypted: bool,
    pub block_count: u32,
    pub block_size_code: u32,
}

impl EntryFlags {
    pub fn decode_u32(bits: u32) -> Self {
        EntryFlags {
            offset_is_u32: bits & (1 << 31) != 0,
            uncompressed_is_u32: bits & (1 << 30) != 0,
            compressed_is_u32: bits & (1 << 29) != 0,
            method_index: (bits >> 23) & 0x3f,
            encrypted: bits & (1 << 22) != 0,
            block_count: (bits >> 6) & 0xffff,
            block_size_code: bits & 0x3f,
        }
    }

    pub fn encode_u32(&self) -> u32 {
        (self.block_size_code & 0x3f)
            | ((self.block_count & 0xffff) << 6)
            | ((self.encrypted as u32) << 22)
            | ((self.method_index & 0x3f) << 23)
            | ((self.compressed_is_u32 as u32) << 29)
            | ((self.uncompressed_is_u32 as u32) << 30)
            | ((self.offset_is_u32 as u32) << 31)
    }
}

/// One logical file inside the archive. Metadata always present; the payload
/// is loaded from the backing stream on first read.
#[derive(Debug, Clone)]
pub struct Entry {
    pub(crate) compression: Compression,
    pub(crate) offset: u64,
    pub(crate) uncompressed: u32,
    pub(crate) compressed: u32,
    pub(crate) compression_block_size: u32,
    pub(crate) blocks: Option<Vec<Block>>,
    pub(crate) hash: Hash,
    pub(crate) data: Option<Vec<u8>>,
}

impl Entry {
    /// A fresh entry with its payload supplied up front. Offsets, blocks and
    /// the digest are filled in when the archive is saved.
    pub(crate) fn create(data: Vec<u8>, compression: Compression) -> Self {
        Entry {
            compression,
            offset: 0,
            uncompressed: data.len() as u32,
            compressed: data.len() as u32,
            compression_block_size: 0,
            blocks: None,
            hash: Hash::default(),
            data: Some(data),
        }
    }

    /// Size of the data record header that prefixes the payload in the
    /// archive: offset + compressed + uncompressed + method + hash + flags
    /// byte + block size, plus the block table when compressed.
    pub(crate) fn serialized_size(compression: Compression, block_count: u32) -> u64 {
        let mut size = 8 + 8 + 8 + 4 + 20 + 1 + 4;
        if compression != Compression::None {
            size += 4 + (8 + 8) * block_count as u64;
        }
        size
    }

    /// Decodes the compact record the index blob stores per entry.
    pub(crate) fn read_encoded<R: Read>(reader: &mut R, methods: &[Compression]) -> Result<Self> {
        let flags = EntryFlags::decode_u32(reader.read_u32::<LE>()?);
        let compression = *methods.get(flags.method_index as usize).ok_or_else(|| {
            Error::Serializer(format!(
                "compression method index {} has no name table slot",
                flags.method_index
            ))
        })?;

        let mut block_size = match flags.block_size_code {
            0x3f => reader.read_u32::<LE>()?,
            code => code << 11,
        };
        let offset = match flags.offset_is_u32 {
            true => reader.read_u32::<LE>()? as u64,
            false => reader.read_i64::<LE>()? as u64,
        };
        if !flags.uncompressed_is_u32 {
            return Err(Error::NotSupported(
                "entry size exceeds the 32-bit ceiling".to_string(),
            ));
        }
        let uncompressed = reader.read_u32::<LE>()?;
        if flags.encrypted {
            return Err(Error::NotSupported("entry is encrypted".to_string()));
        }

        if compression == Compression::None {
            return Ok(Entry {
                compression,
                offset,
                uncompressed,
                compressed: uncompressed,
                compression_block_size: block_size,
                blocks: None,
                hash: Hash::default(),
                data: None,
            });
        }

        if !flags.compressed_is_u32 {
            return Err(Error::NotSupported(
                "entry size exceeds the 32-bit ceiling".to_string(),
            ));
        }
        let compressed = reader.read_u32::<LE>()?;
        let blocks = match flags.block_count {
            0 => None,
            count => {
                block_size = block_size.min(uncompressed);
                let base = Entry::serialized_size(compression, count);
                Some(if count == 1 {
                    // sole block's extent is implicit in the compressed size
                    vec![Block {
                        start: base,
                        end: base + compressed as u64,
                    }]
                } else {
                    let mut running = base;
                    (0..count)
                        .map(|_| {
                            let len = reader.read_u32::<LE>()? as u64;
                            let block = Block {
                                start: running,
                                end: running + len,
                            };
                            running += len;
                            Ok(block)
                        })
                        .collect::<Result<Vec<_>>>()?
                })
            }
        };

        Ok(Entry {
            compression,
            offset,
            uncompressed,
            compressed,
            compression_block_size: block_size,
            blocks,
            hash: Hash::default(),
            data: None,
        })
    }

    /// Encodes the compact record for the index blob.
    pub(crate) fn write_encoded<W: Write>(&self, writer: &mut W, method_index: u32) -> Result<()> {
        let flags = EntryFlags {
            offset_is_u32: self.offset <= u32::MAX as u64,
            uncompressed_is_u32: true,
            compressed_is_u32: true,
            method_index,
            encrypted: false,
            block_count: self.blocks.as_ref().map_or(0, |blocks| blocks.len() as u32),
            block_size_code: match self.blocks.is_some() {
                true => 0x3f,
                false => 0,
            },
        };
        writer.write_u32::<LE>(flags.encode_u32())?;

        if self.blocks.is_some() {
            writer.write_u32::<LE>(self.compression_block_size)?;
        }
        match flags.offset_is_u32 {
            true => writer.write_u32::<LE>(self.offset as u32)?,
            false => writer.write_i64::<LE>(self.offset as i64)?,
        }
        writer.write_u32::<LE>(self.uncompressed)?;
        if self.compression == Compression::None {
            return Ok(());
        }
        writer.write_u32::<LE>(self.compressed)?;
        if let Some(blocks) = self.blocks.as_ref().filter(|blocks| blocks.len() >= 2) {
            for block in blocks {
                writer.write_u32::<LE>((block.end - block.start) as u32)?;
            }
        }
        Ok(())
    }

    /// Writes the data record header that precedes the stored payload. The
    /// offset slot is reserved and always serialized as zero.
    pub(crate) fn write_data_record<W: Write>(&self, writer: &mut W, method_index: u32) -> Result<()> {
        writer.write_i64::<LE>(0)?;
        writer.write_i64::<LE>(self.compressed as i64)?;
        writer.write_i64::<LE>(self.uncompressed as i64)?;
        writer.write_i32::<LE>(method_index as i32)?;
        writer.write_all(&self.hash.0)?;
        if self.compression != Compression::None {
            let blocks = self.blocks.as_ref().ok_or_else(|| {
                Error::Serializer("compressed entry has no block table".to_string())
            })?;
            writer.write_i32::<LE>(blocks.len() as i32)?;
            for block in blocks {
                writer.write_u64::<LE>(block.start)?;
                writer.write_u64::<LE>(block.end)?;
            }
        }
        writer.write_u8(0)?;
        writer.write_u32::<LE>(self.compression_block_size)?;
        Ok(())
    }

    /// Lays the freshly compressed block lengths out as in-archive ranges,
    /// starting right behind the data record header.
    pub(crate) fn blocks_from_lengths(
        compression: Compression,
        lengths: &[u32],
    ) -> Option<Vec<Block>> {
        if lengths.is_empty() {
            return None;
        }
        let mut running = Entry::serialized_size(compression, lengths.len() as u32);
        Some(
            lengths
                .iter()
                .map(|&len| {
                    let block = Block {
                        start: running,
                        end: running + len as u64,
                    };
                    running += len as u64;
                    block
                })
                .collect(),
        )
    }

    /// Reads and decompresses the payload from the backing stream.
    pub(crate) fn read_data<R: Read + Seek>(
        &self,
        reader: &mut R,
        adapter: Option<&dyn CompressionAdapter>,
    ) -> Result<Vec<u8>> {
        let mut out = vec![0; self.uncompressed as usize];
        match self.compression {
            Compression::None => {
                let header = Entry::serialized_size(Compression::None, 0);
                reader.seek(io::SeekFrom::Start(self.offset + header))?;
                reader.read_exact(&mut out)?;
            }
            _ => {
                let blocks = self.blocks.as_ref().ok_or_else(|| {
                    Error::Serializer("compressed entry has no block table".to_string())
                })?;
                let mut position = 0;
                for block in blocks {
                    reader.seek(io::SeekFrom::Start(self.offset + block.start))?;
                    let stored = reader.read_len((block.end - block.start) as usize)?;
                    let window = (self.compression_block_size as usize).min(out.len() - position);
                    position += data::decompress_into(
                        self.compression,
                        &stored,
                        &mut out[position..position + window],
                        adapter,
                    )?;
                }
                if position != out.len() {
                    return Err(Error::Serializer(format!(
                        "entry decompressed to {position} of {} bytes",
                        out.len()
                    )));
                }
            }
        }
        Ok(out)
    }
}
