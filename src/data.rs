//! Block compression for entry payloads. The deflate family runs inline;
//! anything else goes through an injected [`CompressionAdapter`].

use std::io::{Read, Write};

use tracing::trace;

use crate::hash::{sha1, Hash};
use crate::{Compression, Error, Result};

/// Block size cap for newly compressed entries. Payloads smaller than the
/// cap compress as a single block of their own size.
pub(crate) const MAX_BLOCK_SIZE: u32 = 65535;

/// Pluggable block codec for compression methods the crate does not carry
/// natively (Oodle today; future methods plug in through the same vtable).
pub trait CompressionAdapter {
    /// Upper bound on the compressed size of `uncompressed` input bytes.
    fn max_output_size(&self, method: Compression, uncompressed: usize) -> usize;

    /// Compresses `input` into `output` (sized to [`Self::max_output_size`])
    /// and returns the written length.
    fn compress(&self, method: Compression, input: &[u8], output: &mut [u8]) -> Result<usize>;

    /// Decompresses `input` into the exactly-sized `output` window.
    fn decompress(&self, method: Compression, input: &[u8], output: &mut [u8]) -> Result<()>;
}

/// An entry payload staged for writing: the stored bytes (compressed when a
/// method is in effect), the per-block lengths, and the digest of what goes
/// on the wire.
pub(crate) struct Payload {
    pub compression: Compression,
    pub stored: Vec<u8>,
    pub block_lengths: Vec<u32>,
    pub block_size: u32,
    pub hash: Hash,
}

/// Compresses `data` block by block. Empty payloads and the `None` method
/// store the bytes as-is with no block table.
pub(crate) fn build_payload(
    method: Compression,
    data: &[u8],
    adapter: Option<&dyn CompressionAdapter>,
) -> Result<Payload> {
    let method = match data.is_empty() {
        true => Compression::None,
        false => method,
    };
    if method == Compression::None {
        return Ok(Payload {
            compression: Compression::None,
            hash: sha1(data),
            stored: data.to_vec(),
            block_lengths: vec![],
            block_size: 0,
        });
    }

    let block_size = MAX_BLOCK_SIZE.min(data.len() as u32);
    let block_count = data.len().div_ceil(block_size as usize);
    if block_count > 0xffff {
        return Err(Error::NotSupported(format!(
            "payload of {} bytes needs {block_count} compression blocks",
            data.len()
        )));
    }

    let mut stored = Vec::new();
    let mut block_lengths = Vec::with_capacity(block_count);
    for chunk in data.chunks(block_size as usize) {
        let block = compress_block(method, chunk, adapter)?;
        block_lengths.push(block.len() as u32);
        stored.extend_from_slice(&block);
    }
    trace!(
        blocks = block_lengths.len(),
        stored = stored.len(),
        "compressed payload"
    );
    Ok(Payload {
        compression: method,
        hash: sha1(&stored),
        stored,
        block_lengths,
        block_size,
    })
}

pub(crate) fn compress_block(
    method: Compression,
    data: &[u8],
    adapter: Option<&dyn CompressionAdapter>,
) -> Result<Vec<u8>> {
    match method {
        Compression::None => Ok(data.to_vec()),
        Compression::Zlib => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Gzip => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Compression::Oodle => match adapter {
            Some(adapter) => {
                let mut output = vec![0; adapter.max_output_size(method, data.len())];
                let written = adapter.compress(method, data, &mut output)?;
                output.truncate(written);
                Ok(output)
            }
            None => Err(Error::NotImplemented(method)),
        },
        Compression::LZ4 | Compression::Custom => Err(Error::NotImplemented(method)),
    }
}

/// Fills `out` from the stored block `data`, looping on short reads until
/// the window is full or the source is exhausted. Returns the bytes decoded.
pub(crate) fn decompress_into(
    method: Compression,
    data: &[u8],
    out: &mut [u8],
    adapter: Option<&dyn CompressionAdapter>,
) -> Result<usize> {
    match method {
        Compression::None => {
            let len = data.len().min(out.len());
            out[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }
        Compression::Zlib => drain(flate2::read::ZlibDecoder::new(data), out),
        Compression::Gzip => drain(flate2::read::GzDecoder::new(data), out),
        Compression::Oodle => match adapter {
            Some(adapter) => {
                adapter.decompress(method, data, out)?;
                Ok(out.len())
            }
            None => Err(Error::NotImplemented(method)),
        },
        Compression::LZ4 | Compression::Custom => Err(Error::NotImplemented(method)),
    }
}

fn drain<R: Read>(mut decoder: R, out: &mut [u8]) -> Result<usize> {
    let mut decoded = 0;
    while decoded < out.len() {
        let read = decoder.read(&mut out[decoded..])?;
        if read == 0 {
            break;
        }
        decoded += read;
    }
    Ok(decoded)
}
