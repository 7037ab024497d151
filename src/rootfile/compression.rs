use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::rootfile::{buffer::ReadBuffer, RootError};

/// Two-character algorithm tag opening every compressed block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompressionTag {
    Zlib,
    Lzma,
    Lz4,
    Zstd,
    /// Pre-zlib algorithm from early ROOT versions.
    Legacy,
}

impl CompressionTag {
    pub fn from_bytes(tag: [u8; 2]) -> Result<CompressionTag> {
        Ok(match &tag {
            b"ZL" => CompressionTag::Zlib,
            b"XZ" => CompressionTag::Lzma,
            b"L4" => CompressionTag::Lz4,
            b"ZS" => CompressionTag::Zstd,
            b"CS" => CompressionTag::Legacy,
            _ => {
                return Err(RootError::CodecError {
                    context: "unrecognized compression tag",
                }
                .into())
            }
        })
    }
}

/// Nine-byte header of one compressed block: tag, method byte, then two
/// 24-bit little-endian sizes (bytes on disk, bytes when inflated).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompressedBlockHeader {
    pub tag: CompressionTag,
    pub method: u8,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl CompressedBlockHeader {
    pub fn read(buffer: &mut ReadBuffer) -> Result<CompressedBlockHeader> {
        let tag = CompressionTag::from_bytes([buffer.u8()?, buffer.u8()?])?;
        let method = buffer.u8()?;
        let size24 = |buffer: &mut ReadBuffer| -> Result<u32> {
            let b = buffer.consume(3)?;
            Ok(u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[2]) << 16)
        };
        let compressed_size = size24(buffer)?;
        let uncompressed_size = size24(buffer)?;
        Ok(CompressedBlockHeader {
            tag,
            method,
            compressed_size,
            uncompressed_size,
        })
    }
}

/// Pluggable codec: maps a compressed payload and its declared inflated
/// size to plain bytes. For LZ4 blocks the payload starts with the stored
/// content checksum; handling it is the codec's business.
pub trait Decompressor {
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>>;
}

impl<F> Decompressor for F
where
    F: Fn(&[u8], usize) -> Result<Vec<u8>>,
{
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        self(data, uncompressed_size)
    }
}

/// Registry of decompressors keyed by compression tag. Empty by default;
/// the engine itself ships no codecs.
#[derive(Default)]
pub struct Decompressors {
    codecs: HashMap<CompressionTag, Box<dyn Decompressor>>,
}

impl Decompressors {
    pub fn new() -> Decompressors {
        Decompressors::default()
    }

    pub fn register(&mut self, tag: CompressionTag, codec: impl Decompressor + 'static) {
        self.codecs.insert(tag, Box::new(codec));
    }

    pub fn with(mut self, tag: CompressionTag, codec: impl Decompressor + 'static) -> Decompressors {
        self.register(tag, codec);
        self
    }

    fn get(&self, tag: CompressionTag) -> Result<&dyn Decompressor> {
        self.codecs.get(&tag).map(|c| c.as_ref()).ok_or_else(|| {
            RootError::CodecError {
                context: "no decompressor registered for compression tag",
            }
            .into()
        })
    }
}

/// Inflate a chain of compressed blocks until `expected_size` bytes have
/// been produced. Every block's output length is validated against its
/// header before the next block is read.
pub fn decompress_blocks(
    buffer: &mut ReadBuffer,
    expected_size: usize,
    codecs: &Decompressors,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_size);
    while out.len() < expected_size {
        let header = CompressedBlockHeader::read(buffer)?;
        debug!(
            ?header.tag,
            compressed = header.compressed_size,
            uncompressed = header.uncompressed_size,
            "decompressing block"
        );
        let payload = buffer.consume(header.compressed_size as usize)?;
        let chunk = codecs
            .get(header.tag)?
            .decompress(&payload, header.uncompressed_size as usize)?;
        if chunk.len() != header.uncompressed_size as usize {
            return Err(RootError::CodecError {
                context: "decompressed block length disagrees with header",
            }
            .into());
        }
        out.extend_from_slice(&chunk);
    }
    if out.len() != expected_size {
        return Err(RootError::Corrupt {
            context: "decompressed size",
            declared: expected_size as u64,
            observed: out.len() as u64,
        }
        .into());
    }
    Ok(out)
}
