use anyhow::Result;

use crate::rootfile::{
    buffer::{DataFetch, ReadBuffer},
    compression::{decompress_blocks, Decompressors},
    rntuple::envelope::Envelope,
    RootError,
};

const LOCATOR_TYPE_LARGE: u8 = 0x01;

/// On-storage byte-range descriptor. A non-negative head word is a
/// standard locator; a negative head word carries a type tag selecting a
/// non-standard layout, of which only the large (64-bit size) variant is
/// defined today.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locator {
    Standard { size: u32, offset: u64 },
    Large { size: u64, offset: u64 },
}

impl Locator {
    pub fn read(buffer: &mut ReadBuffer) -> Result<Locator> {
        let head = buffer.i32_le()?;
        if head >= 0 {
            return Ok(Locator::Standard {
                size: head as u32,
                offset: buffer.u64_le()?,
            });
        }
        let word = head as u32;
        let _locator_size = (word & 0xFFFF) as u16;
        let _reserved = ((word >> 16) & 0xFF) as u8;
        let tag = ((word >> 24) & 0x7F) as u8;
        match tag {
            LOCATOR_TYPE_LARGE => Ok(Locator::Large {
                size: buffer.u64_le()?,
                offset: buffer.u64_le()?,
            }),
            tag => Err(RootError::UnknownLocatorType { tag }.into()),
        }
    }

    /// Bytes on storage.
    pub fn size(&self) -> u64 {
        match *self {
            Locator::Standard { size, .. } => size.into(),
            Locator::Large { size, .. } => size,
        }
    }

    pub fn offset(&self) -> u64 {
        match *self {
            Locator::Standard { offset, .. } | Locator::Large { offset, .. } => offset,
        }
    }

    pub fn fetch_buffer(&self, fetch: &impl DataFetch) -> Result<ReadBuffer> {
        fetch.fetch(self.offset(), self.size())
    }
}

/// Uncompressed envelope length plus the locator of its stored bytes. The
/// stored size differs from the length only when the envelope is
/// compressed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnvelopeLink {
    pub length: u64,
    pub locator: Locator,
}

impl EnvelopeLink {
    pub fn read(buffer: &mut ReadBuffer) -> Result<EnvelopeLink> {
        Ok(EnvelopeLink {
            length: buffer.u64_le()?,
            locator: Locator::read(buffer)?,
        })
    }

    /// Dereference the link: fetch the stored bytes, decompress them when
    /// the stored size disagrees with the declared length, validate the
    /// envelope length word, and decode the expected envelope type. The
    /// buffer must be fully drained by the envelope.
    pub fn read_envelope<E: Envelope>(
        &self,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
    ) -> Result<E> {
        let mut buffer = self.locator.fetch_buffer(fetch)?;
        if self.locator.size() != self.length {
            let data = decompress_blocks(&mut buffer, self.length as usize, codecs)?;
            if !buffer.is_empty() {
                return Err(RootError::Corrupt {
                    context: "bytes left after compressed envelope",
                    declared: self.locator.size(),
                    observed: self.locator.size() - buffer.len() as u64,
                }
                .into());
            }
            buffer = ReadBuffer::new(data, None, 0);
        }
        let word = buffer.peek_u64_le()?;
        let length = word >> 16;
        if length != buffer.len() as u64 {
            return Err(RootError::Corrupt {
                context: "envelope length vs stored bytes",
                declared: length,
                observed: buffer.len() as u64,
            }
            .into());
        }
        let envelope = E::read(&mut buffer)?;
        if !buffer.is_empty() {
            return Err(RootError::Corrupt {
                context: "bytes left after envelope",
                declared: length,
                observed: length - buffer.len() as u64,
            }
            .into());
        }
        Ok(envelope)
    }
}
