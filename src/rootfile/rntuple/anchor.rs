use anyhow::Result;
use tracing::debug;

use crate::rootfile::{
    buffer::{DataFetch, ReadBuffer, RootRead},
    compression::Decompressors,
    rntuple::{
        footer::FooterEnvelope,
        header::HeaderEnvelope,
        locator::{EnvelopeLink, Locator},
    },
    streamed::{normalize, ClassNamed, StreamHeader},
    RootError,
};

/// The `ROOT::RNTuple` anchor object: version plus the byte ranges of the
/// header and footer envelopes. Stored in a TKey, streamed big-endian like
/// every legacy ROOT structure; everything it points at is little-endian.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RNTupleAnchor {
    pub version_epoch: u16,
    pub version_major: u16,
    pub version_minor: u16,
    pub version_patch: u16,
    pub seek_header: u64,
    /// Header bytes on storage; equals `len_header` iff uncompressed.
    pub nbytes_header: u64,
    /// Uncompressed header envelope length.
    pub len_header: u64,
    pub seek_footer: u64,
    pub nbytes_footer: u64,
    pub len_footer: u64,
    pub max_key_size: u64,
}

impl ClassNamed for RNTupleAnchor {
    const CLASS_NAME: &'static str = "ROOT3a3aRNTuple";
}

impl RootRead for RNTupleAnchor {
    fn read(buffer: &mut ReadBuffer) -> Result<RNTupleAnchor> {
        let start = buffer.relpos();
        let header = StreamHeader::read(buffer)?;
        if let Some(name) = &header.class_name {
            if !name.is_empty() && normalize(name) != Self::CLASS_NAME {
                return Err(RootError::UnknownClass {
                    name: normalize(name),
                }
                .into());
            }
        }
        let anchor = RNTupleAnchor {
            version_epoch: buffer.u16_be()?,
            version_major: buffer.u16_be()?,
            version_minor: buffer.u16_be()?,
            version_patch: buffer.u16_be()?,
            seek_header: buffer.u64_be()?,
            nbytes_header: buffer.u64_be()?,
            len_header: buffer.u64_be()?,
            seek_footer: buffer.u64_be()?,
            nbytes_footer: buffer.u64_be()?,
            len_footer: buffer.u64_be()?,
            max_key_size: buffer.u64_be()?,
        };
        // Newer writers append further words (a checksum) inside the
        // declared byte count; keep them opaque like envelope tails.
        let end = start + u64::from(header.byte_count) + 4;
        let Some(tail) = end.checked_sub(buffer.relpos()) else {
            return Err(RootError::Corrupt {
                context: "anchor overran declared byte count",
                declared: end,
                observed: buffer.relpos(),
            }
            .into());
        };
        buffer.skip(tail as usize)?;
        debug!(
            epoch = anchor.version_epoch,
            major = anchor.version_major,
            "read RNTuple anchor"
        );
        Ok(anchor)
    }
}

impl RNTupleAnchor {
    pub fn header_link(&self) -> EnvelopeLink {
        EnvelopeLink {
            length: self.len_header,
            locator: Locator::Large {
                size: self.nbytes_header,
                offset: self.seek_header,
            },
        }
    }

    pub fn footer_link(&self) -> EnvelopeLink {
        EnvelopeLink {
            length: self.len_footer,
            locator: Locator::Large {
                size: self.nbytes_footer,
                offset: self.seek_footer,
            },
        }
    }

    pub fn header(
        &self,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
    ) -> Result<HeaderEnvelope> {
        self.header_link().read_envelope(fetch, codecs)
    }

    pub fn footer(
        &self,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
    ) -> Result<FooterEnvelope> {
        self.footer_link().read_envelope(fetch, codecs)
    }
}
