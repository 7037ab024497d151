use std::ops::BitOr;

use anyhow::Result;
use num_enum::TryFromPrimitive;

use crate::rootfile::{buffer::ReadBuffer, RootError};

#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u16)]
pub enum EnvelopeType {
    Reserved = 0x00,
    Header = 0x01,
    Footer = 0x02,
    PageList = 0x03,
}

/// RNTuple feature flags from the header and footer envelopes. No flag is
/// defined yet, so any set bit means the file needs a newer reader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureFlags(pub u64);

impl FeatureFlags {
    pub fn read(buffer: &mut ReadBuffer) -> Result<FeatureFlags> {
        let flags = buffer.i64_le()?;
        if flags != 0 {
            return Err(RootError::UnknownFeature {
                flags: flags as u64,
            }
            .into());
        }
        Ok(FeatureFlags(flags as u64))
    }
}

impl BitOr for FeatureFlags {
    type Output = FeatureFlags;

    fn bitor(self, rhs: FeatureFlags) -> FeatureFlags {
        FeatureFlags(self.0 | rhs.0)
    }
}

/// Typed length-and-checksum-wrapped payload container.
pub trait Envelope: Sized {
    const TYPE: EnvelopeType;

    fn read(buffer: &mut ReadBuffer) -> Result<Self>;
}

/// Shared envelope framing: the leading word packs the envelope length
/// into the upper 48 bits and the type into the lower 16; the length spans
/// the whole envelope including the word itself and the trailing checksum.
/// Payload bytes this reader does not understand are kept as the unknown
/// tail. Returns (length, payload, unknown, checksum).
pub(crate) fn read_envelope_with<P>(
    buffer: &mut ReadBuffer,
    expected: EnvelopeType,
    read_payload: impl FnOnce(&mut ReadBuffer) -> Result<P>,
) -> Result<(u64, P, Vec<u8>, u64)> {
    let start = buffer.relpos();
    let word = buffer.u64_le()?;
    let raw_type = (word & 0xFFFF) as u16;
    let length = word >> 16;
    let type_id = EnvelopeType::try_from_primitive(raw_type)
        .map_err(|_| RootError::UnknownEnvelopeType { type_id: raw_type })?;
    if type_id != expected {
        return Err(RootError::Corrupt {
            context: "envelope type",
            declared: expected as u64,
            observed: type_id as u64,
        }
        .into());
    }
    if length < 8 || length - 8 != buffer.len() as u64 {
        return Err(RootError::Corrupt {
            context: "envelope length",
            declared: length,
            observed: buffer.len() as u64 + 8,
        }
        .into());
    }
    let payload = read_payload(buffer)?;
    let consumed = buffer.relpos() - start;
    let Some(tail) = length.checked_sub(consumed + 8) else {
        return Err(RootError::Corrupt {
            context: "envelope payload overran declared length",
            declared: length,
            observed: consumed + 8,
        }
        .into());
    };
    let unknown = buffer.consume(tail as usize)?;
    let checksum = buffer.u64_le()?;
    Ok((length, payload, unknown, checksum))
}

#[cfg(test)]
mod test {
    use super::*;

    /// Assemble a minimal envelope: framing word, payload, unknown tail,
    /// checksum.
    pub(crate) fn envelope_bytes(
        type_id: u16,
        payload: &[u8],
        unknown: &[u8],
        checksum: u64,
    ) -> Vec<u8> {
        let length = 8 + payload.len() as u64 + unknown.len() as u64 + 8;
        let mut out = ((length << 16) | u64::from(type_id)).to_le_bytes().to_vec();
        out.extend(payload);
        out.extend(unknown);
        out.extend(checksum.to_le_bytes());
        out
    }

    #[test]
    fn framing_accounts_every_byte() {
        let data = envelope_bytes(0x02, &42u32.to_le_bytes(), &[1, 2, 3], 0xABCD);
        let mut buf = ReadBuffer::new(data, None, 0);
        let start = buf.relpos();
        let (length, payload, unknown, checksum) =
            read_envelope_with(&mut buf, EnvelopeType::Footer, |b| b.u32_le()).unwrap();
        assert_eq!(payload, 42);
        assert_eq!(unknown, vec![1, 2, 3]);
        assert_eq!(checksum, 0xABCD);
        // Bytes consumed before the checksum equal length - 8.
        assert_eq!(buf.relpos() - start - 8, length - 8);
        assert!(buf.is_empty());
    }

    #[test]
    fn envelope_type_mismatch_is_corrupt() {
        let data = envelope_bytes(0x01, &[], &[], 0);
        let mut buf = ReadBuffer::new(data, None, 0);
        let err = read_envelope_with(&mut buf, EnvelopeType::Footer, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err.downcast::<RootError>().unwrap(),
            RootError::Corrupt { .. }
        ));
    }

    #[test]
    fn unknown_envelope_type_is_fatal() {
        let data = envelope_bytes(0x07, &[], &[], 0);
        let mut buf = ReadBuffer::new(data, None, 0);
        let err = read_envelope_with(&mut buf, EnvelopeType::Footer, |_| Ok(())).unwrap_err();
        assert_eq!(
            err.downcast::<RootError>().unwrap(),
            RootError::UnknownEnvelopeType { type_id: 7 }
        );
    }

    #[test]
    fn declared_length_must_match_buffer() {
        let mut data = envelope_bytes(0x02, &[0; 4], &[], 0);
        data.push(0xFF);
        let mut buf = ReadBuffer::new(data, None, 0);
        let err = read_envelope_with(&mut buf, EnvelopeType::Footer, |b| b.u32_le()).unwrap_err();
        assert!(matches!(
            err.downcast::<RootError>().unwrap(),
            RootError::Corrupt { .. }
        ));
    }

    #[test]
    fn nonzero_feature_flags_abort() {
        let mut buf = ReadBuffer::new(4i64.to_le_bytes().to_vec(), None, 0);
        let err = FeatureFlags::read(&mut buf).unwrap_err();
        assert_eq!(
            err.downcast::<RootError>().unwrap(),
            RootError::UnknownFeature { flags: 4 }
        );
        let mut buf = ReadBuffer::new(0i64.to_le_bytes().to_vec(), None, 0);
        assert_eq!(FeatureFlags::read(&mut buf).unwrap(), FeatureFlags(0));
    }
}
