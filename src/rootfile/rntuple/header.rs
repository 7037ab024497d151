use anyhow::Result;
use tracing::debug;

use crate::rootfile::{
    buffer::ReadBuffer,
    rntuple::{
        envelope::{read_envelope_with, Envelope, EnvelopeType, FeatureFlags},
        schema::SchemaFrames,
    },
    string::RString,
};

/// Header envelope: the RNTuple's identity and its schema description.
#[derive(Clone, Debug, PartialEq)]
pub struct HeaderEnvelope {
    pub length: u64,
    pub checksum: u64,
    pub feature_flags: FeatureFlags,
    pub name: RString,
    pub description: RString,
    /// Library that wrote the tuple.
    pub library: RString,
    pub schema: SchemaFrames,
    pub unknown: Vec<u8>,
}

impl Envelope for HeaderEnvelope {
    const TYPE: EnvelopeType = EnvelopeType::Header;

    fn read(buffer: &mut ReadBuffer) -> Result<HeaderEnvelope> {
        let (length, payload, unknown, checksum) =
            read_envelope_with(buffer, Self::TYPE, |buf| {
                let feature_flags = FeatureFlags::read(buf)?;
                let name = RString::read(buf)?;
                let description = RString::read(buf)?;
                let library = RString::read(buf)?;
                let schema = SchemaFrames::read(buf)?;
                Ok((feature_flags, name, description, library, schema))
            })?;
        let (feature_flags, name, description, library, schema) = payload;
        debug!(
            name = %name.display(),
            fields = schema.fields.len(),
            columns = schema.columns.len(),
            "read RNTuple header envelope"
        );
        Ok(HeaderEnvelope {
            length,
            checksum,
            feature_flags,
            name,
            description,
            library,
            schema,
            unknown,
        })
    }
}
