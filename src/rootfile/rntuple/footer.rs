use anyhow::Result;
use tracing::debug;

use crate::rootfile::{
    buffer::{DataFetch, ReadBuffer},
    compression::Decompressors,
    rntuple::{
        envelope::{read_envelope_with, Envelope, EnvelopeType, FeatureFlags},
        frame::{read_record_frame, ListFrame},
        locator::EnvelopeLink,
        pagelist::PageListEnvelope,
        schema::SchemaFrames,
    },
};

/// Schema extension record frame: append-only additions to the header
/// schema, carried in the footer. Often empty.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaExtension {
    pub size: u64,
    pub schema: SchemaFrames,
    pub unknown: Vec<u8>,
}

impl SchemaExtension {
    pub fn read(buffer: &mut ReadBuffer) -> Result<SchemaExtension> {
        let (size, schema, unknown) = read_record_frame(buffer, SchemaFrames::read)?;
        Ok(SchemaExtension {
            size,
            schema,
            unknown,
        })
    }
}

/// Cluster group record frame: the entry range covered by a group of
/// clusters and the link to their page-list envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterGroup {
    pub size: u64,
    pub min_entry_number: u64,
    pub entry_span: u64,
    pub n_clusters: u32,
    pub page_list_link: EnvelopeLink,
    pub unknown: Vec<u8>,
}

impl ClusterGroup {
    pub fn read(buffer: &mut ReadBuffer) -> Result<ClusterGroup> {
        let (size, payload, unknown) = read_record_frame(buffer, |buf| {
            Ok((
                buf.u64_le()?,
                buf.u64_le()?,
                buf.u32_le()?,
                EnvelopeLink::read(buf)?,
            ))
        })?;
        let (min_entry_number, entry_span, n_clusters, page_list_link) = payload;
        Ok(ClusterGroup {
            size,
            min_entry_number,
            entry_span,
            n_clusters,
            page_list_link,
            unknown,
        })
    }
}

/// Footer envelope: cluster-group directory plus the schema extension.
#[derive(Clone, Debug, PartialEq)]
pub struct FooterEnvelope {
    pub length: u64,
    pub checksum: u64,
    pub feature_flags: FeatureFlags,
    /// Must equal the header envelope's trailing checksum.
    pub header_checksum: u64,
    pub schema_extension: SchemaExtension,
    pub cluster_groups: ListFrame<ClusterGroup>,
    pub unknown: Vec<u8>,
}

impl Envelope for FooterEnvelope {
    const TYPE: EnvelopeType = EnvelopeType::Footer;

    fn read(buffer: &mut ReadBuffer) -> Result<FooterEnvelope> {
        let (length, payload, unknown, checksum) =
            read_envelope_with(buffer, Self::TYPE, |buf| {
                let feature_flags = FeatureFlags::read(buf)?;
                let header_checksum = buf.u64_le()?;
                let schema_extension = SchemaExtension::read(buf)?;
                let cluster_groups = ListFrame::read_with(buf, ClusterGroup::read)?;
                Ok((
                    feature_flags,
                    header_checksum,
                    schema_extension,
                    cluster_groups,
                ))
            })?;
        let (feature_flags, header_checksum, schema_extension, cluster_groups) = payload;
        debug!(
            cluster_groups = cluster_groups.len(),
            "read RNTuple footer envelope"
        );
        Ok(FooterEnvelope {
            length,
            checksum,
            feature_flags,
            header_checksum,
            schema_extension,
            cluster_groups,
            unknown,
        })
    }
}

impl FooterEnvelope {
    /// Dereference every cluster group's page-list envelope link.
    pub fn page_lists(
        &self,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
    ) -> Result<Vec<PageListEnvelope>> {
        self.cluster_groups
            .iter()
            .map(|group| group.page_list_link.read_envelope(fetch, codecs))
            .collect()
    }
}
