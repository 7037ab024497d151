use anyhow::Result;
use tracing::debug;

use crate::rootfile::{
    buffer::{DataFetch, ReadBuffer},
    rntuple::{
        envelope::{read_envelope_with, Envelope, EnvelopeType},
        frame::{read_list_frame, read_record_frame, ListFrame},
        locator::Locator,
    },
    RootError,
};

/// Sharded clusters are a future format revision; reading them is gated on
/// the lowest cluster feature-flag bit.
const CLUSTER_FLAG_SHARDED: u8 = 0x01;

/// Cluster summary record frame: the entry range of one cluster. The
/// entry count and the feature flags share one 64-bit word (56 + 8 bits).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterSummary {
    pub size: u64,
    pub first_entry_number: u64,
    pub n_entries_and_flags: u64,
    pub unknown: Vec<u8>,
}

impl ClusterSummary {
    pub fn read(buffer: &mut ReadBuffer) -> Result<ClusterSummary> {
        let (size, (first_entry_number, n_entries_and_flags), unknown) =
            read_record_frame(buffer, |buf| Ok((buf.u64_le()?, buf.u64_le()?)))?;
        let summary = ClusterSummary {
            size,
            first_entry_number,
            n_entries_and_flags,
            unknown,
        };
        if summary.feature_flags() & CLUSTER_FLAG_SHARDED != 0 {
            return Err(RootError::UnknownFeature {
                flags: CLUSTER_FLAG_SHARDED.into(),
            }
            .into());
        }
        // Other flag bits are ignored.
        Ok(summary)
    }

    pub fn n_entries(&self) -> u64 {
        self.n_entries_and_flags & 0x00FF_FFFF_FFFF_FFFF
    }

    pub fn feature_flags(&self) -> u8 {
        (self.n_entries_and_flags >> 56) as u8
    }
}

/// Location of one page of one column: element count plus the byte range
/// on storage. The element count is stored negated when the page carries a
/// trailing checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageDescription {
    pub n_elements: i32,
    pub locator: Locator,
}

impl PageDescription {
    pub fn read(buffer: &mut ReadBuffer) -> Result<PageDescription> {
        Ok(PageDescription {
            n_elements: buffer.i32_le()?,
            locator: Locator::read(buffer)?,
        })
    }

    pub fn num_elements(&self) -> u64 {
        self.n_elements.unsigned_abs().into()
    }

    /// Fetch the raw page bytes. Interpreting them into column values is
    /// out of scope here.
    pub fn read_page(&self, fetch: &impl DataFetch) -> Result<RPage> {
        let mut buffer = self.locator.fetch_buffer(fetch)?;
        let data = buffer.consume(buffer.len())?;
        Ok(RPage { data })
    }
}

/// Raw page payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RPage {
    pub data: Vec<u8>,
}

/// Inner list frame of the page-location nesting: the pages of one column
/// within one cluster, followed by the column's element offset and, for
/// non-suppressed columns, its compression settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageLocations {
    pub size: u64,
    pub pages: Vec<PageDescription>,
    /// Negative when the column is suppressed in this cluster.
    pub element_offset: i64,
    pub compression_settings: Option<u32>,
    pub unknown: Vec<u8>,
}

impl PageLocations {
    pub fn read(buffer: &mut ReadBuffer) -> Result<PageLocations> {
        let (size, pages, (element_offset, compression_settings), unknown) =
            read_list_frame(buffer, PageDescription::read, |buf| {
                let element_offset = buf.i64_le()?;
                let compression_settings = if element_offset >= 0 {
                    Some(buf.u32_le()?)
                } else {
                    None
                };
                Ok((element_offset, compression_settings))
            })?;
        Ok(PageLocations {
            size,
            pages,
            element_offset,
            compression_settings,
            unknown,
        })
    }

    pub fn is_suppressed(&self) -> bool {
        self.element_offset < 0
    }
}

/// Page-list envelope: cluster summaries plus the cluster -> column ->
/// page triple-nested location frame.
#[derive(Clone, Debug, PartialEq)]
pub struct PageListEnvelope {
    pub length: u64,
    pub checksum: u64,
    /// Must equal the header envelope's trailing checksum.
    pub header_checksum: u64,
    pub cluster_summaries: ListFrame<ClusterSummary>,
    pub page_locations: ListFrame<ListFrame<PageLocations>>,
    pub unknown: Vec<u8>,
}

impl Envelope for PageListEnvelope {
    const TYPE: EnvelopeType = EnvelopeType::PageList;

    fn read(buffer: &mut ReadBuffer) -> Result<PageListEnvelope> {
        let (length, payload, unknown, checksum) =
            read_envelope_with(buffer, Self::TYPE, |buf| {
                let header_checksum = buf.u64_le()?;
                let cluster_summaries = ListFrame::read_with(buf, ClusterSummary::read)?;
                let page_locations = ListFrame::read_with(buf, |buf| {
                    ListFrame::read_with(buf, PageLocations::read)
                })?;
                Ok((header_checksum, cluster_summaries, page_locations))
            })?;
        let (header_checksum, cluster_summaries, page_locations) = payload;
        debug!(
            clusters = cluster_summaries.len(),
            "read RNTuple page-list envelope"
        );
        Ok(PageListEnvelope {
            length,
            checksum,
            header_checksum,
            cluster_summaries,
            page_locations,
            unknown,
        })
    }
}

impl PageListEnvelope {
    /// Fetch every page payload, preserving the cluster -> column -> page
    /// nesting.
    pub fn read_pages(&self, fetch: &impl DataFetch) -> Result<Vec<Vec<Vec<RPage>>>> {
        self.page_locations
            .iter()
            .map(|columns| {
                columns
                    .iter()
                    .map(|pages| pages.pages.iter().map(|p| p.read_page(fetch)).collect())
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }
}
