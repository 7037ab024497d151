pub mod anchor;
pub mod envelope;
pub mod footer;
pub mod frame;
pub mod header;
pub mod locator;
pub mod pagelist;
pub mod schema;

use anyhow::Result;
use tracing::debug;

use crate::rootfile::{
    buffer::DataFetch,
    compression::Decompressors,
    rntuple::{
        anchor::RNTupleAnchor,
        envelope::FeatureFlags,
        footer::FooterEnvelope,
        header::HeaderEnvelope,
        pagelist::{PageDescription, PageListEnvelope},
        schema::{
            AliasColumnDescription, ColumnDescription, ColumnType, ExtraTypeInformation,
            FieldDescription,
        },
    },
    RootError,
};

/// The full schema of an RNTuple: the header description logically
/// concatenated with the footer's schema extension. Field and column IDs
/// continue across the boundary in serialization order.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDescription {
    pub fields: Vec<FieldDescription>,
    pub columns: Vec<ColumnDescription>,
    pub alias_columns: Vec<AliasColumnDescription>,
    pub extra_type_info: Vec<ExtraTypeInformation>,
}

fn merge<T: Clone>(a: &[T], b: &[T]) -> Vec<T> {
    let mut out = a.to_vec();
    out.extend_from_slice(b);
    out
}

impl SchemaDescription {
    pub fn from_envelopes(
        header: &HeaderEnvelope,
        footer: &FooterEnvelope,
    ) -> SchemaDescription {
        let extension = &footer.schema_extension.schema;
        SchemaDescription {
            fields: merge(&header.schema.fields.items, &extension.fields.items),
            columns: merge(&header.schema.columns.items, &extension.columns.items),
            alias_columns: merge(
                &header.schema.alias_columns.items,
                &extension.alias_columns.items,
            ),
            extra_type_info: merge(
                &header.schema.extra_type_info.items,
                &extension.extra_type_info.items,
            ),
        }
    }
}

/// A page description joined with the column schema it belongs to: enough
/// to fetch and decompress the page without re-walking the envelopes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InterpretablePage {
    pub description: PageDescription,
    /// `ceil(|n_elements| * bits_on_storage / 8)`; the on-disk size is the
    /// locator's.
    pub uncompressed_size: u64,
    pub column_type: ColumnType,
}

/// A fully traversed RNTuple: header, footer, and every page list, with
/// all cross-checksums verified.
#[derive(Clone, Debug, PartialEq)]
pub struct RNTuple {
    pub header: HeaderEnvelope,
    pub footer: FooterEnvelope,
    pub page_lists: Vec<PageListEnvelope>,
}

impl RNTuple {
    pub fn from_anchor(
        anchor: &RNTupleAnchor,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
    ) -> Result<RNTuple> {
        let header = anchor.header(fetch, codecs)?;
        let footer = anchor.footer(fetch, codecs)?;
        if footer.header_checksum != header.checksum {
            return Err(RootError::Corrupt {
                context: "footer header-checksum",
                declared: header.checksum,
                observed: footer.header_checksum,
            }
            .into());
        }
        let page_lists = footer.page_lists(fetch, codecs)?;
        for page_list in &page_lists {
            if page_list.header_checksum != header.checksum {
                return Err(RootError::Corrupt {
                    context: "page-list header-checksum",
                    declared: header.checksum,
                    observed: page_list.header_checksum,
                }
                .into());
            }
        }
        debug!(
            name = %header.name.display(),
            page_lists = page_lists.len(),
            "traversed RNTuple"
        );
        Ok(RNTuple {
            header,
            footer,
            page_lists,
        })
    }

    /// Combined feature flags of header and footer.
    pub fn feature_flags(&self) -> FeatureFlags {
        self.header.feature_flags | self.footer.feature_flags
    }

    pub fn schema(&self) -> SchemaDescription {
        SchemaDescription::from_envelopes(&self.header, &self.footer)
    }

    /// Join every page description with its column schema, preserving the
    /// page-list -> cluster -> column -> page nesting.
    pub fn interpretable_pages(&self) -> Result<Vec<Vec<Vec<Vec<InterpretablePage>>>>> {
        let schema = self.schema();
        let mut out = Vec::with_capacity(self.page_lists.len());
        for page_list in &self.page_lists {
            let mut clusters = Vec::with_capacity(page_list.page_locations.len());
            for columns in &page_list.page_locations {
                if columns.len() > schema.columns.len() {
                    return Err(RootError::Invalid {
                        what: "cluster has more columns than the schema",
                        value: columns.len() as i64,
                    }
                    .into());
                }
                let mut cluster = Vec::with_capacity(columns.len());
                for (locations, column) in columns.iter().zip(&schema.columns) {
                    let pages = locations
                        .pages
                        .iter()
                        .map(|page| InterpretablePage {
                            description: *page,
                            uncompressed_size: (page.num_elements()
                                * u64::from(column.bits_on_storage)
                                + 7)
                                / 8,
                            column_type: column.column_type,
                        })
                        .collect();
                    cluster.push(pages);
                }
                clusters.push(cluster);
            }
            out.push(clusters);
        }
        Ok(out)
    }
}
