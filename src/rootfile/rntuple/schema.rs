use anyhow::Result;
use num_enum::TryFromPrimitive;

use crate::rootfile::{
    buffer::ReadBuffer,
    rntuple::frame::{read_record_frame, ListFrame},
    string::RString,
    RootError,
};

/// Physical column representation on storage.
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromPrimitive)]
#[repr(u16)]
pub enum ColumnType {
    Bit = 0x00,
    Byte = 0x01,
    Char = 0x02,
    Int8 = 0x03,
    UInt8 = 0x04,
    Int16 = 0x05,
    UInt16 = 0x06,
    Int32 = 0x07,
    UInt32 = 0x08,
    Int64 = 0x09,
    UInt64 = 0x0A,
    Real16 = 0x0B,
    Real32 = 0x0C,
    Real64 = 0x0D,
    Index32 = 0x0E,
    Index64 = 0x0F,
    Switch = 0x10,
    SplitInt16 = 0x11,
    SplitUInt16 = 0x12,
    SplitInt32 = 0x13,
    SplitUInt32 = 0x14,
    SplitInt64 = 0x15,
    SplitUInt64 = 0x16,
    SplitReal16 = 0x17,
    SplitReal32 = 0x18,
    SplitReal64 = 0x19,
    SplitIndex32 = 0x1A,
    SplitIndex64 = 0x1B,
    Real32Trunc = 0x1C,
    Real32Quant = 0x1D,
}

const FIELD_FLAG_REPETITIVE: u16 = 0x01;
const FIELD_FLAG_PROJECTED: u16 = 0x02;
const FIELD_FLAG_CHECKSUM: u16 = 0x04;

/// Field record frame from the header schema or a schema extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescription {
    pub size: u64,
    pub field_version: u32,
    pub type_version: u32,
    pub parent_field_id: u32,
    pub structural_role: u16,
    pub flags: u16,
    pub field_name: RString,
    pub type_name: RString,
    pub type_alias: RString,
    pub description: RString,
    /// Fixed repetition count, for repetitive fields.
    pub array_size: Option<u64>,
    /// Source field, for projected fields.
    pub source_field_id: Option<u32>,
    pub type_checksum: Option<u32>,
    pub unknown: Vec<u8>,
}

impl FieldDescription {
    pub fn read(buffer: &mut ReadBuffer) -> Result<FieldDescription> {
        let (size, payload, unknown) = read_record_frame(buffer, |buf| {
            let field_version = buf.u32_le()?;
            let type_version = buf.u32_le()?;
            let parent_field_id = buf.u32_le()?;
            let structural_role = buf.u16_le()?;
            let flags = buf.u16_le()?;
            let field_name = RString::read(buf)?;
            let type_name = RString::read(buf)?;
            let type_alias = RString::read(buf)?;
            let description = RString::read(buf)?;
            let array_size = if flags & FIELD_FLAG_REPETITIVE != 0 {
                Some(buf.u64_le()?)
            } else {
                None
            };
            let source_field_id = if flags & FIELD_FLAG_PROJECTED != 0 {
                Some(buf.u32_le()?)
            } else {
                None
            };
            let type_checksum = if flags & FIELD_FLAG_CHECKSUM != 0 {
                Some(buf.u32_le()?)
            } else {
                None
            };
            Ok((
                field_version,
                type_version,
                parent_field_id,
                structural_role,
                flags,
                field_name,
                type_name,
                type_alias,
                description,
                array_size,
                source_field_id,
                type_checksum,
            ))
        })?;
        let (
            field_version,
            type_version,
            parent_field_id,
            structural_role,
            flags,
            field_name,
            type_name,
            type_alias,
            description,
            array_size,
            source_field_id,
            type_checksum,
        ) = payload;
        Ok(FieldDescription {
            size,
            field_version,
            type_version,
            parent_field_id,
            structural_role,
            flags,
            field_name,
            type_name,
            type_alias,
            description,
            array_size,
            source_field_id,
            type_checksum,
            unknown,
        })
    }
}

const COLUMN_FLAG_DEFERRED: u16 = 0x01;
const COLUMN_FLAG_RANGE: u16 = 0x02;

/// Column record frame from the header schema or a schema extension.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDescription {
    pub size: u64,
    pub column_type: ColumnType,
    pub bits_on_storage: u16,
    pub field_id: u32,
    pub flags: u16,
    pub representation_index: u16,
    /// First element index, for deferred columns.
    pub first_element_index: Option<u64>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub unknown: Vec<u8>,
}

impl ColumnDescription {
    pub fn read(buffer: &mut ReadBuffer) -> Result<ColumnDescription> {
        let (size, payload, unknown) = read_record_frame(buffer, |buf| {
            let raw_type = buf.u16_le()?;
            let column_type = ColumnType::try_from_primitive(raw_type).map_err(|_| {
                RootError::Invalid {
                    what: "column type tag",
                    value: raw_type.into(),
                }
            })?;
            let bits_on_storage = buf.u16_le()?;
            let field_id = buf.u32_le()?;
            let flags = buf.u16_le()?;
            let representation_index = buf.u16_le()?;
            let first_element_index = if flags & COLUMN_FLAG_DEFERRED != 0 {
                Some(buf.u64_le()?)
            } else {
                None
            };
            let (min_value, max_value) = if flags & COLUMN_FLAG_RANGE != 0 {
                (Some(buf.f64_le()?), Some(buf.f64_le()?))
            } else {
                (None, None)
            };
            Ok((
                column_type,
                bits_on_storage,
                field_id,
                flags,
                representation_index,
                first_element_index,
                min_value,
                max_value,
            ))
        })?;
        let (
            column_type,
            bits_on_storage,
            field_id,
            flags,
            representation_index,
            first_element_index,
            min_value,
            max_value,
        ) = payload;
        Ok(ColumnDescription {
            size,
            column_type,
            bits_on_storage,
            field_id,
            flags,
            representation_index,
            first_element_index,
            min_value,
            max_value,
            unknown,
        })
    }
}

/// Alias column record frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AliasColumnDescription {
    pub size: u64,
    pub physical_column_id: u32,
    pub field_id: u32,
    pub unknown: Vec<u8>,
}

impl AliasColumnDescription {
    pub fn read(buffer: &mut ReadBuffer) -> Result<AliasColumnDescription> {
        let (size, (physical_column_id, field_id), unknown) =
            read_record_frame(buffer, |buf| Ok((buf.u32_le()?, buf.u32_le()?)))?;
        Ok(AliasColumnDescription {
            size,
            physical_column_id,
            field_id,
            unknown,
        })
    }
}

/// Extra type information record frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraTypeInformation {
    pub size: u64,
    pub content_identifier: u32,
    pub type_version: u32,
    pub type_name: RString,
    pub unknown: Vec<u8>,
}

impl ExtraTypeInformation {
    pub fn read(buffer: &mut ReadBuffer) -> Result<ExtraTypeInformation> {
        let (size, (content_identifier, type_version, type_name), unknown) =
            read_record_frame(buffer, |buf| {
                Ok((buf.u32_le()?, buf.u32_le()?, RString::read(buf)?))
            })?;
        Ok(ExtraTypeInformation {
            size,
            content_identifier,
            type_version,
            type_name,
            unknown,
        })
    }
}

/// The four schema list frames shared by the header envelope payload and
/// the footer's schema extension: fields, columns, alias columns, extra
/// type information, in that order.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaFrames {
    pub fields: ListFrame<FieldDescription>,
    pub columns: ListFrame<ColumnDescription>,
    pub alias_columns: ListFrame<AliasColumnDescription>,
    pub extra_type_info: ListFrame<ExtraTypeInformation>,
}

impl SchemaFrames {
    pub fn read(buffer: &mut ReadBuffer) -> Result<SchemaFrames> {
        Ok(SchemaFrames {
            fields: ListFrame::read_with(buffer, FieldDescription::read)?,
            columns: ListFrame::read_with(buffer, ColumnDescription::read)?,
            alias_columns: ListFrame::read_with(buffer, AliasColumnDescription::read)?,
            extra_type_info: ListFrame::read_with(buffer, ExtraTypeInformation::read)?,
        })
    }
}
