use anyhow::Result;

use crate::rootfile::buffer::ReadBuffer;

/// Legacy ROOT string: one length byte, with 255 escaping to a big-endian
/// 32-bit length for long strings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TString(pub Vec<u8>);

impl TString {
    pub fn read(buffer: &mut ReadBuffer) -> Result<TString> {
        let short = buffer.u8()?;
        let len = if short == 255 {
            buffer.u32_be()? as usize
        } else {
            short as usize
        };
        Ok(TString(buffer.consume(len)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn display(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<&[u8]> for TString {
    fn from(value: &[u8]) -> Self {
        TString(value.to_vec())
    }
}

/// RNTuple string: little-endian 32-bit length followed by the characters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RString(pub Vec<u8>);

impl RString {
    pub fn read(buffer: &mut ReadBuffer) -> Result<RString> {
        let len = buffer.u32_le()? as usize;
        Ok(RString(buffer.consume(len)?))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn display(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl From<&[u8]> for RString {
    fn from(value: &[u8]) -> Self {
        RString(value.to_vec())
    }
}
