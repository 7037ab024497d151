use anyhow::Result;
use tracing::debug;

use crate::rootfile::{
    buffer::{DataFetch, ReadBuffer, RootRead},
    codec::Dictionary,
    compression::Decompressors,
    streamed::{ClassNamed, TList},
    string::TString,
    tdirectory::{TDirectory, TKeyList, TUuid},
    tkey::TKey,
    RootError,
};

/// Bytes the file header can occupy; every ROOT file reserves at least
/// this much before the first record.
const FILE_HEADER_RESERVE: u64 = 100;

/*
 File header (big-endian), after the 4-byte "root" magic:
 +----------------------------------------------+
 |                 Version (4)                  |
 +----------------------------------------------+
 |                  BEGIN (4)                   |
 +----------------------------------------------+
 |               END (4 or 8)                   |
 +----------------------------------------------+
 |             SeekFree (4 or 8)                |
 +----------------------------------------------+
 |  NbytesFree (4)  |  Nfree (4)  | NbytesName(4)|
 +----------------------------------------------+
 | Units (1) | Compress (4) | SeekInfo (4 or 8) |
 +----------------------------------------------+
 |           NbytesInfo (4)  |  UUID (18)       |
 +----------------------------------------------+
 Seeks are 8 bytes when Version >= 1000000.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ROOTFile {
    pub version: i32,
    /// Offset of the first record.
    pub begin: u64,
    /// Offset of first free word at or after the last record.
    pub end: u64,
    pub seek_free: u64,
    pub nbytes_free: i32,
    pub n_free: i32,
    /// Size of the TKey + TNamed part of the first record.
    pub nbytes_name: i32,
    pub units: u8,
    pub compress: i32,
    /// Offset of the StreamerInfo record, 0 when absent.
    pub seek_info: u64,
    pub nbytes_info: i32,
    pub uuid: TUuid,
}

impl RootRead for ROOTFile {
    fn read(buffer: &mut ReadBuffer) -> Result<ROOTFile> {
        let magic = buffer.consume(4)?;
        if magic != b"root" {
            return Err(RootError::Invalid {
                what: "ROOT file magic",
                value: magic.first().copied().unwrap_or(0).into(),
            }
            .into());
        }
        let version = buffer.i32_be()?;
        let begin = buffer.i32_be()? as u64;
        let large = version >= 1_000_000;
        let end;
        let seek_free;
        if large {
            end = buffer.i64_be()? as u64;
            seek_free = buffer.i64_be()? as u64;
        } else {
            end = buffer.u32_be()?.into();
            seek_free = buffer.u32_be()?.into();
        }
        let nbytes_free = buffer.i32_be()?;
        let n_free = buffer.i32_be()?;
        let nbytes_name = buffer.i32_be()?;
        let units = buffer.u8()?;
        let compress = buffer.i32_be()?;
        let seek_info = if large {
            buffer.i64_be()? as u64
        } else {
            buffer.u32_be()?.into()
        };
        let nbytes_info = buffer.i32_be()?;
        let uuid = TUuid::read(buffer)?;
        debug!(version, begin, end, compress, "parsed ROOT file header");
        Ok(ROOTFile {
            version,
            begin,
            end,
            seek_free,
            nbytes_free,
            n_free,
            nbytes_name,
            units,
            compress,
            seek_info,
            nbytes_info,
            uuid,
        })
    }
}

impl ROOTFile {
    pub fn is_large(&self) -> bool {
        self.version >= 1_000_000
    }

    /// Decode the first record: the file's own TNamed and root directory.
    pub fn tfile(&self, fetch: &impl DataFetch, codecs: &Decompressors) -> Result<TFile> {
        let mut head = fetch.fetch(self.begin, self.nbytes_name as u64)?;
        let key = TKey::read(&mut head)?;
        key.read_object_as::<TFile>(fetch, codecs)
    }

    /// Decode the stream-descriptor dictionary record, when present. Items
    /// whose classes are not registered come back uninterpreted; turning
    /// them into decoders is the class-builder's job, not this crate's.
    pub fn streamer_info(
        &self,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
        dict: &Dictionary,
    ) -> Result<Option<TList>> {
        if self.seek_info == 0 || self.nbytes_info <= 0 {
            return Ok(None);
        }
        let mut head = fetch.fetch(self.seek_info, self.nbytes_info as u64)?;
        let key = TKey::read(&mut head)?;
        let mut buffer = key.read_buffer(fetch, codecs)?;
        let declared = buffer.len() as u64;
        let list = TList::read(&mut buffer, dict)?;
        if !buffer.is_empty() {
            return Err(RootError::Corrupt {
                context: "bytes left after StreamerInfo list",
                declared,
                observed: declared - buffer.len() as u64,
            }
            .into());
        }
        Ok(Some(list))
    }
}

/// Read the file header through the fetch interface.
pub fn read_root_file(fetch: &impl DataFetch) -> Result<ROOTFile> {
    let mut buffer = fetch.fetch(0, FILE_HEADER_RESERVE)?;
    ROOTFile::read(&mut buffer)
}

/// The object stored in the first record: file name/title plus the root
/// directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TFile {
    pub name: TString,
    pub title: TString,
    pub rootdir: TDirectory,
}

impl ClassNamed for TFile {
    const CLASS_NAME: &'static str = "TFile";
}

impl RootRead for TFile {
    fn read(buffer: &mut ReadBuffer) -> Result<TFile> {
        Ok(TFile {
            name: TString::read(buffer)?,
            title: TString::read(buffer)?,
            rootdir: TDirectory::read(buffer)?,
        })
    }
}

impl TFile {
    pub fn key_list(&self, fetch: &impl DataFetch, codecs: &Decompressors) -> Result<TKeyList> {
        self.rootdir.key_list(fetch, codecs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rootfile::buffer::SliceFetch;

    pub(crate) fn write_file_header(version: i32, begin: u32, seek_info: u64) -> Vec<u8> {
        let large = version >= 1_000_000;
        let mut out = b"root".to_vec();
        out.extend(version.to_be_bytes());
        out.extend((begin as i32).to_be_bytes());
        if large {
            out.extend(4096i64.to_be_bytes());
            out.extend(0i64.to_be_bytes());
        } else {
            out.extend(4096u32.to_be_bytes());
            out.extend(0u32.to_be_bytes());
        }
        out.extend(0i32.to_be_bytes());
        out.extend(1i32.to_be_bytes());
        out.extend(58i32.to_be_bytes());
        out.push(4);
        out.extend(0i32.to_be_bytes());
        if large {
            out.extend((seek_info as i64).to_be_bytes());
        } else {
            out.extend((seek_info as u32).to_be_bytes());
        }
        out.extend(0i32.to_be_bytes());
        out.extend(1i16.to_be_bytes());
        out.extend([0u8; 16]);
        out
    }

    #[test]
    fn small_header_parses() {
        let mut image = write_file_header(63200, 100, 900);
        image.resize(FILE_HEADER_RESERVE as usize, 0);
        let file = read_root_file(&SliceFetch::new(image)).unwrap();
        assert!(!file.is_large());
        assert_eq!(file.begin, 100);
        assert_eq!(file.end, 4096);
        assert_eq!(file.seek_info, 900);
        assert_eq!(file.nbytes_name, 58);
    }

    #[test]
    fn large_header_parses() {
        let mut image = write_file_header(1_063_200, 100, 0);
        image.resize(FILE_HEADER_RESERVE as usize, 0);
        let file = read_root_file(&SliceFetch::new(image)).unwrap();
        assert!(file.is_large());
        assert_eq!(file.seek_info, 0);
    }

    #[test]
    fn bad_magic_is_invalid() {
        let mut image = write_file_header(63200, 100, 0);
        image[..4].copy_from_slice(b"toor");
        image.resize(FILE_HEADER_RESERVE as usize, 0);
        let err = read_root_file(&SliceFetch::new(image)).unwrap_err();
        assert!(matches!(
            err.downcast::<RootError>().unwrap(),
            RootError::Invalid { .. }
        ));
    }
}
