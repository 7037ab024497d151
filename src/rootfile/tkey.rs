use anyhow::Result;
use tracing::debug;

use crate::rootfile::{
    buffer::{DataFetch, ReadBuffer, RootRead},
    codec::{DecodedObject, Dictionary},
    compression::{decompress_blocks, Decompressors},
    streamed::{normalize, ClassNamed},
    string::TString,
    tdirectory::Datime,
    RootError,
};

/*
 TKey record layout (all big-endian)
 +----------------+----------------+----------------+----------------+
 |                          NBytes (4)                               |
 +----------------+----------------+----------------+----------------+
 |          Version (2)            |            ObjLen (4)           |
 +----------------+----------------+----------------+----------------+
 |          ObjLen (cont.)         |            Datime (4)           |
 +----------------+----------------+----------------+----------------+
 |          Datime (cont.)         |    KeyLen (2)   |    Cycle (2)  |
 +----------------+----------------+----------------+----------------+
 |        SeekKey (4 or 8)         |       SeekPdir (4 or 8)         |
 +----------------+----------------+----------------+----------------+
 |   ClassName, Name, Title: length-prefixed strings                 |
 +-------------------------------------------------------------------+
 Seeks are 8 bytes when Version >= 1000.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TKeyHeader {
    /// Total bytes in the record, key and (possibly compressed) body.
    pub nbytes: i32,
    pub version: i16,
    /// Uncompressed body size.
    pub obj_len: i32,
    pub datime: Datime,
    pub key_len: i16,
    pub cycle: i16,
}

impl RootRead for TKeyHeader {
    fn read(buffer: &mut ReadBuffer) -> Result<TKeyHeader> {
        Ok(TKeyHeader {
            nbytes: buffer.i32_be()?,
            version: buffer.i16_be()?,
            obj_len: buffer.i32_be()?,
            datime: Datime(buffer.u32_be()?),
            key_len: buffer.i16_be()?,
            cycle: buffer.i16_be()?,
        })
    }
}

/// A named, versioned, optionally compressed record in a ROOT file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TKey {
    pub header: TKeyHeader,
    pub seek_key: u64,
    pub seek_pdir: u64,
    pub class_name: TString,
    pub name: TString,
    pub title: TString,
}

impl RootRead for TKey {
    fn read(buffer: &mut ReadBuffer) -> Result<TKey> {
        let start = buffer.relpos();
        let header = TKeyHeader::read(buffer)?;
        let (seek_key, seek_pdir) = if header.version < 1000 {
            (buffer.i32_be()? as u64, buffer.i32_be()? as u64)
        } else {
            (buffer.i64_be()? as u64, buffer.i64_be()? as u64)
        };
        let class_name = TString::read(buffer)?;
        let name = TString::read(buffer)?;
        let title = TString::read(buffer)?;
        let version = header.version % 1000;
        if version != 2 && version != 4 {
            return Err(RootError::Invalid {
                what: "unexpected TKey version",
                value: header.version.into(),
            }
            .into());
        }
        // Some writers pad the key by one word beyond the declared length.
        let key_len = buffer.relpos() - start;
        if key_len != header.key_len as u64 && key_len != header.key_len as u64 + 4 {
            return Err(RootError::Corrupt {
                context: "TKey length",
                declared: header.key_len as u64,
                observed: key_len,
            }
            .into());
        }
        Ok(TKey {
            header,
            seek_key,
            seek_pdir,
            class_name,
            name,
            title,
        })
    }
}

impl TKey {
    /// Whether seeks are 32-bit in this key.
    pub fn is_short(&self) -> bool {
        self.header.version < 1000
    }

    /// Fetch the key body and decompress it if the stored size disagrees
    /// with the declared object length. The returned buffer holds exactly
    /// `obj_len` bytes; a decompressed buffer has no absolute position and
    /// its relative position continues from the key length.
    pub fn read_buffer(
        &self,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
    ) -> Result<ReadBuffer> {
        let body_len = i64::from(self.header.nbytes) - i64::from(self.header.key_len);
        if body_len < 0 || self.header.obj_len < 0 {
            return Err(RootError::Invalid {
                what: "TKey body length",
                value: body_len,
            }
            .into());
        }
        let mut buffer = fetch.fetch(
            self.seek_key + self.header.key_len as u64,
            body_len as u64,
        )?;
        if buffer.len() == self.header.obj_len as usize {
            return Ok(buffer);
        }
        debug!(
            name = %self.name.display(),
            stored = body_len,
            uncompressed = self.header.obj_len,
            "decompressing TKey body"
        );
        let data = decompress_blocks(&mut buffer, self.header.obj_len as usize, codecs)?;
        if !buffer.is_empty() {
            return Err(RootError::Corrupt {
                context: "bytes left after compressed TKey body",
                declared: body_len as u64,
                observed: body_len as u64 - buffer.len() as u64,
            }
            .into());
        }
        Ok(ReadBuffer::new(data, None, self.header.key_len as u64))
    }

    /// Read the key body as a known type. The key's class name is not
    /// checked against the target (legacy leniency); use
    /// [`TKey::read_object_strict`] to reject mismatches.
    pub fn read_object_as<T: RootRead>(
        &self,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
    ) -> Result<T> {
        let mut buffer = self.read_buffer(fetch, codecs)?;
        let declared = buffer.len() as u64;
        let object = T::read(&mut buffer)?;
        if !buffer.is_empty() {
            return Err(RootError::Corrupt {
                context: "bytes left after TKey object",
                declared,
                observed: declared - buffer.len() as u64,
            }
            .into());
        }
        Ok(object)
    }

    /// Like [`TKey::read_object_as`], but errors unless the key's class
    /// name matches the target type.
    pub fn read_object_strict<T: RootRead + ClassNamed>(
        &self,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
    ) -> Result<T> {
        let found = normalize(self.class_name.as_bytes());
        if found != T::CLASS_NAME {
            return Err(RootError::UnknownClass { name: found }.into());
        }
        self.read_object_as(fetch, codecs)
    }

    /// Read the key body by dispatching on its class name through the
    /// dictionary.
    pub fn read_object(
        &self,
        fetch: &impl DataFetch,
        codecs: &Decompressors,
        dict: &Dictionary,
    ) -> Result<DecodedObject> {
        let class = normalize(self.class_name.as_bytes());
        if !dict.contains(&class) {
            return Err(RootError::UnknownClass { name: class }.into());
        }
        let mut buffer = self.read_buffer(fetch, codecs)?;
        let declared = buffer.len() as u64;
        let object = dict.read_object(&class, &mut buffer)?;
        if !buffer.is_empty() {
            return Err(RootError::Corrupt {
                context: "bytes left after TKey object",
                declared,
                observed: declared - buffer.len() as u64,
            }
            .into());
        }
        Ok(object)
    }
}
