use anyhow::Result;

use crate::rootfile::{
    buffer::{DataFetch, ReadBuffer, RootRead},
    compression::Decompressors,
    tkey::TKey,
    RootError,
};

/// ROOT packed date-time:
/// `(year-1995)<<26 | month<<22 | day<<17 | hour<<12 | minute<<6 | second`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Datime(pub u32);

impl Datime {
    pub fn year(self) -> u32 {
        1995 + (self.0 >> 26)
    }

    pub fn month(self) -> u32 {
        (self.0 >> 22) & 0xF
    }

    pub fn day(self) -> u32 {
        (self.0 >> 17) & 0x1F
    }

    pub fn hour(self) -> u32 {
        (self.0 >> 12) & 0x1F
    }

    pub fn minute(self) -> u32 {
        (self.0 >> 6) & 0x3F
    }

    pub fn second(self) -> u32 {
        self.0 & 0x3F
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TUuid {
    pub version: i16,
    pub bytes: [u8; 16],
}

impl RootRead for TUuid {
    fn read(buffer: &mut ReadBuffer) -> Result<TUuid> {
        let version = buffer.i16_be()?;
        let raw = buffer.consume(16)?;
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&raw);
        Ok(TUuid { version, bytes })
    }
}

/// TDirectory header, v6.22 layout. The record is never compressed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TDirectoryHeader {
    /// Class version, + 1000 when seeks are 64-bit.
    pub version: i16,
    pub datime_c: Datime,
    pub datime_m: Datime,
    /// Size of the associated keys-list record.
    pub nbytes_keys: i32,
    /// Size of TKey + TNamed at creation.
    pub nbytes_name: i32,
}

impl RootRead for TDirectoryHeader {
    fn read(buffer: &mut ReadBuffer) -> Result<TDirectoryHeader> {
        Ok(TDirectoryHeader {
            version: buffer.i16_be()?,
            datime_c: Datime(buffer.u32_be()?),
            datime_m: Datime(buffer.u32_be()?),
            nbytes_keys: buffer.i32_be()?,
            nbytes_name: buffer.i32_be()?,
        })
    }
}

impl TDirectoryHeader {
    pub fn class_version(&self) -> i16 {
        self.version % 1000
    }

    /// True for files larger than 2GB (64-bit seeks).
    pub fn is_large(&self) -> bool {
        self.version > 1000
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TDirectory {
    pub header: TDirectoryHeader,
    pub seek_dir: u64,
    pub seek_parent: u64,
    pub seek_keys: u64,
    pub uuid: Option<TUuid>,
}

impl RootRead for TDirectory {
    fn read(buffer: &mut ReadBuffer) -> Result<TDirectory> {
        let header = TDirectoryHeader::read(buffer)?;
        let (seek_dir, seek_parent, seek_keys) = if header.is_large() {
            (
                buffer.i64_be()? as u64,
                buffer.i64_be()? as u64,
                buffer.i64_be()? as u64,
            )
        } else {
            (
                buffer.i32_be()? as u64,
                buffer.i32_be()? as u64,
                buffer.i32_be()? as u64,
            )
        };
        let uuid = if header.class_version() > 1 {
            Some(TUuid::read(buffer)?)
        } else {
            None
        };
        if !header.is_large() {
            // Reserved space so the seeks can become 64-bit in place.
            buffer.skip(12)?;
        }
        Ok(TDirectory {
            header,
            seek_dir,
            seek_parent,
            seek_keys,
            uuid,
        })
    }
}

impl TDirectory {
    /// Fetch and decode the keys-list record this directory points at.
    pub fn key_list(&self, fetch: &impl DataFetch, codecs: &Decompressors) -> Result<TKeyList> {
        let buffer = fetch.fetch(self.seek_keys, self.header.nbytes_keys as u64)?;
        let key = TKey::read(&mut buffer.clone())?;
        if key.seek_key != self.seek_keys {
            return Err(RootError::Corrupt {
                context: "keys-list record self seek",
                declared: self.seek_keys,
                observed: key.seek_key,
            }
            .into());
        }
        if key.seek_pdir != self.seek_dir {
            return Err(RootError::Corrupt {
                context: "keys-list record parent seek",
                declared: self.seek_dir,
                observed: key.seek_pdir,
            }
            .into());
        }
        // The whole record is already in memory; serve the body fetch from
        // the fetched buffer.
        let base = self.seek_keys;
        let cached = |offset: u64, length: u64| -> Result<ReadBuffer> {
            let mut window = buffer.clone();
            let skip = offset.checked_sub(base).ok_or(RootError::Invalid {
                what: "keys-list body fetch before record start",
                value: offset as i64,
            })?;
            window.skip(skip as usize)?;
            window.split_prefix(length as usize)
        };
        key.read_object_as::<TKeyList>(&cached, codecs)
    }
}

/// The keys of one directory. Short keys are followed by reserve bytes
/// that allow an in-place upgrade to 64-bit seeks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TKeyList {
    pub keys: Vec<TKey>,
    pub padding: Vec<u8>,
}

impl RootRead for TKeyList {
    fn read(buffer: &mut ReadBuffer) -> Result<TKeyList> {
        let count = buffer.i32_be()?;
        if count < 0 {
            return Err(RootError::Invalid {
                what: "negative key count",
                value: count.into(),
            }
            .into());
        }
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            keys.push(TKey::read(buffer)?);
        }
        let padding = if keys.iter().all(TKey::is_short) {
            Vec::new()
        } else {
            let n_short = keys.iter().filter(|k| k.is_short()).count();
            buffer.consume(8 * n_short)?
        };
        Ok(TKeyList { keys, padding })
    }
}

impl TKeyList {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TKey> {
        self.keys.iter()
    }

    /// Look up a key by name; among duplicate names the highest cycle wins.
    pub fn get(&self, name: &str) -> Option<&TKey> {
        self.keys
            .iter()
            .filter(|k| k.name.as_bytes() == name.as_bytes())
            .max_by_key(|k| k.header.cycle)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rootfile::tkey::test::write_key;

    #[test]
    fn datime_unpacks_fields() {
        let dt = Datime((30 << 26) | (6 << 22) | (15 << 17) | (13 << 12) | (45 << 6) | 7);
        assert_eq!(dt.year(), 2025);
        assert_eq!(dt.month(), 6);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 13);
        assert_eq!(dt.minute(), 45);
        assert_eq!(dt.second(), 7);
    }

    fn write_directory(version: i16, seeks: (u64, u64, u64)) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(version.to_be_bytes());
        out.extend(0u32.to_be_bytes());
        out.extend(0u32.to_be_bytes());
        out.extend(200i32.to_be_bytes());
        out.extend(58i32.to_be_bytes());
        if version > 1000 {
            out.extend((seeks.0 as i64).to_be_bytes());
            out.extend((seeks.1 as i64).to_be_bytes());
            out.extend((seeks.2 as i64).to_be_bytes());
        } else {
            out.extend((seeks.0 as i32).to_be_bytes());
            out.extend((seeks.1 as i32).to_be_bytes());
            out.extend((seeks.2 as i32).to_be_bytes());
        }
        if version % 1000 > 1 {
            out.extend(1i16.to_be_bytes());
            out.extend([0u8; 16]);
        }
        if version < 1000 {
            out.extend([0u8; 12]);
        }
        out
    }

    #[test]
    fn short_directory_has_reserved_tail() {
        // 32-bit seeks plus exactly 12 reserved bytes after the record.
        let data = write_directory(5, (100, 0, 300));
        let mut buf = ReadBuffer::new(data, None, 0);
        let dir = TDirectory::read(&mut buf).unwrap();
        assert!(!dir.header.is_large());
        assert_eq!(dir.seek_keys, 300);
        assert!(dir.uuid.is_some());
        assert!(buf.is_empty());
    }

    #[test]
    fn large_directory_skips_reserved_tail() {
        let data = write_directory(1005, (100, 0, 0x3_0000_0000));
        let mut buf = ReadBuffer::new(data, None, 0);
        let dir = TDirectory::read(&mut buf).unwrap();
        assert!(dir.header.is_large());
        assert_eq!(dir.seek_keys, 0x3_0000_0000);
        assert!(buf.is_empty());
    }

    #[test]
    fn keylist_lookup_prefers_highest_cycle() {
        let mut data = 3i32.to_be_bytes().to_vec();
        for (cycle, name) in [(1i16, &b"A"[..]), (3, b"A"), (1, b"B")] {
            let mut key = write_key(60, 20, 0, 0, b"RBlob", name, b"");
            // Patch the cycle word (offset 16 in the fixed header).
            key[16..18].copy_from_slice(&cycle.to_be_bytes());
            data.extend(key);
        }
        let mut buf = ReadBuffer::new(data, None, 0);
        let list = TKeyList::read(&mut buf).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.get("A").unwrap().header.cycle, 3);
        assert_eq!(list.get("B").unwrap().header.cycle, 1);
        assert!(list.get("C").is_none());
        assert!(buf.is_empty());
        assert!(list.padding.is_empty());
    }
}
