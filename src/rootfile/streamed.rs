use anyhow::Result;
use tracing::debug;

use crate::rootfile::{
    buffer::ReadBuffer,
    codec::{DecodedObject, Dictionary, ObjectRef},
    string::TString,
    RootError,
};

pub(crate) const K_BYTE_COUNT_MASK: u32 = 0x4000_0000;
const K_CLASS_MASK: u32 = 0x8000_0000;
const K_NEW_CLASS_TAG: u32 = 0xFFFF_FFFF;
const K_NOT_A_VERSION: u16 = 0x8000;

/// Normalize a wire class name into a stable dictionary key: ASCII with
/// `:` -> `3a`, `<` -> `3c`, `>` -> `3e`, `,` -> `2c`, space -> `_`, and
/// `const_` qualifiers removed.
pub fn normalize(name: &[u8]) -> String {
    let mut out = String::with_capacity(name.len());
    for &b in name {
        match b {
            b':' => out.push_str("3a"),
            b'<' => out.push_str("3c"),
            b'>' => out.push_str("3e"),
            b',' => out.push_str("2c"),
            b' ' => out.push('_'),
            _ => out.push(b as char),
        }
    }
    out.replace("const_", "")
}

/// Initial header of any streamed data object.
///
/// Exactly one of `version`, `class_name` (first instance of the class in
/// this buffer), or a bare `class_ref` back-reference is present. New class
/// names register themselves in the buffer's local-refs table at the
/// position they were seen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamHeader {
    /// Remaining bytes in the object after the count word; zero for a bare
    /// back-reference.
    pub byte_count: u32,
    pub version: Option<u16>,
    pub class_name: Option<Vec<u8>>,
    pub class_ref: Option<u64>,
}

impl StreamHeader {
    pub fn read(buffer: &mut ReadBuffer) -> Result<StreamHeader> {
        let raw_count = buffer.u32_be()?;
        if raw_count & K_BYTE_COUNT_MASK == 0 {
            // Not a byte count: the word is a reference to an object seen
            // earlier in the buffer.
            return Ok(StreamHeader {
                byte_count: 0,
                version: None,
                class_name: None,
                class_ref: Some(raw_count.into()),
            });
        }
        let byte_count = raw_count & !K_BYTE_COUNT_MASK;
        let tmp = buffer.peek_i16_be()? as u16;
        if tmp & K_NOT_A_VERSION == 0 {
            let version = buffer.u16_be()?;
            return Ok(StreamHeader {
                byte_count,
                version: Some(version),
                class_name: None,
                class_ref: None,
            });
        }
        let class_info = buffer.u32_be()?;
        if class_info == K_NEW_CLASS_TAG {
            let class_ref = buffer.relpos() - 4;
            let name = buffer.cstring()?;
            if !name
                .iter()
                .all(|c| c.is_ascii_graphic() || *c == b' ')
            {
                return Err(RootError::Invalid {
                    what: "class name is not printable ASCII",
                    value: name.first().copied().unwrap_or(0).into(),
                }
                .into());
            }
            buffer.register_local_ref(class_ref, &name);
            Ok(StreamHeader {
                byte_count,
                version: None,
                class_name: Some(name),
                class_ref: Some(class_ref),
            })
        } else {
            let class_ref = u64::from((class_info & !K_CLASS_MASK).wrapping_sub(2));
            let name = buffer.local_ref(class_ref).ok_or(RootError::Invalid {
                what: "class back-reference not in local-refs table",
                value: class_ref as i64,
            })?;
            Ok(StreamHeader {
                byte_count,
                version: None,
                class_name: Some(name),
                class_ref: Some(class_ref),
            })
        }
    }
}

/// Classes with a fixed wire name, used by the strict TKey dispatch check.
pub trait ClassNamed {
    /// Normalized class name (dictionary key form).
    const CLASS_NAME: &'static str;
}

/// One polymorphic item read from a buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamedItem {
    Object(DecodedObject),
    /// Class not in the dictionary: header plus raw payload, kept so the
    /// surrounding structure stays walkable.
    Uninterpreted { header: StreamHeader, data: Vec<u8> },
    /// Back-reference to an earlier object; not dereferenced.
    Ref(ObjectRef),
}

/// Read one class-tagged object, dispatching on the (possibly
/// back-referenced) class name.
pub fn read_streamed_item(buffer: &mut ReadBuffer, dict: &Dictionary) -> Result<StreamedItem> {
    let header = StreamHeader::read(&mut buffer.clone())?;
    if header.byte_count == 0 && header.class_ref.is_some() && header.class_name.is_none() {
        // Unresolved object back-reference: a null reference, not an error.
        buffer.skip(4)?;
        return Ok(StreamedItem::Ref(ObjectRef::Null));
    }
    let Some(name) = &header.class_name else {
        return Err(RootError::Invalid {
            what: "streamed item header carries no class name",
            value: header.byte_count.into(),
        }
        .into());
    };
    let class = normalize(name);
    let item_len = header.byte_count as usize + 4;
    let mut item_buf = buffer.split_prefix(item_len)?;
    if dict.contains(&class) {
        let object = dict.read_object(&class, &mut item_buf)?;
        if !item_buf.is_empty() {
            return Err(RootError::Corrupt {
                context: "streamed item not fully consumed",
                declared: item_len as u64,
                observed: item_len as u64 - item_buf.len() as u64,
            }
            .into());
        }
        Ok(StreamedItem::Object(object))
    } else {
        debug!(class = %class, "keeping streamed item uninterpreted");
        let header = StreamHeader::read(&mut item_buf)?;
        let data = item_buf.consume(item_buf.len())?;
        Ok(StreamedItem::Uninterpreted { header, data })
    }
}

/// A streamed `TList`: named, ordered collection of polymorphic items with
/// a per-item option string.
#[derive(Clone, Debug, PartialEq)]
pub struct TList {
    pub object: DecodedObject,
    pub name: TString,
    pub items: Vec<(StreamedItem, Vec<u8>)>,
}

impl ClassNamed for TList {
    const CLASS_NAME: &'static str = "TList";
}

impl TList {
    pub fn read(buffer: &mut ReadBuffer, dict: &Dictionary) -> Result<TList> {
        let start = buffer.relpos();
        let header = StreamHeader::read(buffer)?;
        let end = start + u64::from(header.byte_count) + 4;
        let object = dict.read_base("TObject", buffer)?;
        let name = TString::read(buffer)?;
        let count = buffer.i32_be()?;
        let mut items = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let item = read_streamed_item(buffer, dict)?;
            let opt_len = buffer.u8()? as usize;
            let option = buffer.consume(opt_len)?;
            items.push((item, option));
        }
        if buffer.relpos() != end {
            return Err(RootError::Corrupt {
                context: "TList end position",
                declared: end,
                observed: buffer.relpos(),
            }
            .into());
        }
        Ok(TList {
            object,
            name,
            items,
        })
    }
}

/// A streamed `TObjArray`: like `TList` but with a lower bound and no
/// per-item options.
#[derive(Clone, Debug, PartialEq)]
pub struct TObjArray {
    pub object: DecodedObject,
    pub name: TString,
    pub lower_bound: i32,
    pub items: Vec<StreamedItem>,
}

impl ClassNamed for TObjArray {
    const CLASS_NAME: &'static str = "TObjArray";
}

impl TObjArray {
    pub fn read(buffer: &mut ReadBuffer, dict: &Dictionary) -> Result<TObjArray> {
        let start = buffer.relpos();
        let header = StreamHeader::read(buffer)?;
        let end = start + u64::from(header.byte_count) + 4;
        let object = dict.read_base("TObject", buffer)?;
        let name = TString::read(buffer)?;
        let count = buffer.i32_be()?;
        let lower_bound = buffer.i32_be()?;
        let mut items = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            items.push(read_streamed_item(buffer, dict)?);
        }
        if buffer.relpos() != end {
            return Err(RootError::Corrupt {
                context: "TObjArray end position",
                declared: end,
                observed: buffer.relpos(),
            }
            .into());
        }
        Ok(TObjArray {
            object,
            name,
            lower_bound,
            items,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::rootfile::codec::TIOFeaturesLayout;

    #[test]
    fn normalize_encodes_special_characters() {
        assert_eq!(normalize(b"ROOT::RNTuple"), "ROOT3a3aRNTuple");
        assert_eq!(
            normalize(b"map<string,vector<int> >"),
            "map3cstring2cvector3cint3e_3e"
        );
        assert_eq!(normalize(b"vector<const int>"), "vector3cint3e");
        assert_eq!(normalize(b"TNamed"), "TNamed");
    }

    #[test]
    fn new_class_registers_and_backref_resolves() {
        // First instance: new-class tag + C string, second: back-reference.
        let mut data = Vec::new();
        data.extend((0x4000_0000u32 | 20).to_be_bytes());
        data.extend(K_NEW_CLASS_TAG.to_be_bytes());
        data.extend(b"TNamed\0");
        let backref_pos = data.len() as u64;
        // Back-reference encoding: (ref + 2) with the class mask.
        data.extend((0x4000_0000u32 | 8).to_be_bytes());
        data.extend((K_CLASS_MASK | (4 + 2)).to_be_bytes());
        let mut buf = ReadBuffer::new(data, None, 0);
        let first = StreamHeader::read(&mut buf).unwrap();
        assert_eq!(first.class_name.as_deref(), Some(&b"TNamed"[..]));
        assert_eq!(first.class_ref, Some(4));
        assert_eq!(buf.relpos(), backref_pos);
        assert_eq!(buf.local_ref(4).as_deref(), Some(&b"TNamed"[..]));
        let second = StreamHeader::read(&mut buf).unwrap();
        assert_eq!(second.class_name.as_deref(), Some(&b"TNamed"[..]));
        assert_eq!(second.class_ref, Some(4));
    }

    #[test]
    fn version_header() {
        let mut data = (0x4000_0000u32 | 10).to_be_bytes().to_vec();
        data.extend(3u16.to_be_bytes());
        let mut buf = ReadBuffer::new(data, None, 0);
        let header = StreamHeader::read(&mut buf).unwrap();
        assert_eq!(header.byte_count, 10);
        assert_eq!(header.version, Some(3));
        assert_eq!(header.class_name, None);
    }

    #[test]
    fn bare_backref_word() {
        let data = 0x0000_1000u32.to_be_bytes().to_vec();
        let mut buf = ReadBuffer::new(data, None, 0);
        let header = StreamHeader::read(&mut buf).unwrap();
        assert_eq!(header.byte_count, 0);
        assert_eq!(header.class_ref, Some(0x1000));
        assert!(buf.is_empty());
    }

    #[test]
    fn unresolved_backref_errors() {
        let mut data = (0x4000_0000u32 | 8).to_be_bytes().to_vec();
        data.extend((K_CLASS_MASK | 100).to_be_bytes());
        let mut buf = ReadBuffer::new(data, None, 0);
        assert!(StreamHeader::read(&mut buf).is_err());
    }

    #[test]
    fn tobjarray_reads_count_and_lower_bound() {
        let dict = Dictionary::bootstrap(TIOFeaturesLayout::TrailingWhenSet);
        let mut body = Vec::new();
        // TObject base in the bare-version legacy form.
        body.extend(1i16.to_be_bytes());
        body.extend(0i32.to_be_bytes());
        body.extend(0i32.to_be_bytes());
        body.push(0); // empty name
        body.extend(2i32.to_be_bytes());
        body.extend(0i32.to_be_bytes());
        // Two null object references.
        body.extend(0u32.to_be_bytes());
        body.extend(0u32.to_be_bytes());
        let mut data = ((body.len() as u32 + 2) | 0x4000_0000)
            .to_be_bytes()
            .to_vec();
        data.extend(3u16.to_be_bytes());
        data.extend(&body);
        let mut buf = ReadBuffer::new(data, None, 0);
        let array = TObjArray::read(&mut buf, &dict).unwrap();
        assert_eq!(array.lower_bound, 0);
        assert_eq!(array.items.len(), 2);
        assert!(matches!(array.items[0], StreamedItem::Ref(ObjectRef::Null)));
        assert!(buf.is_empty());
    }

    #[test]
    fn unknown_class_becomes_uninterpreted() {
        let dict = Dictionary::bootstrap(TIOFeaturesLayout::TrailingWhenSet);
        let payload = [0xCAu8, 0xFE];
        let mut inner = Vec::new();
        inner.extend(K_NEW_CLASS_TAG.to_be_bytes());
        inner.extend(b"TMysteryType\0");
        inner.extend(2u16.to_be_bytes()); // looks like a version word
        inner.extend(payload);
        let mut data = (0x4000_0000u32 | inner.len() as u32).to_be_bytes().to_vec();
        data.extend(&inner);
        let mut buf = ReadBuffer::new(data, None, 0);
        let item = read_streamed_item(&mut buf, &dict).unwrap();
        match item {
            StreamedItem::Uninterpreted { header, data } => {
                assert_eq!(header.class_name.as_deref(), Some(&b"TMysteryType"[..]));
                assert_eq!(data, vec![0x00, 0x02, 0xCA, 0xFE]);
            }
            other => panic!("expected uninterpreted item, got {other:?}"),
        }
        assert!(buf.is_empty());
    }
}
