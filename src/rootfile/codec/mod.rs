pub mod double32;

use std::{collections::HashMap, rc::Rc};

use anyhow::Result;

use crate::rootfile::{
    buffer::ReadBuffer,
    streamed::{normalize, StreamHeader},
    string::TString,
    RootError,
};
use self::double32::Double32;

/// A decoded member value. Containers nest; `Absent` marks an optional
/// member whose presence flag was clear.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(TString),
    Bytes(Vec<u8>),
    Array(NumericArray),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Object(DecodedObject),
    Ref(ObjectRef),
    Absent,
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v.into()),
            Value::I8(v) => u64::try_from(v).ok(),
            Value::U16(v) => Some(v.into()),
            Value::I16(v) => u64::try_from(v).ok(),
            Value::U32(v) => Some(v.into()),
            Value::I32(v) => u64::try_from(v).ok(),
            Value::U64(v) => Some(v),
            Value::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }
}

/// Homogeneous numeric array, kept in its declared element type.
#[derive(Clone, Debug, PartialEq)]
pub enum NumericArray {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl NumericArray {
    pub fn len(&self) -> usize {
        match self {
            NumericArray::U8(v) => v.len(),
            NumericArray::I8(v) => v.len(),
            NumericArray::U16(v) => v.len(),
            NumericArray::I16(v) => v.len(),
            NumericArray::U32(v) => v.len(),
            NumericArray::I32(v) => v.len(),
            NumericArray::U64(v) => v.len(),
            NumericArray::I64(v) => v.len(),
            NumericArray::F32(v) => v.len(),
            NumericArray::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A pointer read from a streamed object. External references are not
/// dereferenced by this engine; callers treat them as null.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectRef {
    Null,
    Inline { skipped: u32 },
    External { offset: u32 },
}

/// Ordered member set of a decoded object.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Members(Vec<(String, Value)>);

impl Members {
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn get_uint(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DecodedObject {
    pub class_name: String,
    pub members: Members,
}

/// Fixed-width primitive format: explicit width and endianness per call
/// site. Big-endian for legacy ROOT structures, little-endian inside
/// RNTuple envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimFmt {
    U8,
    I8,
    U16Be,
    U16Le,
    I16Be,
    I16Le,
    U32Be,
    U32Le,
    I32Be,
    I32Le,
    U64Be,
    U64Le,
    I64Be,
    I64Le,
    F32Be,
    F32Le,
    F64Be,
    F64Le,
}

impl PrimFmt {
    pub fn item_size(self) -> usize {
        match self {
            PrimFmt::U8 | PrimFmt::I8 => 1,
            PrimFmt::U16Be | PrimFmt::U16Le | PrimFmt::I16Be | PrimFmt::I16Le => 2,
            PrimFmt::U32Be
            | PrimFmt::U32Le
            | PrimFmt::I32Be
            | PrimFmt::I32Le
            | PrimFmt::F32Be
            | PrimFmt::F32Le => 4,
            PrimFmt::U64Be
            | PrimFmt::U64Le
            | PrimFmt::I64Be
            | PrimFmt::I64Le
            | PrimFmt::F64Be
            | PrimFmt::F64Le => 8,
        }
    }

    pub fn read(self, buffer: &mut ReadBuffer) -> Result<Value> {
        Ok(match self {
            PrimFmt::U8 => Value::U8(buffer.u8()?),
            PrimFmt::I8 => Value::I8(buffer.i8()?),
            PrimFmt::U16Be => Value::U16(buffer.u16_be()?),
            PrimFmt::U16Le => Value::U16(buffer.u16_le()?),
            PrimFmt::I16Be => Value::I16(buffer.i16_be()?),
            PrimFmt::I16Le => Value::I16(buffer.i16_le()?),
            PrimFmt::U32Be => Value::U32(buffer.u32_be()?),
            PrimFmt::U32Le => Value::U32(buffer.u32_le()?),
            PrimFmt::I32Be => Value::I32(buffer.i32_be()?),
            PrimFmt::I32Le => Value::I32(buffer.i32_le()?),
            PrimFmt::U64Be => Value::U64(buffer.u64_be()?),
            PrimFmt::U64Le => Value::U64(buffer.u64_le()?),
            PrimFmt::I64Be => Value::I64(buffer.i64_be()?),
            PrimFmt::I64Le => Value::I64(buffer.i64_le()?),
            PrimFmt::F32Be => Value::F32(buffer.f32_be()?),
            PrimFmt::F32Le => Value::F32(buffer.f32_le()?),
            PrimFmt::F64Be => Value::F64(buffer.f64_be()?),
            PrimFmt::F64Le => Value::F64(buffer.f64_le()?),
        })
    }

    pub fn read_array(self, buffer: &mut ReadBuffer, count: usize) -> Result<NumericArray> {
        macro_rules! fill {
            ($variant:ident, $read:ident) => {{
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push(buffer.$read()?);
                }
                NumericArray::$variant(out)
            }};
        }
        Ok(match self {
            PrimFmt::U8 => fill!(U8, u8),
            PrimFmt::I8 => fill!(I8, i8),
            PrimFmt::U16Be => fill!(U16, u16_be),
            PrimFmt::U16Le => fill!(U16, u16_le),
            PrimFmt::I16Be => fill!(I16, i16_be),
            PrimFmt::I16Le => fill!(I16, i16_le),
            PrimFmt::U32Be => fill!(U32, u32_be),
            PrimFmt::U32Le => fill!(U32, u32_le),
            PrimFmt::I32Be => fill!(I32, i32_be),
            PrimFmt::I32Le => fill!(I32, i32_le),
            PrimFmt::U64Be => fill!(U64, u64_be),
            PrimFmt::U64Le => fill!(U64, u64_le),
            PrimFmt::I64Be => fill!(I64, i64_be),
            PrimFmt::I64Le => fill!(I64, i64_le),
            PrimFmt::F32Be => fill!(F32, f32_be),
            PrimFmt::F32Le => fill!(F32, f32_le),
            PrimFmt::F64Be => fill!(F64, f64_be),
            PrimFmt::F64Le => fill!(F64, f64_le),
        })
    }
}

const K_BYTE_COUNT_MASK: u32 = 0x4000_0000;
const K_STREAMED_MEMBERWISE: u16 = 0x4000;

/// Per-field decoder. Codecs are values: container codecs capture their
/// element codec at registration time, and a type's decoder is the
/// concatenation of its field codecs in declaration order.
#[derive(Clone, Debug)]
pub enum Codec {
    /// Fixed-format primitive.
    Prim(PrimFmt),
    /// Present only when an earlier member has a flag bit set.
    Optional {
        fmt: PrimFmt,
        flag_field: &'static str,
        mask: u64,
    },
    /// Fixed-size homogeneous numeric array.
    FixedSizeArray { fmt: PrimFmt, len: usize },
    /// Big-endian i32 count followed by the elements.
    CArray(PrimFmt),
    /// Size taken from an earlier member, with an optional pad byte that
    /// must be 0x00 for an empty array and 0x01 otherwise.
    BasicArray {
        fmt: PrimFmt,
        size_field: &'static str,
        has_pad: bool,
    },
    /// std::vector<T>: stream header (outermost level only), count, items.
    Vector(Box<Codec>),
    /// std::map<K, V>: stream header, count, alternating keys and values.
    Map { key: Box<Codec>, value: Box<Codec> },
    Set(Box<Codec>),
    Deque(Box<Codec>),
    Pair { first: Box<Codec>, second: Box<Codec> },
    /// Pointer/reference member.
    ObjectPtr,
    /// Bit-packed double with title-derived range parameters.
    Double32(Double32),
    TString,
    /// Opaque fixed-width bytes.
    Raw(usize),
    /// Nested streamed object of a registered class.
    Object(&'static str),
    /// Escape hatch for layouts the declarative families cannot express.
    Custom(
        &'static str,
        fn(&str, &mut Members, &mut ReadBuffer) -> Result<()>,
    ),
}

impl Codec {
    pub fn read(
        &self,
        field: &str,
        members: &mut Members,
        buffer: &mut ReadBuffer,
        dict: &Dictionary,
        depth: usize,
    ) -> Result<()> {
        let value = match self {
            Codec::Prim(fmt) => fmt.read(buffer)?,
            Codec::Optional {
                fmt,
                flag_field,
                mask,
            } => {
                let flags = members.get_uint(flag_field).ok_or(RootError::Invalid {
                    what: "optional member flag field missing",
                    value: 0,
                })?;
                if flags & mask != 0 {
                    fmt.read(buffer)?
                } else {
                    Value::Absent
                }
            }
            Codec::FixedSizeArray { fmt, len } => Value::Array(fmt.read_array(buffer, *len)?),
            Codec::CArray(fmt) => {
                let count = buffer.i32_be()?;
                if count < 0 {
                    return Err(RootError::Invalid {
                        what: "negative array count",
                        value: count.into(),
                    }
                    .into());
                }
                Value::Array(fmt.read_array(buffer, count as usize)?)
            }
            Codec::BasicArray {
                fmt,
                size_field,
                has_pad,
            } => {
                let count = members.get_uint(size_field).ok_or(RootError::Invalid {
                    what: "array size field missing",
                    value: 0,
                })?;
                if *has_pad {
                    let pad = buffer.u8()?;
                    let ok = (count == 0 && pad == 0x00) || (count > 0 && pad == 0x01);
                    if !ok {
                        return Err(RootError::Invalid {
                            what: "array pad byte",
                            value: pad.into(),
                        }
                        .into());
                    }
                }
                Value::Array(fmt.read_array(buffer, count as usize)?)
            }
            Codec::Vector(inner) => read_vector(inner, buffer, dict, depth, true)?,
            Codec::Map { key, value } => {
                let header = StreamHeader::read(buffer)?;
                if let Some(version) = header.version {
                    if version & K_STREAMED_MEMBERWISE != 0 {
                        return Err(RootError::Unimplemented {
                            what: "memberwise std::map serialization",
                        }
                        .into());
                    }
                }
                let count = buffer.i32_be()?;
                if count < 0 {
                    return Err(RootError::Invalid {
                        what: "negative map count",
                        value: count.into(),
                    }
                    .into());
                }
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let k = read_element(key, buffer, dict, depth)?;
                    let v = read_element(value, buffer, dict, depth)?;
                    items.push((k, v));
                }
                Value::Map(items)
            }
            Codec::Set(_) => {
                return Err(RootError::Unimplemented {
                    what: "std::set decoding",
                }
                .into())
            }
            Codec::Deque(_) => {
                return Err(RootError::Unimplemented {
                    what: "std::deque decoding",
                }
                .into())
            }
            Codec::Pair { .. } => {
                return Err(RootError::Unimplemented {
                    what: "std::pair decoding",
                }
                .into())
            }
            Codec::ObjectPtr => Value::Ref(read_object_ref(buffer)?),
            Codec::Double32(packing) => packing.read(buffer)?,
            Codec::TString => Value::Str(TString::read(buffer)?),
            Codec::Raw(n) => Value::Bytes(buffer.consume(*n)?),
            Codec::Object(class) => Value::Object(dict.read_object_at(class, buffer, depth)?),
            Codec::Custom(_, read) => {
                read(field, members, buffer)?;
                return Ok(());
            }
        };
        members.insert(field, value);
        Ok(())
    }
}

fn read_vector(
    inner: &Codec,
    buffer: &mut ReadBuffer,
    dict: &Dictionary,
    depth: usize,
    outermost: bool,
) -> Result<Value> {
    if outermost {
        StreamHeader::read(buffer)?;
    }
    let count = buffer.i32_be()?;
    if count < 0 {
        return Err(RootError::Invalid {
            what: "negative vector count",
            value: count.into(),
        }
        .into());
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(read_element(inner, buffer, dict, depth)?);
    }
    Ok(Value::List(items))
}

/// Read a codec in element position (inside a container), where no member
/// context exists. Directly nested vectors suppress their stream header.
fn read_element(
    codec: &Codec,
    buffer: &mut ReadBuffer,
    dict: &Dictionary,
    depth: usize,
) -> Result<Value> {
    match codec {
        Codec::Prim(fmt) => fmt.read(buffer),
        Codec::TString => Ok(Value::Str(TString::read(buffer)?)),
        Codec::Double32(packing) => packing.read(buffer),
        Codec::ObjectPtr => Ok(Value::Ref(read_object_ref(buffer)?)),
        Codec::Raw(n) => Ok(Value::Bytes(buffer.consume(*n)?)),
        Codec::Vector(inner) => read_vector(inner, buffer, dict, depth, false),
        Codec::Object(class) => Ok(Value::Object(dict.read_object_at(class, buffer, depth)?)),
        _ => Err(RootError::Unimplemented {
            what: "codec family in container element position",
        }
        .into()),
    }
}

fn read_object_ref(buffer: &mut ReadBuffer) -> Result<ObjectRef> {
    let addr = buffer.i32_be()? as u32;
    if addr == 0 {
        return Ok(ObjectRef::Null);
    }
    if addr & K_BYTE_COUNT_MASK != 0 {
        // Inline object follows; it is skipped, not interpreted.
        let skipped = addr & !K_BYTE_COUNT_MASK;
        buffer.skip(skipped as usize)?;
        return Ok(ObjectRef::Inline { skipped });
    }
    // External address: not resolved here, callers see a null reference.
    Ok(ObjectRef::External { offset: addr })
}

/// Declared layout of a streamed class: ordered fields plus base classes
/// whose members are read depth-first before this class's own.
#[derive(Clone, Debug)]
pub struct TypeShape {
    pub class_name: &'static str,
    pub bases: Vec<&'static str>,
    pub fields: Vec<(&'static str, Codec)>,
}

#[derive(Clone, Debug)]
enum Step {
    /// Nested stream header announcing a base-class section.
    BaseHeader(String),
    Field(String, Codec),
}

#[derive(Debug)]
struct FlatShape {
    steps: Vec<Step>,
}

/// Observed prefix layouts of `ROOT::TIOFeatures` across corpora. The two
/// cannot be folded; pick per corpus or after version detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TIOFeaturesLayout {
    /// Four discard bytes, then the one-byte flag word.
    PrefixedDiscard,
    /// Flag word first; four extra bytes only when it is nonzero.
    TrailingWhenSet,
}

fn tio_features_prefixed(_field: &str, members: &mut Members, buffer: &mut ReadBuffer) -> Result<()> {
    buffer.skip(4)?;
    members.insert("fIOBits", Value::U8(buffer.u8()?));
    members.insert("extra", Value::Absent);
    Ok(())
}

fn tio_features_trailing(_field: &str, members: &mut Members, buffer: &mut ReadBuffer) -> Result<()> {
    let bits = buffer.u8()?;
    members.insert("fIOBits", Value::U8(bits));
    let extra = if bits > 0 {
        Value::I32(buffer.i32_be()?)
    } else {
        Value::Absent
    };
    members.insert("extra", extra);
    Ok(())
}

/// Registry of streamed-class decoders keyed by normalized class name.
/// Base-class chains are flattened into a single ordered step list at
/// registration, so reading never walks an inheritance graph.
#[derive(Debug, Default)]
pub struct Dictionary {
    shapes: HashMap<String, Rc<FlatShape>>,
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary::default()
    }

    /// Dictionary preloaded with the classes every ROOT file assumes.
    pub fn bootstrap(tio_layout: TIOFeaturesLayout) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.register(TypeShape {
            class_name: "TObject",
            bases: vec![],
            fields: vec![
                ("fVersion", Codec::Prim(PrimFmt::I16Be)),
                ("fUniqueID", Codec::Prim(PrimFmt::I32Be)),
                ("fBits", Codec::Prim(PrimFmt::I32Be)),
                (
                    "pidf",
                    Codec::Optional {
                        fmt: PrimFmt::U16Be,
                        flag_field: "fBits",
                        // kIsReferenced
                        mask: 0x10,
                    },
                ),
            ],
        })
        .expect("TObject has no bases");
        dict.register(TypeShape {
            class_name: "TNamed",
            bases: vec!["TObject"],
            fields: vec![("fName", Codec::TString), ("fTitle", Codec::TString)],
        })
        .expect("TObject is registered");
        dict.register(TypeShape {
            class_name: "TUUID",
            bases: vec![],
            fields: vec![
                ("fVersion", Codec::Prim(PrimFmt::I16Be)),
                ("fUUID", Codec::Raw(16)),
            ],
        })
        .expect("TUUID has no bases");
        let tio = match tio_layout {
            TIOFeaturesLayout::PrefixedDiscard => tio_features_prefixed,
            TIOFeaturesLayout::TrailingWhenSet => tio_features_trailing,
        };
        dict.register(TypeShape {
            class_name: "ROOT3a3aTIOFeatures",
            bases: vec![],
            fields: vec![("fIOBits", Codec::Custom("tio_features", tio))],
        })
        .expect("TIOFeatures has no bases");
        dict
    }

    pub fn register(&mut self, shape: TypeShape) -> Result<()> {
        let mut steps = Vec::new();
        for base in &shape.bases {
            let flat = self.shapes.get(*base).ok_or_else(|| RootError::UnknownClass {
                name: (*base).to_string(),
            })?;
            steps.push(Step::BaseHeader((*base).to_string()));
            steps.extend(flat.steps.iter().cloned());
        }
        for (name, codec) in &shape.fields {
            steps.push(Step::Field((*name).to_string(), codec.clone()));
        }
        self.shapes
            .insert(shape.class_name.to_string(), Rc::new(FlatShape { steps }));
        Ok(())
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.shapes.contains_key(class_name)
    }

    /// Read a streamed object of a known class from the buffer.
    pub fn read_object(&self, class_name: &str, buffer: &mut ReadBuffer) -> Result<DecodedObject> {
        self.read_object_at(class_name, buffer, 0)
    }

    /// Read a class appearing as a base section inside another object
    /// (nested: lenient end positions, bare-version TObject allowed).
    pub fn read_base(&self, class_name: &str, buffer: &mut ReadBuffer) -> Result<DecodedObject> {
        self.read_object_at(class_name, buffer, 1)
    }

    fn read_object_at(
        &self,
        class_name: &str,
        buffer: &mut ReadBuffer,
        depth: usize,
    ) -> Result<DecodedObject> {
        let shape = self
            .shapes
            .get(class_name)
            .ok_or_else(|| RootError::UnknownClass {
                name: class_name.to_string(),
            })?
            .clone();
        let start = buffer.relpos();
        let header = read_section_header(class_name, buffer, depth)?;
        check_header_class(&header, class_name)?;
        let end = start + u64::from(header.byte_count) + 4;
        let mut members = Members::default();
        for step in &shape.steps {
            match step {
                Step::BaseHeader(base) => {
                    let base_header = read_section_header(base, buffer, depth + 1)?;
                    check_header_class(&base_header, base)?;
                }
                Step::Field(name, codec) => {
                    codec.read(name, &mut members, buffer, self, depth + 1)?;
                }
            }
        }
        // Only the outermost object's end position is reliable; nested
        // sections are tolerated off-by (unexplained legacy behavior).
        if depth == 0 && buffer.relpos() != end {
            return Err(RootError::Corrupt {
                context: "streamed object end position",
                declared: end,
                observed: buffer.relpos(),
            }
            .into());
        }
        Ok(DecodedObject {
            class_name: class_name.to_string(),
            members,
        })
    }
}

/// TObject encountered as a nested base in early files has no stream
/// header, just a bare version word. The word is left in place for the
/// member reader; otherwise a full header is consumed.
fn read_section_header(
    class_name: &str,
    buffer: &mut ReadBuffer,
    depth: usize,
) -> Result<StreamHeader> {
    if class_name == "TObject" && depth > 0 {
        let version = buffer.peek_i16_be()?;
        if version < 0x40 {
            return Ok(StreamHeader {
                byte_count: 0,
                version: None,
                class_name: None,
                class_ref: None,
            });
        }
    }
    StreamHeader::read(buffer)
}

fn check_header_class(header: &StreamHeader, expected: &str) -> Result<()> {
    if let Some(name) = &header.class_name {
        if !name.is_empty() && normalize(name) != expected {
            return Err(RootError::UnknownClass {
                name: normalize(name),
            }
            .into());
        }
    }
    Ok(())
}
