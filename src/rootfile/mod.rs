pub mod buffer;
pub mod codec;
pub mod compression;
pub mod rntuple;
pub mod streamed;
pub mod string;
pub mod tdirectory;
pub mod tfile;
pub mod tkey;

use std::{
    error::Error,
    fmt::{Debug, Display},
};

/// Structured failure raised by the deserialization engine.
///
/// Every variant carries enough context to point at the offending bytes:
/// the relative position where known, and the declared vs. observed sizes
/// for framing mismatches. No reader attempts local recovery; errors
/// propagate to the top-level call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RootError {
    /// Fewer bytes available than the read required.
    Truncated {
        needed: usize,
        remaining: usize,
        relpos: u64,
    },
    /// A value outside its domain (zero frame size, bad pad byte, ...).
    Invalid { what: &'static str, value: i64 },
    /// Declared length disagrees with observed length, or a checksum or
    /// type tag does not match what the enclosing structure promised.
    Corrupt {
        context: &'static str,
        declared: u64,
        observed: u64,
    },
    /// A feature-flag bit this reader does not know about is set.
    UnknownFeature { flags: u64 },
    UnknownLocatorType { tag: u8 },
    UnknownEnvelopeType { type_id: u16 },
    UnknownClass { name: String },
    /// Recognized on the wire but not decoded by this implementation.
    Unimplemented { what: &'static str },
    /// A registered decompressor failed or no codec is registered for the
    /// compression tag found on disk.
    CodecError { context: &'static str },
}

impl Display for RootError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for RootError {}
