use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::Debug,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
    rc::Rc,
};

use anyhow::{anyhow, Context, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use pretty_hex::pretty_hex;

use crate::rootfile::RootError;

/// Class-name strings registered while reading stream headers, keyed by the
/// relative position of their first occurrence. The table belongs to the
/// top-level buffer of a TKey payload and is shared by every slice taken
/// from it, so back-references resolve across nested reads.
pub type LocalRefs = Rc<RefCell<HashMap<u64, Vec<u8>>>>;

/// A positional view over a byte range.
///
/// `abspos` is the absolute file offset of the current position, when the
/// bytes still correspond to a file location (`None` after decompression).
/// `relpos` counts from the start of the enclosing record (for TKey bodies,
/// from the start of the TKey). Reads advance both; slices share the backing
/// allocation and the local-refs table. The payload is never reallocated.
#[derive(Clone)]
pub struct ReadBuffer {
    data: Rc<[u8]>,
    pos: usize,
    end: usize,
    abspos: Option<u64>,
    relpos: u64,
    local_refs: LocalRefs,
}

impl ReadBuffer {
    pub fn new(data: impl Into<Rc<[u8]>>, abspos: Option<u64>, relpos: u64) -> ReadBuffer {
        let data = data.into();
        let end = data.len();
        ReadBuffer {
            data,
            pos: 0,
            end,
            abspos,
            relpos,
            local_refs: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.end
    }

    pub fn relpos(&self) -> u64 {
        self.relpos
    }

    pub fn abspos(&self) -> Option<u64> {
        self.abspos
    }

    fn chunk(&self, n: usize) -> Result<&[u8]> {
        if self.len() < n {
            return Err(RootError::Truncated {
                needed: n,
                remaining: self.len(),
                relpos: self.relpos,
            }
            .into());
        }
        Ok(&self.data[self.pos..self.pos + n])
    }

    /// Bounds must have been checked by `chunk` first.
    fn advance(&mut self, n: usize) {
        debug_assert!(self.pos + n <= self.end);
        self.pos += n;
        self.relpos += n as u64;
        self.abspos = self.abspos.map(|a| a + n as u64);
    }

    /// Skip `n` bytes without copying them.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.chunk(n)?;
        self.advance(n);
        Ok(())
    }

    /// Consume `n` bytes, returning a copy.
    pub fn consume(&mut self, n: usize) -> Result<Vec<u8>> {
        let out = self.chunk(n)?.to_vec();
        self.advance(n);
        Ok(out)
    }

    /// Split off a buffer over the next `n` bytes, advancing this one past
    /// them. The backing bytes and local-refs table are shared.
    pub fn split_prefix(&mut self, n: usize) -> Result<ReadBuffer> {
        self.chunk(n)?;
        let sub = ReadBuffer {
            data: Rc::clone(&self.data),
            pos: self.pos,
            end: self.pos + n,
            abspos: self.abspos,
            relpos: self.relpos,
            local_refs: Rc::clone(&self.local_refs),
        };
        self.advance(n);
        Ok(sub)
    }

    pub fn u8(&mut self) -> Result<u8> {
        let v = self.chunk(1)?[0];
        self.advance(1);
        Ok(v)
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        let v = BigEndian::read_u16(self.chunk(2)?);
        self.advance(2);
        Ok(v)
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        let v = LittleEndian::read_u16(self.chunk(2)?);
        self.advance(2);
        Ok(v)
    }

    pub fn i16_be(&mut self) -> Result<i16> {
        Ok(self.u16_be()? as i16)
    }

    pub fn i16_le(&mut self) -> Result<i16> {
        Ok(self.u16_le()? as i16)
    }

    pub fn u32_be(&mut self) -> Result<u32> {
        let v = BigEndian::read_u32(self.chunk(4)?);
        self.advance(4);
        Ok(v)
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        let v = LittleEndian::read_u32(self.chunk(4)?);
        self.advance(4);
        Ok(v)
    }

    pub fn i32_be(&mut self) -> Result<i32> {
        Ok(self.u32_be()? as i32)
    }

    pub fn i32_le(&mut self) -> Result<i32> {
        Ok(self.u32_le()? as i32)
    }

    pub fn u64_be(&mut self) -> Result<u64> {
        let v = BigEndian::read_u64(self.chunk(8)?);
        self.advance(8);
        Ok(v)
    }

    pub fn u64_le(&mut self) -> Result<u64> {
        let v = LittleEndian::read_u64(self.chunk(8)?);
        self.advance(8);
        Ok(v)
    }

    pub fn i64_be(&mut self) -> Result<i64> {
        Ok(self.u64_be()? as i64)
    }

    pub fn i64_le(&mut self) -> Result<i64> {
        Ok(self.u64_le()? as i64)
    }

    pub fn f32_be(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32_be()?))
    }

    pub fn f32_le(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32_le()?))
    }

    pub fn f64_be(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64_be()?))
    }

    pub fn f64_le(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.u64_le()?))
    }

    pub fn peek_i32_be(&self) -> Result<i32> {
        Ok(BigEndian::read_i32(self.chunk(4)?))
    }

    pub fn peek_i16_be(&self) -> Result<i16> {
        Ok(BigEndian::read_i16(self.chunk(2)?))
    }

    pub fn peek_u64_le(&self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.chunk(8)?))
    }

    pub fn peek_i64_le(&self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.chunk(8)?))
    }

    /// NUL-terminated byte string; the terminator is consumed but not
    /// returned.
    pub fn cstring(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let c = self.u8()?;
            if c == 0 {
                return Ok(out);
            }
            out.push(c);
        }
    }

    pub fn register_local_ref(&mut self, relpos: u64, name: &[u8]) {
        self.local_refs.borrow_mut().insert(relpos, name.to_vec());
    }

    pub fn local_ref(&self, relpos: u64) -> Option<Vec<u8>> {
        self.local_refs.borrow().get(&relpos).cloned()
    }
}

impl Debug for ReadBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let window = &self.data[self.pos..self.end.min(self.pos + 256)];
        write!(
            f,
            "ReadBuffer size {} at abspos={:?}, relpos={}\nlocal_refs: {:?}\n{}",
            self.len(),
            self.abspos,
            self.relpos,
            self.local_refs.borrow(),
            pretty_hex(&window),
        )
    }
}

/// Types that read themselves from the front of a buffer, consuming
/// exactly the bytes they describe.
pub trait RootRead: Sized {
    fn read(buffer: &mut ReadBuffer) -> Result<Self>;
}

/// Random-access byte-range fetch: must return exactly `length` bytes
/// positioned with `abspos = offset`, `relpos = 0`. Short reads and I/O
/// failures surface as errors.
pub trait DataFetch {
    fn fetch(&self, offset: u64, length: u64) -> Result<ReadBuffer>;
}

impl<F> DataFetch for F
where
    F: Fn(u64, u64) -> Result<ReadBuffer>,
{
    fn fetch(&self, offset: u64, length: u64) -> Result<ReadBuffer> {
        self(offset, length)
    }
}

/// Fetch over an in-memory file image. Slices share the image allocation.
pub struct SliceFetch {
    data: Rc<[u8]>,
}

impl SliceFetch {
    pub fn new(data: impl Into<Rc<[u8]>>) -> SliceFetch {
        SliceFetch { data: data.into() }
    }
}

impl DataFetch for SliceFetch {
    fn fetch(&self, offset: u64, length: u64) -> Result<ReadBuffer> {
        let start = usize::try_from(offset).context("offset out of addressable range")?;
        let len = usize::try_from(length).context("length out of addressable range")?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                anyhow!(
                    "byte range {}..{} outside image of {} bytes",
                    offset,
                    offset + length,
                    self.data.len()
                )
            })?;
        let mut buffer = ReadBuffer::new(Rc::clone(&self.data), Some(0), 0);
        buffer.pos = start;
        buffer.end = end;
        buffer.abspos = Some(offset);
        Ok(buffer)
    }
}

/// Fetch backed by a seekable file handle.
pub struct FileFetch {
    file: RefCell<File>,
}

impl FileFetch {
    pub fn open(path: impl AsRef<Path>) -> Result<FileFetch> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("opening {}", path.as_ref().display()))?;
        Ok(FileFetch {
            file: RefCell::new(file),
        })
    }
}

impl DataFetch for FileFetch {
    fn fetch(&self, offset: u64, length: u64) -> Result<ReadBuffer> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; usize::try_from(length)?];
        file.read_exact(&mut data)
            .with_context(|| format!("short read of {length} bytes at offset {offset}"))?;
        Ok(ReadBuffer::new(data, Some(offset), 0))
    }
}

/// Fetch over a memory-mapped file.
pub struct MmapFetch {
    map: memmap2::Mmap,
}

impl MmapFetch {
    pub fn open(path: impl AsRef<Path>) -> Result<MmapFetch> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("opening {}", path.as_ref().display()))?;
        // Safety: the map is private and read-only.
        let map = unsafe { memmap2::Mmap::map(&file)? };
        Ok(MmapFetch { map })
    }
}

impl DataFetch for MmapFetch {
    fn fetch(&self, offset: u64, length: u64) -> Result<ReadBuffer> {
        let start = usize::try_from(offset)?;
        let end = start
            .checked_add(usize::try_from(length)?)
            .filter(|end| *end <= self.map.len())
            .ok_or_else(|| anyhow!("byte range {offset}+{length} outside mapped file"))?;
        Ok(ReadBuffer::new(&self.map[start..end], Some(offset), 0))
    }
}
