use anyhow::Result;

use crate::rootfile::{buffer::ReadBuffer, RootError};

/// Read a record frame: positive signed 64-bit size, typed payload, then
/// any unknown trailing bytes up to the declared size. Returns the size,
/// the payload, and the unknown tail.
pub(crate) fn read_record_frame<T>(
    buffer: &mut ReadBuffer,
    read_payload: impl FnOnce(&mut ReadBuffer) -> Result<T>,
) -> Result<(u64, T, Vec<u8>)> {
    let start = buffer.relpos();
    let size = buffer.i64_le()?;
    if size <= 0 {
        return Err(RootError::Invalid {
            what: "record frame size must be positive",
            value: size,
        }
        .into());
    }
    let payload = read_payload(buffer)?;
    let unknown = consume_frame_tail(buffer, start, size as u64)?;
    Ok((size as u64, payload, unknown))
}

/// Read a list frame: negative signed 64-bit size whose magnitude is the
/// declared size, an item count, `count` items, then frame-specific extra
/// members, then the unknown tail.
pub(crate) fn read_list_frame<T, E>(
    buffer: &mut ReadBuffer,
    mut read_item: impl FnMut(&mut ReadBuffer) -> Result<T>,
    read_extra: impl FnOnce(&mut ReadBuffer) -> Result<E>,
) -> Result<(u64, Vec<T>, E, Vec<u8>)> {
    let start = buffer.relpos();
    let size = buffer.i64_le()?;
    if size >= 0 {
        return Err(RootError::Invalid {
            what: "list frame size must be negative",
            value: size,
        }
        .into());
    }
    let size = size.unsigned_abs();
    let count = buffer.u32_le()?;
    let mut items = Vec::with_capacity(count as usize);
    while items.len() < count as usize {
        items.push(read_item(buffer)?);
    }
    let extra = read_extra(buffer)?;
    let unknown = consume_frame_tail(buffer, start, size)?;
    Ok((size, items, extra, unknown))
}

/// Total bytes consumed (payload plus tail) must equal the declared size.
fn consume_frame_tail(buffer: &mut ReadBuffer, start: u64, size: u64) -> Result<Vec<u8>> {
    let consumed = buffer.relpos() - start;
    let Some(tail) = size.checked_sub(consumed) else {
        return Err(RootError::Corrupt {
            context: "frame payload overran declared size",
            declared: size,
            observed: consumed,
        }
        .into());
    };
    buffer.consume(tail as usize)
}

/// A plain list frame of homogeneous items.
#[derive(Clone, Debug, PartialEq)]
pub struct ListFrame<T> {
    pub size: u64,
    pub items: Vec<T>,
    pub unknown: Vec<u8>,
}

impl<T> ListFrame<T> {
    pub fn read_with(
        buffer: &mut ReadBuffer,
        read_item: impl FnMut(&mut ReadBuffer) -> Result<T>,
    ) -> Result<ListFrame<T>> {
        let (size, items, (), unknown) = read_list_frame(buffer, read_item, |_| Ok(()))?;
        Ok(ListFrame {
            size,
            items,
            unknown,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &'a ListFrame<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T> std::ops::Index<usize> for ListFrame<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}
