use std::ops::Deref;

use bytes::{Bytes, BytesMut};

/// A capacity-bounded output buffer for composition data pages.
///
/// Writes past the limit are truncated, never rejected: the caller learns
/// how much fit from [`len`](Self::len).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBuf {
    data: BytesMut,
    limit: usize,
}

impl PageBuf {
    /// A buffer that accepts at most `limit` bytes.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(limit.min(4096)),
            limit,
        }
    }

    /// A buffer without a size limit.
    pub fn unbounded() -> Self {
        Self {
            data: BytesMut::new(),
            limit: usize::MAX,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Remaining capacity.
    pub fn tailroom(&self) -> usize {
        self.limit - self.data.len()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Append as much of `data` as fits. Returns the number of bytes written.
    pub fn put_slice(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.tailroom());
        self.data.extend_from_slice(&data[..n]);
        n
    }

    /// Append `data` to a stream being read from byte `*offset`.
    ///
    /// If the whole item lies before the offset, it is skipped and the offset
    /// is reduced by its size. Otherwise the item is written from its
    /// internal offset (truncated to the tailroom) and the offset becomes 0.
    /// Returns the buffer position of the first written byte, if any.
    pub fn put_slice_offset(&mut self, data: &[u8], offset: &mut usize) -> Option<usize> {
        if *offset >= data.len() {
            *offset -= data.len();
            return None;
        }

        let start = *offset;
        *offset = 0;

        let pos = self.data.len();
        (self.put_slice(&data[start..]) > 0).then_some(pos)
    }

    pub fn put_u8_offset(&mut self, val: u8, offset: &mut usize) -> Option<usize> {
        self.put_slice_offset(&[val], offset)
    }

    pub fn put_u16_le_offset(&mut self, val: u16, offset: &mut usize) -> Option<usize> {
        self.put_slice_offset(&val.to_le_bytes(), offset)
    }
}

impl Deref for PageBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for PageBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
