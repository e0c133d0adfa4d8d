//! Byte cursor over a decompressed chunk
//!
//! Fixed-width values are little-endian and read by plain byte copy.
//! Every read is bounds-checked; running off the end of a chunk is a
//! [`FormatError::UnexpectedEof`].

use std::io;

use crate::core::error::FormatError;
use crate::core::types::{Vec3, Vec4};

type ReadResult<T> = std::result::Result<T, FormatError>;

/// Forward-only reader over a byte slice.
#[derive(Debug)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Borrow the next `len` bytes and advance past them.
    pub fn take(&mut self, len: usize) -> ReadResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(FormatError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> ReadResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> ReadResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> ReadResult<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> ReadResult<i32> {
        self.array().map(i32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> ReadResult<u64> {
        self.array().map(u64::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> ReadResult<f32> {
        self.array().map(f32::from_le_bytes)
    }

    pub fn read_vec3(&mut self) -> ReadResult<Vec3> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vec4(&mut self) -> ReadResult<Vec4> {
        Ok(Vec4::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    /// u32 length followed by raw bytes. No terminator; invalid UTF-8 is
    /// replaced rather than rejected.
    pub fn read_string(&mut self) -> ReadResult<String> {
        let len = self.read_u32()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// `count` elements of `width` bytes each, as one slice.
    pub fn take_elements(&mut self, count: u32, width: usize) -> ReadResult<&'a [u8]> {
        let len = (count as usize).checked_mul(width).ok_or(FormatError::UnexpectedEof {
            needed: usize::MAX,
            remaining: self.remaining(),
        })?;
        self.take(len)
    }
}

/// Pull interface for codecs that decode straight from the chunk.
impl io::Read for ByteCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
