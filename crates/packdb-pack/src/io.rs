//! Positioned reads over memory-mapped files.

use std::io::{self, Read};

use memmap2::Mmap;

/// Positioned reads over an immutable byte source.
///
/// One reader is shared between a pack, its index, and every chain resolved
/// from them, potentially across threads; implementations must tolerate
/// concurrent overlapping reads. Memory maps satisfy this trivially, and so
/// do plain byte buffers.
pub trait ReadAt: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes read. An offset at or past the end reads 0 bytes.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Total length of the underlying source in bytes.
    fn size(&self) -> u64;

    /// Fill `buf` entirely from `offset`, failing on a short read.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            let n = self.read_at(offset, buf)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("unexpected end of file at offset {offset}"),
                ));
            }
            let rest = buf;
            buf = &mut rest[n..];
            offset += n as u64;
        }
        Ok(())
    }

    /// Read a single byte at `offset`.
    fn read_byte_at(&self, offset: u64) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf[0])
    }

    /// Read a big-endian `u32` at `offset`.
    fn read_u32_be(&self, offset: u64) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Read a big-endian `u64` at `offset`.
    fn read_u64_be(&self, offset: u64) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }
}

fn slice_read_at(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    if offset >= data.len() as u64 {
        return 0;
    }
    let start = offset as usize;
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    n
}

impl ReadAt for Mmap {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(slice_read_at(self, offset, buf))
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        Ok(slice_read_at(self, offset, buf))
    }

    fn size(&self) -> u64 {
        self.len() as u64
    }
}

/// Streaming `Read` view into a [`ReadAt`] source, starting at a fixed
/// offset and advancing an internal cursor.
///
/// Feeds the zlib decoder, which consumes a forward-only stream.
pub struct StreamReader<'a> {
    reader: &'a dyn ReadAt,
    pos: u64,
}

impl<'a> StreamReader<'a> {
    pub fn new(reader: &'a dyn ReadAt, offset: u64) -> Self {
        Self { reader, pos: offset }
    }

    /// Current absolute position in the underlying source.
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl Read for StreamReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.reader.read_at(self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}
