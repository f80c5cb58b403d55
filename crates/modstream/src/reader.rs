//! Sequential/seekable reader over an in-memory track.
//!
//! The data is shared (`Arc<[u8]>`), never copied. Unlike the classic
//! memory-reader callbacks, every access is bounds-checked: the offset can
//! never move past the end of the data, so `eof` is exact.

use std::io;
use std::sync::Arc;

use symphonia::core::io::MediaSource;

use crate::error::ReadError;

/// Origin for [`StreamReader::seek`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Whence {
    /// Offset from the start of the data.
    Set,
    /// Offset from the current position.
    Current,
}

/// Bounds-checked cursor over shared track bytes.
#[derive(Clone, Debug)]
pub struct StreamReader {
    data: Arc<[u8]>,
    offset: u64,
    read_chunk: Option<usize>,
}

impl StreamReader {
    pub fn new(data: Arc<[u8]>) -> Self {
        Self {
            data,
            offset: 0,
            read_chunk: None,
        }
    }

    /// Cap the number of bytes a single [`io::Read::read`] call hands out.
    ///
    /// Used to feed a streaming decoder in fixed-size chunks. Has no effect on
    /// [`StreamReader::read`] and [`StreamReader::read_exact`].
    pub fn with_read_chunk(mut self, chunk: usize) -> Self {
        self.read_chunk = Some(chunk.max(1));
        self
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn tell(&self) -> u64 {
        self.offset
    }

    /// `true` iff the offset sits exactly at the end of the data.
    pub fn eof(&self) -> bool {
        self.offset == self.len()
    }

    /// Move the cursor. Targets outside `0..=len` are rejected and leave it unchanged.
    pub fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, ReadError> {
        let base = match whence {
            Whence::Set => 0i64,
            Whence::Current => self.offset as i64,
        };
        let target = base.saturating_add(offset);
        if target < 0 || target as u64 > self.len() {
            return Err(ReadError::OutOfBounds {
                offset: target,
                len: self.len(),
            });
        }
        self.offset = target as u64;
        Ok(self.offset)
    }

    /// Copy up to `buf.len()` bytes; returns how many were copied (short at the end).
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let remaining = self.remaining();
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n as u64;
        n
    }

    /// Fill `buf` completely or fail without moving the cursor.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ReadError> {
        let got = self.remaining().len();
        if got < buf.len() {
            return Err(ReadError::ShortRead {
                wanted: buf.len(),
                got,
            });
        }
        self.read(buf);
        Ok(())
    }

    /// Next byte, or `None` at the end of the data.
    pub fn get_byte(&mut self) -> Option<u8> {
        let b = *self.remaining().first()?;
        self.offset += 1;
        Some(b)
    }

    pub fn read_u16_be(&mut self) -> Result<u16, ReadError> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    /// Borrow the next `n` bytes without copying.
    pub fn take_slice(&mut self, n: usize) -> Result<&[u8], ReadError> {
        let start = self.offset as usize;
        let got = self.data.len() - start;
        if got < n {
            return Err(ReadError::ShortRead { wanted: n, got });
        }
        self.offset += n as u64;
        Ok(&self.data[start..start + n])
    }

    /// Shared handle to the underlying bytes.
    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }

    fn remaining(&self) -> &[u8] {
        &self.data[self.offset as usize..]
    }
}

impl io::Read for StreamReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.read_chunk.unwrap_or(buf.len()).min(buf.len());
        Ok(StreamReader::read(self, &mut buf[..limit]))
    }
}

impl io::Seek for StreamReader {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let res = match pos {
            io::SeekFrom::Start(n) => {
                let n = i64::try_from(n).unwrap_or(i64::MAX);
                StreamReader::seek(self, n, Whence::Set)
            }
            io::SeekFrom::Current(n) => StreamReader::seek(self, n, Whence::Current),
            io::SeekFrom::End(n) => {
                StreamReader::seek(self, self.len() as i64 + n, Whence::Set)
            }
        };
        res.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }
}

impl MediaSource for StreamReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.len())
    }
}
