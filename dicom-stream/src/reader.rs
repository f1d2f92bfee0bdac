use std::io::{self, Read};

use crate::error::ParseError;

const MAX_PREALLOC: usize = 64 * 1024;

/// Little endian reader that tracks the stream offset.
pub(crate) struct ByteReader<R> {
    inner: R,
    pos: u64,
}

impl<R: Read> ByteReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, pos: 0 }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    fn map_err(&self, e: io::Error) -> ParseError {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ParseError::UnexpectedEof { offset: self.pos }
        } else {
            ParseError::Io {
                offset: self.pos,
                source: e,
            }
        }
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ParseError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Err(ParseError::UnexpectedEof { offset: self.pos }),
                Ok(n) => {
                    filled += n;
                    self.pos += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.map_err(e)),
            }
        }
        Ok(())
    }

    /// Like `read_exact`, but a clean end of input before the first byte
    /// returns `Ok(false)`.
    pub fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> Result<bool, ParseError> {
        loop {
            match self.inner.read(buf) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.pos += n as u64;
                    if n < buf.len() {
                        self.read_exact(&mut buf[n..])?;
                    }
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(self.map_err(e)),
            }
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, ParseError> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParseError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    /// Reads `len` bytes without trusting `len` for the allocation size.
    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>, ParseError> {
        let mut buf = Vec::with_capacity(len.min(MAX_PREALLOC));
        let result = (&mut self.inner).take(len as u64).read_to_end(&mut buf);
        let read = result.map_err(|e| self.map_err(e))?;
        self.pos += read as u64;
        if read < len {
            return Err(ParseError::UnexpectedEof { offset: self.pos });
        }
        Ok(buf)
    }

    pub fn skip(&mut self, len: u64) -> Result<(), ParseError> {
        let result = io::copy(&mut (&mut self.inner).take(len), &mut io::sink());
        let copied = result.map_err(|e| self.map_err(e))?;
        self.pos += copied;
        if copied < len {
            return Err(ParseError::UnexpectedEof { offset: self.pos });
        }
        Ok(())
    }
}
