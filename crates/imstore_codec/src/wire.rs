//! Checked big-endian reads over a byte slice.

use bytes::Buf;

use crate::error::{CodecError, CodecResult};

/// Cursor over a body slice. Every getter checks length first, so a short
/// input is an error rather than a panic inside `Buf`.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn ensure(&self, needed: usize) -> CodecResult<()> {
        if self.buf.len() < needed {
            return Err(CodecError::UnexpectedEof {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn i64(&mut self) -> CodecResult<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub(crate) fn i32(&mut self) -> CodecResult<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub(crate) fn i16(&mut self) -> CodecResult<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub(crate) fn u8(&mut self) -> CodecResult<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub(crate) fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub(crate) fn peek(&self) -> &'a [u8] {
        self.buf
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    pub(crate) fn utf8_rest(&mut self) -> CodecResult<String> {
        let rest = self.rest();
        String::from_utf8(rest.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Fails if any bytes are left unread.
    pub(crate) fn finish(self, cmd: u8) -> CodecResult<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(CodecError::TrailingBytes {
                cmd,
                extra: self.buf.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian() {
        let data = [0, 0, 0, 0, 0, 0, 1, 2, 0, 0, 0, 7, 0xff, 0xfe, 9];
        let mut r = Reader::new(&data);
        assert_eq!(r.i64().unwrap(), 0x0102);
        assert_eq!(r.i32().unwrap(), 7);
        assert_eq!(r.i16().unwrap(), -2);
        assert_eq!(r.u8().unwrap(), 9);
        assert!(r.finish(0).is_ok());
    }

    #[test]
    fn short_read_is_eof() {
        let mut r = Reader::new(&[1, 2, 3]);
        let err = r.i32().unwrap_err();
        assert_eq!(
            err,
            CodecError::UnexpectedEof {
                needed: 4,
                remaining: 3
            }
        );
        assert_eq!(r.remaining(), 3);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut r = Reader::new(&[0, 0, 0, 1, 5]);
        r.i32().unwrap();
        assert_eq!(
            r.finish(248).unwrap_err(),
            CodecError::TrailingBytes { cmd: 248, extra: 1 }
        );
    }
}
