//! Bounds-checked little-endian cursor over serialized policy bytes.

use bytes::Buf;

use crate::{PolicyDbError, Result};

/// Reads fixed-width little-endian fields, failing instead of panicking on short input.
#[derive(Debug, Clone)]
pub struct PolicyReader<'a> {
    buf: &'a [u8],
}

impl<'a> PolicyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(PolicyDbError::UnexpectedEof {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.buf.get_u64_le())
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_fields() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0xaa];
        let mut reader = PolicyReader::new(&data);
        assert_eq!(reader.read_u32().unwrap(), 0x0403_0201);
        assert_eq!(reader.read_u8().unwrap(), 0x05);
        assert_eq!(reader.remaining(), 1);
    }

    #[test]
    fn short_input_is_an_error() {
        let mut reader = PolicyReader::new(&[0x01, 0x02]);
        assert_eq!(
            reader.read_u32(),
            Err(PolicyDbError::UnexpectedEof {
                needed: 4,
                remaining: 2
            })
        );
    }
}
