use crate::errors::FormatError;
use byteorder::{BigEndian, WriteBytesExt};
use std::io;

/// Utility trait for serializing data inside class files
///
/// Java class files have some peculiarities that make it useful to define an extra trait (instead
/// of just using `serde`):
///
///   - tags are always `u8`
///   - when serializing a sequence, the length of the sequence is usually `u16`
///
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u16::<BigEndian>(*self)
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(*self)
    }
}

impl Serialize for i8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i8(*self)
    }
}

impl Serialize for i16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i16::<BigEndian>(*self)
    }
}

impl Serialize for i32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i32::<BigEndian>(*self)
    }
}

impl Serialize for i64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_i64::<BigEndian>(*self)
    }
}

impl Serialize for f32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_f32::<BigEndian>(*self)
    }
}

impl Serialize for f64 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_f64::<BigEndian>(*self)
    }
}

/// Size in `u16` is the first thing serialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> io::Result<()> {
        (self.len() as u16).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

/// The single mutable read cursor over a classfile byte buffer
///
/// All multi-byte reads are big-endian. The cursor tracks its absolute position so callers can
/// save and restore it (eg. around attributes that end up being skipped) and so error messages
/// can point at the offending offset.
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> ByteCursor<'a> {
        ByteCursor { bytes, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Restore a position previously obtained from `position`
    pub fn set_position(&mut self, position: usize) {
        debug_assert!(position <= self.bytes.len());
        self.position = position;
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    fn truncated(&self, wanted: usize) -> FormatError {
        FormatError::Truncated {
            offset: self.position,
            wanted,
        }
    }

    /// Take the next `count` bytes without copying them
    pub fn take(&mut self, count: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < count {
            return Err(self.truncated(count - self.remaining()));
        }
        let slice = &self.bytes[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), FormatError> {
        self.take(count).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FormatError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, FormatError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn i8(&mut self) -> Result<i8, FormatError> {
        Ok(self.u8()? as i8)
    }

    pub fn i16(&mut self) -> Result<i16, FormatError> {
        Ok(self.u16()? as i16)
    }

    pub fn i32(&mut self) -> Result<i32, FormatError> {
        Ok(self.u32()? as i32)
    }

    pub fn i64(&mut self) -> Result<i64, FormatError> {
        let hi = self.u32()? as u64;
        let lo = self.u32()? as u64;
        Ok(((hi << 32) | lo) as i64)
    }

    pub fn f32(&mut self) -> Result<f32, FormatError> {
        Ok(f32::from_bits(self.u32()?))
    }

    pub fn f64(&mut self) -> Result<f64, FormatError> {
        Ok(f64::from_bits(self.i64()? as u64))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cursor_reads_big_endian() {
        let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34];
        let mut cursor = ByteCursor::new(&bytes);
        assert_eq!(cursor.u32().unwrap(), 0xCAFEBABE);
        assert_eq!(cursor.u16().unwrap(), 0x34);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn cursor_save_restore() {
        let bytes = [1, 2, 3, 4];
        let mut cursor = ByteCursor::new(&bytes);
        cursor.u8().unwrap();
        let saved = cursor.position();
        cursor.u16().unwrap();
        cursor.set_position(saved);
        assert_eq!(cursor.u8().unwrap(), 2);
    }

    #[test]
    fn cursor_reports_truncation_offset() {
        let bytes = [0u8; 3];
        let mut cursor = ByteCursor::new(&bytes);
        cursor.u16().unwrap();
        match cursor.u32() {
            Err(FormatError::Truncated { offset: 2, wanted: 3 }) => {}
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
