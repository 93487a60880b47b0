//! Little-endian byte cursor over an executable image.
//!
//! Header records are decoded field by field through this cursor rather
//! than by reinterpreting memory, which keeps the layout explicit and
//! independent of host alignment and endianness.

use std::io::{Read, Seek, SeekFrom};

use uuid::Uuid;

use crate::error::SymgrabError;

/// A positioned reader for fixed-layout executable records.
pub struct RecordReader<R> {
    inner: R,
}

impl<R: Read + Seek> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Current absolute offset in the underlying stream.
    pub fn position(&mut self) -> Result<u64, SymgrabError> {
        Ok(self.inner.stream_position()?)
    }

    /// Seek to an absolute offset.
    pub fn seek_to(&mut self, offset: u64) -> Result<(), SymgrabError> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Skip forward over `count` bytes.
    pub fn skip(&mut self, count: i64) -> Result<(), SymgrabError> {
        self.inner.seek(SeekFrom::Current(count))?;
        Ok(())
    }

    /// Read a u16 value (little-endian).
    pub fn read_u16(&mut self) -> Result<u16, SymgrabError> {
        let mut buf = [0u8; 2];
        self.inner.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32, SymgrabError> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a fixed-size byte array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SymgrabError> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read a Windows GUID: u32/u16/u16 little-endian fields followed by
    /// eight raw bytes.
    pub fn read_guid(&mut self) -> Result<Uuid, SymgrabError> {
        let d1 = self.read_u32()?;
        let d2 = self.read_u16()?;
        let d3 = self.read_u16()?;
        let d4: [u8; 8] = self.read_array()?;
        Ok(Uuid::from_fields(d1, d2, d3, &d4))
    }

    /// Read a fixed-length buffer holding a NUL-terminated string.
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String, SymgrabError> {
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_little_endian_scalars() {
        let data = [0x4C, 0x01, 0x78, 0x56, 0x34, 0x12];
        let mut reader = RecordReader::new(Cursor::new(data));
        assert_eq!(reader.read_u16().unwrap(), 0x014C);
        assert_eq!(reader.read_u32().unwrap(), 0x1234_5678);
    }

    #[test]
    fn reads_guid_in_windows_field_order() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x4433_2211u32.to_le_bytes());
        data.extend_from_slice(&0x6655u16.to_le_bytes());
        data.extend_from_slice(&0x8877u16.to_le_bytes());
        data.extend_from_slice(&[0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00]);
        let mut reader = RecordReader::new(Cursor::new(data));
        let guid = reader.read_guid().unwrap();
        assert_eq!(
            guid,
            Uuid::parse_str("44332211-6655-8877-99aa-bbccddeeff00").unwrap()
        );
    }

    #[test]
    fn fixed_string_stops_at_nul() {
        let data = b"ntdll.pdb\0garbage\0";
        let mut reader = RecordReader::new(Cursor::new(data));
        assert_eq!(reader.read_fixed_string(data.len()).unwrap(), "ntdll.pdb");
    }

    #[test]
    fn fixed_string_without_nul_keeps_full_buffer() {
        let data = b"abcd";
        let mut reader = RecordReader::new(Cursor::new(data));
        assert_eq!(reader.read_fixed_string(4).unwrap(), "abcd");
    }

    #[test]
    fn seek_and_position_round_trip() {
        let data = [0u8; 32];
        let mut reader = RecordReader::new(Cursor::new(data));
        reader.seek_to(0x10).unwrap();
        assert_eq!(reader.position().unwrap(), 0x10);
        reader.skip(4).unwrap();
        assert_eq!(reader.position().unwrap(), 0x14);
    }

    #[test]
    fn short_read_is_an_io_error() {
        let data = [0x01];
        let mut reader = RecordReader::new(Cursor::new(data));
        assert!(matches!(reader.read_u32(), Err(SymgrabError::Io(_))));
    }
}
