//! Little-endian read/write cursor over a growable byte buffer.
//!
//! Every wire structure in PTP (container headers, datasets, property
//! values) is built and parsed through [`PtpCursor`]. Reads and writes share
//! one offset; writes past the end grow the buffer, reads past the end fail
//! with [`PtpError::OutOfRange`].

use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDateTime;

use crate::error::{PtpError, Result};

/// Format of `YYYYMMDDThhmmss`, the fixed prefix of every PTP date/time.
const DATE_TIME_FORMAT: &str = "%Y%m%dT%H%M%S";
const DATE_TIME_LEN: usize = 15;

#[derive(Debug, Clone, Default)]
pub struct PtpCursor {
    buf: Vec<u8>,
    offset: usize,
    /// High-water mark of written bytes.
    written: usize,
}

impl PtpCursor {
    /// Empty cursor for building a packet.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            offset: 0,
            written: 0,
        }
    }

    /// Cursor positioned at the start of existing bytes, for parsing.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let buf = bytes.into();
        let written = buf.len();
        Self {
            buf,
            offset: 0,
            written,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes left between the cursor and the end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.offset)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.check(n)?;
        self.offset += n;
        Ok(())
    }

    pub fn goto_offset(&mut self, offset: usize) -> Result<()> {
        if offset > self.buf.len() {
            return Err(PtpError::OutOfRange {
                offset,
                requested: 0,
                len: self.buf.len(),
            });
        }
        self.offset = offset;
        Ok(())
    }

    fn check(&self, n: usize) -> Result<()> {
        if self.offset.checked_add(n).is_none_or(|end| end > self.buf.len()) {
            return Err(PtpError::OutOfRange {
                offset: self.offset,
                requested: n,
                len: self.buf.len(),
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        self.check(n)?;
        let start = self.offset;
        self.offset += n;
        Ok(&self.buf[start..start + n])
    }

    // ------------------------------------------------------------------
    // Scalar reads
    // ------------------------------------------------------------------

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    /// Raw bytes at the cursor.
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// PTP array: u32 element count followed by the elements.
    pub fn read_array_of<T>(
        &mut self,
        mut read_element: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let count = self.read_u32()? as usize;
        // Never trust the count for the allocation; a bogus prefix fails on read.
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(read_element(self)?);
        }
        Ok(items)
    }

    // ------------------------------------------------------------------
    // Strings
    // ------------------------------------------------------------------

    pub fn read_nul_terminated_ascii_string(&mut self) -> Result<String> {
        let rest = &self.buf[self.offset.min(self.buf.len())..];
        let (text, consumed) = match rest.iter().position(|&b| b == 0) {
            Some(nul) => (&rest[..nul], nul + 1),
            None => (rest, rest.len()),
        };
        let s = text.iter().map(|&b| b as char).collect();
        self.offset += consumed;
        Ok(s)
    }

    /// PTP string: u8 character count (terminator included), then UTF-16LE.
    pub fn read_ptp_string(&mut self) -> Result<String> {
        let count = self.read_u8()? as usize;
        if count == 0 {
            return Ok(String::new());
        }
        let start = self.offset;
        self.check((count - 1) * 2)?;
        let units: Vec<u16> = self.buf[start..start + (count - 1) * 2]
            .chunks_exact(2)
            .map(LittleEndian::read_u16)
            .take_while(|&u| u != 0)
            .collect();
        // The terminator slot (and any padding) is skipped even when the
        // buffer ends right after the characters.
        self.offset = start + count * 2;
        Ok(String::from_utf16_lossy(&units))
    }

    pub fn read_nul_terminated_utf16_string(&mut self) -> Result<String> {
        self.skip(2)?;
        let mut units = Vec::new();
        while self.remaining() >= 2 {
            let unit = self.read_u16()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        Ok(String::from_utf16_lossy(&units))
    }

    /// PTP date/time string; fractional seconds and zone suffixes are ignored.
    pub fn read_date_time(&mut self) -> Result<NaiveDateTime> {
        let s = self.read_ptp_string()?;
        let stamp = s
            .get(..DATE_TIME_LEN)
            .ok_or_else(|| PtpError::InvalidDateTime(s.clone()))?;
        NaiveDateTime::parse_from_str(stamp, DATE_TIME_FORMAT)
            .map_err(|_| PtpError::InvalidDateTime(s.clone()))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    fn reserve_write(&mut self, n: usize) -> &mut [u8] {
        let end = self.offset + n;
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        let start = self.offset;
        self.offset = end;
        self.written = self.written.max(end);
        &mut self.buf[start..end]
    }

    pub fn write_u8(&mut self, v: u8) {
        self.reserve_write(1)[0] = v;
    }

    pub fn write_i8(&mut self, v: i8) {
        self.write_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        LittleEndian::write_u16(self.reserve_write(2), v);
    }

    pub fn write_i16(&mut self, v: i16) {
        LittleEndian::write_i16(self.reserve_write(2), v);
    }

    pub fn write_u32(&mut self, v: u32) {
        LittleEndian::write_u32(self.reserve_write(4), v);
    }

    pub fn write_i32(&mut self, v: i32) {
        LittleEndian::write_i32(self.reserve_write(4), v);
    }

    pub fn write_u64(&mut self, v: u64) {
        LittleEndian::write_u64(self.reserve_write(8), v);
    }

    pub fn write_i64(&mut self, v: i64) {
        LittleEndian::write_i64(self.reserve_write(8), v);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.reserve_write(bytes.len()).copy_from_slice(bytes);
    }

    pub fn write_array_of<T>(&mut self, items: &[T], mut write_element: impl FnMut(&mut Self, &T)) {
        self.write_u32(items.len() as u32);
        for item in items {
            write_element(self, item);
        }
    }

    /// Inverse of [`read_ptp_string`](Self::read_ptp_string). Strings longer
    /// than 254 code units are truncated.
    pub fn write_ptp_string(&mut self, s: &str) {
        if s.is_empty() {
            self.write_u8(0);
            return;
        }
        let units: Vec<u16> = s.encode_utf16().take(254).collect();
        self.write_u8((units.len() + 1) as u8);
        for unit in units {
            self.write_u16(unit);
        }
        self.write_u16(0);
    }

    pub fn write_date_time(&mut self, dt: &NaiveDateTime) {
        self.write_ptp_string(&dt.format(DATE_TIME_FORMAT).to_string());
    }

    /// Append the CheckSum8 (modulo 0xFF) of every byte written so far.
    pub fn compute_and_append_checksum(&mut self) {
        let sum = self.buf[..self.written]
            .iter()
            .fold(0u32, |acc, &b| (acc + b as u32) % 0xFF);
        self.offset = self.written;
        self.write_u8(sum as u8);
    }

    /// Written bytes, without any over-allocated tail.
    pub fn finalize(mut self) -> Vec<u8> {
        self.buf.truncate(self.written);
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ptp_string_advances_past_terminator() {
        let mut c = PtpCursor::from_bytes(vec![0x04, 0x41, 0x00, 0x42, 0x00, 0x00, 0x00]);
        assert_eq!(c.read_ptp_string().unwrap(), "AB");
        assert_eq!(c.offset(), 9);
        assert_eq!(c.remaining(), 0);
        assert!(c.read_u8().is_err());
    }

    #[test]
    fn test_ptp_string_truncated_characters() {
        let mut c = PtpCursor::from_bytes(vec![0x04, 0x41, 0x00]);
        assert!(matches!(c.read_ptp_string(), Err(PtpError::OutOfRange { .. })));
    }

    #[test]
    fn test_empty_ptp_string() {
        let mut c = PtpCursor::from_bytes(vec![0x00, 0xAA]);
        assert_eq!(c.read_ptp_string().unwrap(), "");
        assert_eq!(c.offset(), 1);
        assert_eq!(c.read_u8().unwrap(), 0xAA);
    }

    #[test]
    fn test_checksum_append() {
        let mut c = PtpCursor::new();
        c.write_bytes(&[0x01, 0x02, 0x03]);
        c.compute_and_append_checksum();
        assert_eq!(c.finalize(), vec![0x01, 0x02, 0x03, 0x06]);
    }

    #[test]
    fn test_checksum_wraps_modulo_255() {
        let mut c = PtpCursor::new();
        c.write_bytes(&[0xFF, 0x02]);
        c.compute_and_append_checksum();
        assert_eq!(c.finalize()[2], 0x02);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut c = PtpCursor::from_bytes(vec![0x01, 0x02, 0x03]);
        assert_eq!(c.read_u16().unwrap(), 0x0201);
        let err = c.read_u16().unwrap_err();
        assert!(matches!(
            err,
            PtpError::OutOfRange {
                offset: 2,
                requested: 2,
                len: 3
            }
        ));
        assert!(c.skip(2).is_err());
        assert!(c.goto_offset(4).is_err());
    }

    #[test]
    fn test_write_grows_and_overwrites() {
        let mut c = PtpCursor::with_capacity(2);
        c.write_u32(0xAABBCCDD);
        c.write_u64(1);
        assert_eq!(c.len(), 12);

        c.goto_offset(0).unwrap();
        c.write_u16(0x1122);
        let bytes = c.finalize();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &[0x22, 0x11, 0xBB, 0xAA]);
    }

    #[test]
    fn test_signed_scalars() {
        let mut c = PtpCursor::new();
        c.write_i8(-1);
        c.write_i16(-300);
        c.write_i32(-70000);
        c.write_i64(-5);
        let mut r = PtpCursor::from_bytes(c.finalize());
        assert_eq!(r.read_i8().unwrap(), -1);
        assert_eq!(r.read_i16().unwrap(), -300);
        assert_eq!(r.read_i32().unwrap(), -70000);
        assert_eq!(r.read_i64().unwrap(), -5);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_array_of_u16() {
        let mut c = PtpCursor::from_bytes(vec![0x02, 0, 0, 0, 0x01, 0x10, 0x02, 0x10]);
        let ops = c.read_array_of(|c| c.read_u16()).unwrap();
        assert_eq!(ops, vec![0x1001, 0x1002]);
    }

    #[test]
    fn test_array_with_bogus_count() {
        let mut c = PtpCursor::from_bytes(vec![0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        assert!(c.read_array_of(|c| c.read_u16()).is_err());
    }

    #[test]
    fn test_ascii_string() {
        let mut c = PtpCursor::from_bytes(b"EOS\0R5".to_vec());
        assert_eq!(c.read_nul_terminated_ascii_string().unwrap(), "EOS");
        assert_eq!(c.offset(), 4);
        assert_eq!(c.read_nul_terminated_ascii_string().unwrap(), "R5");
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn test_utf16_string_skips_marker() {
        let mut c = PtpCursor::from_bytes(vec![0xFE, 0xFF, b'h', 0, b'i', 0, 0, 0, b'x', 0]);
        assert_eq!(c.read_nul_terminated_utf16_string().unwrap(), "hi");
        assert_eq!(c.offset(), 8);
    }

    #[test]
    fn test_date_time() {
        let mut c = PtpCursor::new();
        c.write_ptp_string("20240131T235958.0");
        let mut r = PtpCursor::from_bytes(c.finalize());
        let dt = r.read_date_time().unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2024-01-31 23:59:58");

        let mut bad = PtpCursor::new();
        bad.write_ptp_string("yesterday");
        let mut r = PtpCursor::from_bytes(bad.finalize());
        assert!(matches!(r.read_date_time(), Err(PtpError::InvalidDateTime(_))));
    }
}
