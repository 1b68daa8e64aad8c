//! Bounds-checked cursor over a contiguous byte slice (spec.md §4.1).
//!
//! Every primitive read is little-endian and advances the cursor only on
//! success; a read that would run past the end of the slice fails with
//! `EvtxError::UnexpectedEof` and leaves the cursor positioned where the
//! read started.

use byteorder::{ByteOrder, LittleEndian};
use encoding::{DecoderTrap, EncodingRef};

use crate::error::{EvtxError, Result};
use crate::time::Timestamp;

/// A lightweight, `Copy`-able cursor over an immutable byte slice.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        ByteReader { buf, pos }
    }

    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        let pos = pos as usize;
        if pos > self.buf.len() {
            return Err(EvtxError::UnexpectedEof {
                what: "seek target",
                offset: pos as u64,
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn advance(&mut self, n: usize) -> Result<()> {
        self.seek(self.pos as u64 + n as u64)
    }

    pub fn read_bytes(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        let start = self.pos;
        let end = start
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or(EvtxError::UnexpectedEof {
                what,
                offset: start as u64,
            })?;
        self.pos = end;
        Ok(&self.buf[start..end])
    }

    fn read_fixed<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N, what)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_fixed::<1>("u8")?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(&self.read_fixed::<2>("u16")?))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(LittleEndian::read_i16(&self.read_fixed::<2>("i16")?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(&self.read_fixed::<4>("u32")?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(&self.read_fixed::<4>("i32")?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(&self.read_fixed::<8>("u64")?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(&self.read_fixed::<8>("i64")?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(&self.read_fixed::<4>("f32")?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(&self.read_fixed::<8>("f64")?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        // Encoded as a 4-byte integer; anything other than 0/1 is coerced to
        // `true` with a logged warning, matching observed producer behavior.
        match self.read_i32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => {
                log::warn!("{other} is not a canonical bool value, coercing to `true`");
                Ok(true)
            }
        }
    }

    /// Reads a 16-byte Microsoft GUID: a 4-byte little-endian group, two
    /// 2-byte little-endian groups, then 8 bytes emitted as-is (2 then 6).
    pub fn read_guid(&mut self) -> Result<String> {
        let b = self.read_fixed::<16>("guid")?;
        let d1 = LittleEndian::read_u32(&b[0..4]);
        let d2 = LittleEndian::read_u16(&b[4..6]);
        let d3 = LittleEndian::read_u16(&b[6..8]);
        Ok(format!(
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            d1, d2, d3, b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        ))
    }

    /// Reads a Windows FILETIME: a u64 count of 100ns ticks since 1601-01-01 UTC.
    pub fn read_filetime(&mut self) -> Result<Timestamp> {
        Ok(Timestamp::from_filetime(self.read_u64()?))
    }

    /// Reads a SYSTEMTIME structure: 8 little-endian u16 fields.
    pub fn read_systemtime(&mut self) -> Result<Timestamp> {
        let year = self.read_u16()?;
        let month = self.read_u16()?;
        let _day_of_week = self.read_u16()?;
        let day = self.read_u16()?;
        let hour = self.read_u16()?;
        let minute = self.read_u16()?;
        let second = self.read_u16()?;
        let milliseconds = self.read_u16()?;
        Ok(Timestamp::from_systemtime_fields(
            year,
            month,
            day,
            hour,
            minute,
            second,
            milliseconds,
        ))
    }

    /// Reads a Windows SID: 1-byte revision, 1-byte sub-authority count `n`,
    /// a 6-byte big-endian authority, then `n` little-endian u32 sub-authorities.
    pub fn read_sid(&mut self) -> Result<String> {
        let revision = self.read_u8()?;
        let sub_authority_count = self.read_u8()? as usize;
        let authority_bytes = self.read_bytes(6, "sid authority")?;
        let authority = authority_bytes
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b));

        let mut rendered = format!("S-{revision}-{authority}");
        for _ in 0..sub_authority_count {
            rendered.push('-');
            rendered.push_str(&self.read_u32()?.to_string());
        }
        Ok(rendered)
    }

    /// Reads a u16 character-count prefix followed by that many UTF-16LE code units.
    pub fn read_utf16_len_prefixed(&mut self) -> Result<String> {
        let char_count = self.read_u16()? as usize;
        self.read_utf16_units(char_count, "length-prefixed utf16 string")
    }

    /// Reads exactly `char_count` UTF-16LE code units (caller already knows the length).
    pub fn read_utf16_units_exact(&mut self, char_count: usize) -> Result<String> {
        self.read_utf16_units(char_count, "utf16 string")
    }

    /// Reads UTF-16LE code units until a NUL (0x0000) code unit, not included in the result.
    pub fn read_utf16_nul_terminated(&mut self) -> Result<String> {
        let mut units = Vec::new();
        loop {
            let unit = self.read_u16()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        Ok(decode_utf16_lossy(&units))
    }

    fn read_utf16_units(&mut self, char_count: usize, what: &'static str) -> Result<String> {
        let byte_len = char_count
            .checked_mul(2)
            .ok_or(EvtxError::UnexpectedEof {
                what,
                offset: self.pos as u64,
            })?;
        let bytes = self.read_bytes(byte_len, what)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Ok(decode_utf16_lossy(&units))
    }

    /// Reads `n` bytes and decodes them with the given single-byte codec
    /// (default Windows-1252; spec.md §4.1).
    pub fn read_ansi(&mut self, n: usize, codec: EncodingRef) -> Result<String> {
        let bytes = self.read_bytes(n, "ansi string")?;
        codec
            .decode(bytes, DecoderTrap::Replace)
            .map_err(|message| EvtxError::FailedToDecodeAnsiString {
                codec: codec.name(),
                message: message.into_owned(),
                offset: self.pos as u64,
            })
    }
}

fn decode_utf16_lossy(units: &[u16]) -> String {
    char::decode_utf16(units.iter().copied())
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_primitives() {
        let buf = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 0x0403);
        assert_eq!(r.read_u32().unwrap(), 0x0807_0605);
    }

    #[test]
    fn read_past_end_fails_without_advancing() {
        let buf = [0x01];
        let mut r = ByteReader::new(&buf);
        assert!(r.read_u32().is_err());
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn guid_formats_as_expected() {
        #[rustfmt::skip]
        let bytes: [u8; 16] = [
            0x33, 0x22, 0x11, 0x00, // Data1 LE
            0x55, 0x44,             // Data2 LE
            0x77, 0x66,             // Data3 LE
            0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, // Data4 as-is
        ];
        let mut r = ByteReader::new(&bytes);
        assert_eq!(
            r.read_guid().unwrap(),
            "00112233-4455-6677-8899-aabbccddeeff"
        );
    }

    #[test]
    fn sid_renders_s_r_a_subauthorities() {
        let mut bytes = vec![1u8, 2]; // revision=1, count=2
        bytes.extend_from_slice(&[0, 0, 0, 0, 0, 5]); // authority = 5
        bytes.extend_from_slice(&21u32.to_le_bytes());
        bytes.extend_from_slice(&512u32.to_le_bytes());
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_sid().unwrap(), "S-1-5-21-512");
    }

    #[test]
    fn utf16_len_prefixed_roundtrips() {
        let text = "hello";
        let mut bytes = (text.encode_utf16().count() as u16).to_le_bytes().to_vec();
        for u in text.encode_utf16() {
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_utf16_len_prefixed().unwrap(), "hello");
    }

    #[test]
    fn utf16_nul_terminated_stops_before_nul() {
        let mut bytes = Vec::new();
        for u in "hi".encode_utf16() {
            bytes.extend_from_slice(&u.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0xffffu16.to_le_bytes()); // should not be read
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_utf16_nul_terminated().unwrap(), "hi");
        assert_eq!(r.position(), 6);
    }
}
