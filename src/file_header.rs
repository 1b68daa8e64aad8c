//! EVTX file header (spec.md §6, 4096-byte region at the start of the file).

use bitflags::bitflags;

use crate::cursor::ByteReader;
use crate::error::{EvtxError, Result};

pub const FILE_HEADER_SIZE: usize = 4096;
pub const CHUNK_SIZE: usize = 65536;
const FILE_MAGIC: &[u8; 8] = b"ElfFile\0";

bitflags! {
    /// File-level flags (spec.md §3 FileHeader).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        const DIRTY = 0x1;
        const FULL = 0x2;
        const NO_CRC32 = 0x4;
    }
}

#[derive(Debug, Clone)]
pub struct FileHeader {
    pub first_chunk_number: u64,
    pub last_chunk_number: u64,
    pub next_record_id: u64,
    pub header_size: u32,
    pub minor_version: u16,
    pub major_version: u16,
    pub header_block_size: u16,
    pub chunk_count: u16,
    pub flags: FileFlags,
    pub checksum: u32,
}

impl FileHeader {
    /// Parses the 4096-byte file header from the start of `buf`.
    pub fn parse(buf: &[u8]) -> Result<FileHeader> {
        let mut reader = ByteReader::new(buf);

        let magic = reader.read_bytes(8, "file header magic")?;
        if magic != FILE_MAGIC {
            let mut got = [0u8; 8];
            got.copy_from_slice(magic);
            return Err(EvtxError::InvalidFileHeaderMagic { magic: got, offset: 0 });
        }

        let first_chunk_number = reader.read_u64()?;
        let last_chunk_number = reader.read_u64()?;
        let next_record_id = reader.read_u64()?;
        let header_size = reader.read_u32()?;
        let minor_version = reader.read_u16()?;
        let major_version = reader.read_u16()?;
        let header_block_size = reader.read_u16()?;
        let chunk_count = reader.read_u16()?;

        reader.advance(76)?; // reserved

        // Real-world files have been observed with reserved bits set in this
        // field; truncate rather than reject so a harmless unknown flag bit
        // doesn't turn into a file-level parse failure.
        let flags_value = reader.read_u32()?;
        let flags = FileFlags::from_bits_truncate(flags_value);

        let checksum = reader.read_u32()?;

        Ok(FileHeader {
            first_chunk_number,
            last_chunk_number,
            next_record_id,
            header_size,
            minor_version,
            major_version,
            header_block_size,
            chunk_count,
            flags,
            checksum,
        })
    }

    /// Computes CRC32-IEEE over the first 120 bytes, the header's own
    /// checksummed region, and compares it to the stored `checksum`.
    pub fn validate_checksum(&self, buf: &[u8]) -> bool {
        if buf.len() < 124 {
            return false;
        }
        let computed = crc32fast::hash(&buf[0..120]);
        computed == self.checksum
    }

    /// Derives the number of complete 65,536-byte chunks in `total_size`
    /// bytes of backing data, given this header's `header_block_size`. An
    /// incomplete trailing chunk is not counted.
    pub fn derive_chunk_count(&self, total_size: u64) -> u64 {
        let header_size = self.header_block_size.max(FILE_HEADER_SIZE as u16) as u64;
        total_size.saturating_sub(header_size) / CHUNK_SIZE as u64
    }
}
