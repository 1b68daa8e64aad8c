//! Chunk header parsing, checksum validation, and record iteration
//! (spec.md §4.8, §6).

use bitflags::bitflags;

use crate::binxml::TokenReader;
use crate::cursor::ByteReader;
use crate::error::{Diagnostic, EvtxError, Result};
use crate::expand::{self, ExpansionContext};
use crate::file_header::CHUNK_SIZE;
use crate::model::{self, XmlModelItem};
use crate::name::NameCache;
use crate::template::TemplateCache;
use crate::time::Timestamp;

use encoding::EncodingRef;
use std::cell::RefCell;

const CHUNK_MAGIC: &[u8; 8] = b"ElfChnk\0";
const RECORD_MAGIC: &[u8; 4] = &[0x2a, 0x2a, 0x00, 0x00];
const RECORD_HEADER_SIZE: u32 = 24;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkFlags: u32 {
        const NO_CRC32 = 0x1;
    }
}

#[derive(Debug, Clone)]
pub struct ChunkHeader {
    pub first_event_record_number: u64,
    pub last_event_record_number: u64,
    pub first_event_record_id: u64,
    pub last_event_record_id: u64,
    pub header_size: u32,
    pub last_event_record_data_offset: u32,
    pub free_space_offset: u32,
    pub events_checksum: u32,
    pub flags: ChunkFlags,
    pub header_chunk_checksum: u32,
    pub strings_offsets: [u32; 64],
    pub template_offsets: [u32; 32],
}

impl ChunkHeader {
    pub fn parse(chunk_data: &[u8], base_offset: u64) -> Result<ChunkHeader> {
        let mut reader = ByteReader::new(chunk_data);

        let magic = reader.read_bytes(8, "chunk header magic")?;
        if magic != CHUNK_MAGIC {
            let mut got = [0u8; 8];
            got.copy_from_slice(magic);
            return Err(EvtxError::InvalidChunkHeaderMagic { magic: got, offset: base_offset });
        }

        let first_event_record_number = reader.read_u64()?;
        let last_event_record_number = reader.read_u64()?;
        let first_event_record_id = reader.read_u64()?;
        let last_event_record_id = reader.read_u64()?;
        let header_size = reader.read_u32()?;
        let last_event_record_data_offset = reader.read_u32()?;
        let free_space_offset = reader.read_u32()?;
        let events_checksum = reader.read_u32()?;

        reader.advance(64)?; // reserved

        let flags_value = reader.read_u32()?;
        let flags = ChunkFlags::from_bits_truncate(flags_value);

        let header_chunk_checksum = reader.read_u32()?;

        let mut strings_offsets = [0u32; 64];
        for slot in strings_offsets.iter_mut() {
            *slot = reader.read_u32()?;
        }

        let mut template_offsets = [0u32; 32];
        for slot in template_offsets.iter_mut() {
            *slot = reader.read_u32()?;
        }

        Ok(ChunkHeader {
            first_event_record_number,
            last_event_record_number,
            first_event_record_id,
            last_event_record_id,
            header_size,
            last_event_record_data_offset,
            free_space_offset,
            events_checksum,
            flags,
            header_chunk_checksum,
            strings_offsets,
            template_offsets,
        })
    }

    /// CRC32-IEEE over `[0,120) ∪ [128,512)` compared to `header_chunk_checksum`.
    pub fn validate_header_checksum(&self, chunk_data: &[u8]) -> bool {
        if self.flags.contains(ChunkFlags::NO_CRC32) {
            return true;
        }
        if chunk_data.len() < 512 {
            return false;
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&chunk_data[0..120]);
        hasher.update(&chunk_data[128..512]);
        hasher.finalize() == self.header_chunk_checksum
    }

    /// CRC32-IEEE over `[512, free_space_offset)` compared to `events_checksum`.
    pub fn validate_events_checksum(&self, chunk_data: &[u8]) -> bool {
        if self.flags.contains(ChunkFlags::NO_CRC32) {
            return true;
        }
        let end = self.free_space_offset as usize;
        if end > chunk_data.len() || end < 512 {
            return false;
        }
        crc32fast::hash(&chunk_data[512..end]) == self.events_checksum
    }
}

/// One fully-parsed record: its id, timestamp, and assembled model.
pub struct ParsedRecord {
    pub record_id: u64,
    pub timestamp: Timestamp,
    pub model: Vec<XmlModelItem>,
}

/// Parses every record in a 65,536-byte chunk, in ascending record-id order.
///
/// Each record is independently fallible: a malformed record yields an
/// `Err` wrapping its `record_id` rather than aborting the chunk (spec.md
/// §7). An invalid record-header magic terminates iteration for the chunk.
pub struct ChunkReader<'a> {
    chunk_data: &'a [u8],
    header: ChunkHeader,
    template_cache: TemplateCache,
    names: NameCache,
    ansi_codec: EncodingRef,
    offset: u32,
    diagnostics: Vec<Diagnostic>,
    done: bool,
}

impl<'a> ChunkReader<'a> {
    pub fn new(
        chunk_data: &'a [u8],
        ansi_codec: EncodingRef,
        chunk_index: u16,
        base_offset: u64,
    ) -> Result<ChunkReader<'a>> {
        if chunk_data.len() != CHUNK_SIZE {
            return Err(EvtxError::IncompleteChunk { chunk_index });
        }
        let header = ChunkHeader::parse(chunk_data, base_offset)?;
        Self::from_parsed_header(chunk_data, header, ansi_codec)
    }

    /// Builds a reader from an already-parsed (and, by the caller,
    /// checksum-validated) header, avoiding re-parsing it. Used by the file
    /// layer, which must inspect the header before deciding whether to
    /// validate checksums and possibly skip the chunk entirely.
    pub fn from_parsed_header(
        chunk_data: &'a [u8],
        header: ChunkHeader,
        ansi_codec: EncodingRef,
    ) -> Result<ChunkReader<'a>> {
        let mut template_cache = TemplateCache::new();
        template_cache.populate(chunk_data, &header.template_offsets, ansi_codec)?;

        Ok(ChunkReader {
            chunk_data,
            header,
            template_cache,
            names: NameCache::new(),
            ansi_codec,
            offset: 512,
            diagnostics: Vec::new(),
            done: false,
        })
    }

    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn parse_one_record(&mut self) -> Result<Option<ParsedRecord>> {
        if self.done || self.offset >= self.header.free_space_offset {
            return Ok(None);
        }

        let mut reader = ByteReader::at(self.chunk_data, self.offset as usize);
        let record_offset = self.offset as u64;

        let magic = match reader.read_bytes(4, "record header magic") {
            Ok(m) => m,
            Err(_) => {
                self.done = true;
                return Ok(None);
            }
        };
        if magic != RECORD_MAGIC {
            self.done = true;
            return Ok(None);
        }

        let size = reader.read_u32()?;
        let record_id = reader.read_u64()?;
        let timestamp = reader.read_filetime()?;

        let body_len = size.checked_sub(RECORD_HEADER_SIZE).ok_or(EvtxError::UnexpectedEof {
            what: "record body (size underflows header)",
            offset: record_offset,
        })?;
        let body_start = self.offset as usize + RECORD_HEADER_SIZE as usize;
        let _body_end = body_start
            .checked_add(body_len as usize)
            .filter(|&e| e <= self.chunk_data.len())
            .ok_or(EvtxError::UnexpectedEof { what: "record body", offset: record_offset })?;

        let model = (|| -> Result<Vec<XmlModelItem>> {
            // Tokenized with a cursor over the whole chunk, not a slice local
            // to this record: a TemplateInstance's definition offset is
            // chunk-absolute, and detecting an inline definition (spec.md
            // §4.4) means comparing it against the cursor's real position.
            let mut body_reader = ByteReader::at(self.chunk_data, body_start);
            let mut token_reader = TokenReader::new(&mut body_reader, self.ansi_codec);
            let tokens = token_reader.read_all()?;
            for (offset, message) in token_reader.diagnostics.drain(..) {
                self.diagnostics.push(Diagnostic::new(offset, message));
            }

            let ctx = ExpansionContext {
                chunk_data: self.chunk_data,
                template_cache: &self.template_cache,
                ansi_codec: self.ansi_codec,
                diagnostics: RefCell::new(Vec::new()),
            };
            let expanded = expand::expand(&tokens, &ctx)?;
            for (offset, message) in ctx.diagnostics.into_inner() {
                self.diagnostics.push(Diagnostic::new(offset, message));
            }

            model::assemble(&expanded, self.chunk_data, &mut self.names)
        })();

        let reached_last = record_id == self.header.last_event_record_id;
        self.offset += size;
        if reached_last {
            self.done = true;
        }

        match model {
            Ok(model) => Ok(Some(ParsedRecord { record_id, timestamp, model })),
            Err(e) => Err(EvtxError::wrap_record(record_id, e)),
        }
    }
}

impl<'a> Iterator for ChunkReader<'a> {
    type Item = Result<ParsedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parse_one_record().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_chunk_magic() {
        let mut buf = vec![0u8; CHUNK_SIZE];
        buf[0] = b'X';
        assert!(ChunkHeader::parse(&buf, 4096).is_err());
    }

    #[test]
    fn no_crc32_flag_bypasses_checksum() {
        let mut buf = vec![0u8; CHUNK_SIZE];
        buf[0..8].copy_from_slice(CHUNK_MAGIC);
        buf[120..124].copy_from_slice(&1u32.to_le_bytes()); // NO_CRC32
        buf[48..52].copy_from_slice(&512u32.to_le_bytes()); // free_space_offset == 512: no records
        let header = ChunkHeader::parse(&buf, 4096).unwrap();
        assert!(header.validate_header_checksum(&buf));
        assert!(header.validate_events_checksum(&buf));
    }

    #[test]
    fn empty_chunk_yields_no_records() {
        let mut buf = vec![0u8; CHUNK_SIZE];
        buf[0..8].copy_from_slice(CHUNK_MAGIC);
        buf[120..124].copy_from_slice(&1u32.to_le_bytes()); // NO_CRC32, avoid checksum setup
        buf[48..52].copy_from_slice(&512u32.to_le_bytes()); // free_space_offset == 512
        let codec = encoding::all::WINDOWS_1252 as EncodingRef;
        let mut reader = ChunkReader::new(&buf, codec, 0, 4096).unwrap();
        assert!(reader.next().is_none());
    }
}
