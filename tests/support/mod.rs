//! Byte-buffer builders shared by the integration tests: a full EVTX file
//! is assembled by hand, the same way the unit tests in `src/` build a
//! single chunk header or record. No binary fixtures are checked in.

pub const FILE_HEADER_SIZE: usize = 4096;
pub const CHUNK_SIZE: usize = 65536;
const RECORD_HEADER_SIZE: usize = 24;

/// A 4096-byte file header claiming `chunk_count` chunks follow.
pub fn file_header_bytes(chunk_count: u16) -> Vec<u8> {
    let mut buf = vec![0u8; FILE_HEADER_SIZE];
    buf[0..8].copy_from_slice(b"ElfFile\0");
    buf[24..32].copy_from_slice(&1u64.to_le_bytes()); // next_record_id
    buf[32..36].copy_from_slice(&(FILE_HEADER_SIZE as u32).to_le_bytes());
    buf[36..38].copy_from_slice(&1u16.to_le_bytes());
    buf[38..40].copy_from_slice(&3u16.to_le_bytes());
    buf[40..42].copy_from_slice(&(FILE_HEADER_SIZE as u16).to_le_bytes());
    buf[42..44].copy_from_slice(&chunk_count.to_le_bytes());
    let checksum = crc32fast::hash(&buf[0..120]);
    buf[124..128].copy_from_slice(&checksum.to_le_bytes());
    buf
}

/// A chunk-local name blob: `next (u32=0), hash (u16=0), length, utf16 chars,
/// trailing u32 of zeros`.
pub fn name_blob(text: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&(text.encode_utf16().count() as u16).to_le_bytes());
    for u in text.encode_utf16() {
        buf.extend_from_slice(&u.to_le_bytes());
    }
    buf.extend_from_slice(&[0u8; 4]);
    buf
}

/// A 24-byte record header (magic, size, record id, FILETIME) wrapping `body`.
/// Uses the spec's own worked FILETIME example (2020-12-16T00:00:00Z) so
/// every record in these tests decodes to the same, easily-checked timestamp.
pub fn record_bytes(record_id: u64, body: &[u8]) -> Vec<u8> {
    const FILETIME_2020_12_16: u64 = 132_514_632_000_000_000;

    let mut buf = Vec::new();
    buf.extend_from_slice(&[0x2a, 0x2a, 0x00, 0x00]);
    let size = (RECORD_HEADER_SIZE + body.len()) as u32;
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&record_id.to_le_bytes());
    buf.extend_from_slice(&FILETIME_2020_12_16.to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

pub fn fragment_header() -> Vec<u8> {
    vec![0x0f, 0x01, 0x01, 0x00]
}

pub fn end_of_stream() -> Vec<u8> {
    vec![0x00]
}

pub fn open_start_element(name_offset: u32, has_attributes: bool) -> Vec<u8> {
    let mut b = vec![if has_attributes { 0x41 } else { 0x01 }];
    b.extend_from_slice(&0xffffu16.to_le_bytes()); // dependency id
    b.extend_from_slice(&0u32.to_le_bytes()); // data size, unused downstream
    b.extend_from_slice(&name_offset.to_le_bytes());
    if has_attributes {
        b.extend_from_slice(&0u32.to_le_bytes()); // attribute list data size, unused downstream
    }
    b
}

pub fn attribute(name_offset: u32) -> Vec<u8> {
    let mut b = vec![0x06];
    b.extend_from_slice(&name_offset.to_le_bytes());
    b
}

pub fn close_start_element() -> Vec<u8> {
    vec![0x02]
}

pub fn close_empty_element() -> Vec<u8> {
    vec![0x03]
}

pub fn close_element() -> Vec<u8> {
    vec![0x04]
}

pub fn string_value(text: &str) -> Vec<u8> {
    let mut b = vec![0x05, 0x01]; // Value token, String type
    let units: Vec<u16> = text.encode_utf16().collect();
    b.extend_from_slice(&(units.len() as u16).to_le_bytes());
    for u in units {
        b.extend_from_slice(&u.to_le_bytes());
    }
    b
}

pub fn uint32_value(value: u32) -> Vec<u8> {
    let mut b = vec![0x05, 0x08]; // Value token, UInt32 type
    b.extend_from_slice(&value.to_le_bytes());
    b
}

/// A `TemplateInstance` token (0x0c) with a non-inline `definition_offset`
/// and a list of `(value_type_byte, encoded_value_bytes)` substitution slots.
///
/// Wire layout is two-phase (spec.md §4.3): every `(size, type, pad)`
/// descriptor is laid out contiguously first, then every value follows
/// back-to-back -- not interleaved descriptor-then-its-value.
pub fn template_instance(definition_offset: u32, substitutions: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut b = vec![0x0c, 0x00];
    b.extend_from_slice(&1u32.to_le_bytes()); // template id, not used by this crate
    b.extend_from_slice(&definition_offset.to_le_bytes());
    b.extend_from_slice(&(substitutions.len() as u32).to_le_bytes());
    for (value_type, value_bytes) in substitutions {
        b.extend_from_slice(&(value_bytes.len() as u16).to_le_bytes());
        b.push(*value_type);
        b.push(0); // pad
    }
    for (_, value_bytes) in substitutions {
        b.extend_from_slice(value_bytes);
    }
    b
}

/// A `Substitution` (0x0d) or `ConditionalSubstitution` (0x0e) token used
/// inside a template definition's own token stream.
pub fn substitution(index: u16, value_type: u8, optional: bool) -> Vec<u8> {
    let mut b = vec![if optional { 0x0e } else { 0x0d }];
    b.extend_from_slice(&index.to_le_bytes());
    b.push(value_type);
    b
}

/// A template definition blob: `next_template_offset (u32), guid (16 bytes,
/// zeroed), data_size (u32), body tokens`.
pub fn template_definition(next_offset: u32, body_tokens: &[u8]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&next_offset.to_le_bytes());
    b.extend_from_slice(&[0u8; 16]);
    b.extend_from_slice(&(body_tokens.len() as u32).to_le_bytes());
    b.extend_from_slice(body_tokens);
    b
}

/// Lays out a full 65,536-byte chunk: header, then `records` back to back
/// starting at byte 512, then `aux` (name blobs / template definitions,
/// referenced by absolute chunk offset from within `records`) in the
/// remaining free space. Computes both checksums unless `no_crc32` is set.
pub fn chunk_bytes(records: &[Vec<u8>], aux: &[u8], template_offsets: [u32; 32], no_crc32: bool) -> Vec<u8> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    chunk[0..8].copy_from_slice(b"ElfChnk\0");

    let mut offset = 512usize;
    let mut first_id = 0u64;
    let mut last_id = 0u64;
    for (i, record) in records.iter().enumerate() {
        chunk[offset..offset + record.len()].copy_from_slice(record);
        let record_id = u64::from_le_bytes(record[8..16].try_into().unwrap());
        if i == 0 {
            first_id = record_id;
        }
        last_id = record_id;
        offset += record.len();
    }
    let free_space_offset = offset as u32;

    chunk[24..32].copy_from_slice(&first_id.to_le_bytes());
    chunk[32..40].copy_from_slice(&last_id.to_le_bytes());
    chunk[48..52].copy_from_slice(&free_space_offset.to_le_bytes());

    if !aux.is_empty() {
        chunk[offset..offset + aux.len()].copy_from_slice(aux);
    }

    for (i, template_offset) in template_offsets.iter().enumerate() {
        let pos = 384 + i * 4;
        chunk[pos..pos + 4].copy_from_slice(&template_offset.to_le_bytes());
    }

    if no_crc32 {
        chunk[120..124].copy_from_slice(&1u32.to_le_bytes());
    } else {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&chunk[0..120]);
        hasher.update(&chunk[128..512]);
        let header_checksum = hasher.finalize();
        chunk[124..128].copy_from_slice(&header_checksum.to_le_bytes());

        let events_checksum = crc32fast::hash(&chunk[512..free_space_offset as usize]);
        chunk[52..56].copy_from_slice(&events_checksum.to_le_bytes());
    }

    chunk
}

/// Accumulates name blobs / template definitions into one byte run starting
/// at `base`, handing back each piece's absolute chunk offset as it's added
/// -- used to break the chicken-and-egg problem of a record's token stream
/// needing to embed offsets that only exist once the record itself has been
/// sized.
pub struct AuxBuilder {
    base: u32,
    bytes: Vec<u8>,
}

impl AuxBuilder {
    pub fn new(base: u32) -> Self {
        AuxBuilder { base, bytes: Vec::new() }
    }

    pub fn add_name(&mut self, text: &str) -> u32 {
        let offset = self.base + self.bytes.len() as u32;
        self.bytes.extend(name_blob(text));
        offset
    }

    pub fn add_bytes(&mut self, bytes: Vec<u8>) -> u32 {
        let offset = self.base + self.bytes.len() as u32;
        self.bytes.extend(bytes);
        offset
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Concatenates a file header and one chunk into a complete in-memory file.
pub fn single_chunk_file(chunk: Vec<u8>) -> Vec<u8> {
    let mut data = file_header_bytes(1);
    data.extend(chunk);
    data
}
