//! Error taxonomy for the crate (spec.md §7).
//!
//! Parsing a single record is atomic: any failure aborts that record only
//! and is reported to the caller as an `Err` item from the record iterator,
//! carrying enough context (offset, record id, chunk index) to write a log
//! line without leaking internal state. Chunk- and file-level failures are
//! distinguished by where they're raised, not by a different error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvtxError>;

#[derive(Debug, Error)]
pub enum EvtxError {
    #[error("an I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open {}: {source}", path.display())]
    FailedToOpenFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error(
        "invalid EVTX file header magic at offset {offset}: expected `ElfFile\\0`, found {magic:02x?}"
    )]
    InvalidFileHeaderMagic { magic: [u8; 8], offset: u64 },

    #[error(
        "invalid EVTX chunk header magic at offset {offset}: expected `ElfChnk\\0`, found {magic:02x?}"
    )]
    InvalidChunkHeaderMagic { magic: [u8; 8], offset: u64 },

    #[error("chunk {chunk_index}: reached end of file while reading the chunk's 65536 bytes")]
    IncompleteChunk { chunk_index: u16 },

    #[error("chunk {chunk_index}: header checksum mismatch (expected {expected:08x}, computed {computed:08x})")]
    InvalidChunkHeaderChecksum {
        chunk_index: u16,
        expected: u32,
        computed: u32,
    },

    #[error("chunk {chunk_index}: events checksum mismatch (expected {expected:08x}, computed {computed:08x})")]
    InvalidChunkEventsChecksum {
        chunk_index: u16,
        expected: u32,
        computed: u32,
    },

    #[error(
        "invalid EVTX record header magic at offset {offset}: expected `2a2a0000`, found {magic:02x?}"
    )]
    InvalidRecordHeaderMagic { magic: [u8; 4], offset: u64 },

    #[error("offset {offset}: unexpected end of stream while reading {what}")]
    UnexpectedEof { what: &'static str, offset: u64 },

    #[error("offset {offset}: invalid binxml token byte `0x{token:02x}`")]
    UnexpectedToken { token: u8, offset: u64 },

    #[error("offset {offset}: invalid binxml value type byte `0x{value_type:02x}`")]
    UnexpectedValueType { value_type: u8, offset: u64 },

    #[error("offset {offset}: malformed name reference: {reason}")]
    BadName { reason: String, offset: u64 },

    #[error("offset {offset}: template at offset {template_offset} not found in cache and could not be parsed on the fly: {reason}")]
    TemplateMissing {
        template_offset: u32,
        offset: u64,
        reason: String,
    },

    #[error("offset {offset}: template expansion exceeded the maximum recursion depth ({max_depth})")]
    TemplateRecursion { offset: u64, max_depth: u32 },

    #[error("model assembly failed: {reason}")]
    ModelState { reason: &'static str },

    #[error("record {record_id}: failed to deserialize: {source}")]
    FailedToDeserializeRecord {
        record_id: u64,
        #[source]
        source: Box<EvtxError>,
    },

    #[error("offset {offset}: failed to decode ANSI string with codec `{codec}`: {message}")]
    FailedToDecodeAnsiString {
        codec: &'static str,
        message: String,
        offset: u64,
    },

    #[error("writing XML failed: {0}")]
    XmlOutput(#[from] quick_xml::Error),

    #[error("building the JSON document failed: {message}")]
    JsonStructure { message: String },

    #[error("serde_json failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvtxError {
    pub(crate) fn wrap_record(record_id: u64, source: EvtxError) -> EvtxError {
        EvtxError::FailedToDeserializeRecord {
            record_id,
            source: Box::new(source),
        }
    }
}

/// A non-fatal observation surfaced alongside (not instead of) successful
/// iteration — lenient checksum failures, cursor resynchronizations after a
/// truncated substitution, template definitions parsed on the fly because
/// they were missing from the cache. See spec.md §7's "separate diagnostic
/// channel" requirement.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub offset: u64,
    pub message: String,
}

impl Diagnostic {
    pub(crate) fn new(offset: u64, message: impl Into<String>) -> Self {
        Diagnostic {
            offset,
            message: message.into(),
        }
    }
}
