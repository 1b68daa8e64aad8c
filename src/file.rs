//! File-level parser: file header, chunk layout, and the public record
//! iterators (spec.md §4.9, §5, §6).
//!
//! An `EvtxParser` owns the whole backing byte region (spec.md §3
//! `EvtxFile`) and is immutable once constructed; everything downstream
//! (chunks, their template/name caches) is derived lazily from borrows into
//! that region.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Mutex;

use encoding::EncodingRef;
use serde_json::Value;

use crate::chunk::{ChunkHeader, ChunkReader, ParsedRecord};
use crate::error::{Diagnostic, EvtxError, Result};
use crate::file_header::{FileHeader, CHUNK_SIZE, FILE_HEADER_SIZE};
use crate::json_output::{self, WideIntMode};
use crate::model::XmlModelItem;
use crate::time::Timestamp;
use crate::xml_output;

/// One decoded record, generic over its rendered representation (spec.md
/// §3 `EventRecord`'s "public projection").
#[derive(Debug, Clone)]
pub struct SerializedEvtxRecord<T> {
    pub event_record_id: u64,
    pub timestamp: Timestamp,
    pub data: T,
}

/// Single-byte ANSI codec choice (spec.md §4.1, §4.9 `ansi_codec`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnsiCodec {
    Windows1252,
    Latin1,
    Ibm437,
}

impl AnsiCodec {
    fn table(self) -> EncodingRef {
        match self {
            AnsiCodec::Windows1252 => encoding::all::WINDOWS_1252 as EncodingRef,
            AnsiCodec::Latin1 => encoding::all::ISO_8859_1 as EncodingRef,
            AnsiCodec::Ibm437 => encoding::all::IBM437 as EncodingRef,
        }
    }
}

impl Default for AnsiCodec {
    fn default() -> Self {
        AnsiCodec::Windows1252
    }
}

/// Parser configuration (spec.md §4.9), a plain value type constructed by
/// the caller and cloned into each chunk worker -- never global state.
#[derive(Debug, Clone)]
pub struct ParserSettings {
    validate_checksums: bool,
    indent: bool,
    separate_json_attributes: bool,
    ansi_codec: AnsiCodec,
    num_threads: usize,
    max_template_recursion_depth: u32,
    wide_int_mode: WideIntMode,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            validate_checksums: false,
            indent: true,
            separate_json_attributes: false,
            ansi_codec: AnsiCodec::Windows1252,
            num_threads: 0,
            max_template_recursion_depth: crate::binxml::MAX_RECURSION_DEPTH,
            wide_int_mode: WideIntMode::Number,
        }
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        ParserSettings::default()
    }

    pub fn validate_checksums(mut self, validate: bool) -> Self {
        self.validate_checksums = validate;
        self
    }

    pub fn indent(mut self, indent: bool) -> Self {
        self.indent = indent;
        self
    }

    pub fn separate_json_attributes(mut self, separate: bool) -> Self {
        self.separate_json_attributes = separate;
        self
    }

    pub fn ansi_codec(mut self, codec: AnsiCodec) -> Self {
        self.ansi_codec = codec;
        self
    }

    /// `0` disables chunk-level parallelism regardless of the
    /// `multithreading` feature; any positive value requests (at most) that
    /// many worker threads (spec.md §5).
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn max_template_recursion_depth(mut self, depth: u32) -> Self {
        self.max_template_recursion_depth = depth;
        self
    }

    /// Emit 64-bit integers as JSON numbers (default, with the documented
    /// precision-loss caveat above 2^53) or as decimal strings.
    pub fn wide_integers_as_strings(mut self, as_strings: bool) -> Self {
        self.wide_int_mode = if as_strings { WideIntMode::String } else { WideIntMode::Number };
        self
    }

    fn codec(&self) -> EncodingRef {
        self.ansi_codec.table()
    }
}

/// Parses an EVTX file lazily, chunk by chunk, record by record.
///
/// `T` is the caller's original byte source (`File`, `Cursor<Vec<u8>>`, or
/// any `Read + Seek`); the parser reads it fully into memory once at
/// construction (spec.md §3: "EvtxFile owns the backing byte region") and
/// is immutable thereafter.
pub struct EvtxParser<T> {
    data: Box<[u8]>,
    header: FileHeader,
    config: ParserSettings,
    diagnostics: Mutex<Vec<Diagnostic>>,
    _source: PhantomData<T>,
}

impl EvtxParser<File> {
    pub fn from_path(path: impl AsRef<Path>) -> Result<EvtxParser<File>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| EvtxError::FailedToOpenFile {
            path: path.to_path_buf(),
            source,
        })?;
        EvtxParser::from_read_seek(file)
    }
}

impl EvtxParser<Cursor<Vec<u8>>> {
    pub fn from_buffer(buffer: Vec<u8>) -> Result<EvtxParser<Cursor<Vec<u8>>>> {
        EvtxParser::from_read_seek(Cursor::new(buffer))
    }
}

impl<T: Read + Seek> EvtxParser<T> {
    pub fn from_read_seek(mut source: T) -> Result<EvtxParser<T>> {
        let mut data = Vec::new();
        source.rewind()?;
        source.read_to_end(&mut data)?;

        if data.len() < FILE_HEADER_SIZE {
            return Err(EvtxError::UnexpectedEof {
                what: "file header",
                offset: data.len() as u64,
            });
        }
        let header = FileHeader::parse(&data[..FILE_HEADER_SIZE])?;

        Ok(EvtxParser {
            data: data.into_boxed_slice(),
            header,
            config: ParserSettings::default(),
            diagnostics: Mutex::new(Vec::new()),
            _source: PhantomData,
        })
    }

    /// Replaces the parser's configuration, matching the teacher's
    /// by-value builder chain (`parser.with_configuration(settings)`).
    pub fn with_configuration(mut self, config: ParserSettings) -> Self {
        self.config = config;
        self
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Number of complete (non-truncated) chunks in the file (spec.md §4.9).
    pub fn chunks_count(&self) -> u64 {
        self.header.derive_chunk_count(self.data.len() as u64)
    }

    /// Approximate total record count, summing each chunk's own
    /// `last_event_record_id - first_event_record_id + 1` bookkeeping rather
    /// than tokenizing every record. Useful for progress reporting; a chunk
    /// with no records at all (first/last both zero) contributes zero.
    pub fn records_count(&self) -> u64 {
        (0..self.chunks_count())
            .filter_map(|idx| self.chunk_slice(idx))
            .filter_map(|chunk_data| ChunkHeader::parse(chunk_data, 0).ok())
            .map(|header| {
                if header.last_event_record_id < header.first_event_record_id {
                    0
                } else {
                    header.last_event_record_id - header.first_event_record_id + 1
                }
            })
            .sum()
    }

    /// Drains the non-fatal diagnostic side-channel (spec.md §7's "separate
    /// diagnostic channel"): lenient checksum failures, cursor
    /// resynchronizations, on-the-fly template parses.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics.lock().expect("diagnostics mutex poisoned"))
    }

    fn push_diagnostics(&self, mut batch: Vec<Diagnostic>) {
        if batch.is_empty() {
            return;
        }
        self.diagnostics.lock().expect("diagnostics mutex poisoned").append(&mut batch);
    }

    fn chunk_base_offset(&self, chunk_index: u64) -> u64 {
        self.header.header_block_size as u64 + chunk_index * CHUNK_SIZE as u64
    }

    fn chunk_slice(&self, chunk_index: u64) -> Option<&[u8]> {
        let start = self.chunk_base_offset(chunk_index) as usize;
        let end = start.checked_add(CHUNK_SIZE)?;
        self.data.get(start..end)
    }

    /// Builds a reader for one chunk, applying the checksum policy from
    /// spec.md §4.9/§4.8: `Ok(None)` means the chunk was skipped (bad
    /// checksum under strict validation) but is not itself an error to
    /// surface record-by-record; `Err` is a structural parse failure.
    fn open_chunk(&self, chunk_index: u64) -> Result<Option<ChunkReader<'_>>> {
        let Some(chunk_data) = self.chunk_slice(chunk_index) else {
            // Incomplete trailing chunk: ignored, not an error (spec.md §8).
            return Ok(None);
        };

        let base_offset = self.chunk_base_offset(chunk_index);
        let header = ChunkHeader::parse(chunk_data, base_offset)?;

        let header_ok = header.validate_header_checksum(chunk_data);
        let events_ok = header.validate_events_checksum(chunk_data);

        if !header_ok || !events_ok {
            if self.config.validate_checksums {
                self.push_diagnostics(vec![Diagnostic::new(
                    base_offset,
                    format!("chunk {chunk_index}: checksum mismatch, skipping chunk"),
                )]);
                return Ok(None);
            }
            self.push_diagnostics(vec![Diagnostic::new(
                base_offset,
                format!("chunk {chunk_index}: checksum mismatch, continuing (validate_checksums=false)"),
            )]);
        }

        let reader = ChunkReader::from_parsed_header(chunk_data, header, self.config.codec())?;
        Ok(Some(reader))
    }

    /// Decodes every record of one chunk into `R` via `render`, sequentially.
    fn decode_chunk<R>(
        &self,
        chunk_index: u64,
        render: &(dyn Fn(&ParsedRecord) -> Result<R> + Sync),
    ) -> Vec<Result<SerializedEvtxRecord<R>>> {
        let mut reader = match self.open_chunk(chunk_index) {
            Ok(Some(reader)) => reader,
            Ok(None) => return Vec::new(),
            Err(e) => return vec![Err(e)],
        };

        let mut out = Vec::new();
        for item in reader.by_ref() {
            match item {
                Ok(record) => {
                    let rendered = render(&record).map_err(|e| EvtxError::wrap_record(record.record_id, e));
                    out.push(rendered.map(|data| SerializedEvtxRecord {
                        event_record_id: record.record_id,
                        timestamp: record.timestamp,
                        data,
                    }));
                }
                Err(e) => out.push(Err(e)),
            }
        }
        self.push_diagnostics(reader.take_diagnostics());
        out
    }

    /// Renders every record in the file via `render`, preserving ascending
    /// chunk-index / record-id order (spec.md §5). Chunk-level parallelism
    /// is used when `num_threads > 0` and the `multithreading` feature is
    /// enabled; results are buffered per chunk and re-sequenced into chunk
    /// order before being handed back, so record order never depends on
    /// completion order.
    fn render_all<R: Send + 'static>(
        &self,
        render: impl Fn(&ParsedRecord) -> Result<R> + Sync + Send + 'static,
    ) -> Box<dyn Iterator<Item = Result<SerializedEvtxRecord<R>>> + '_> {
        let chunk_count = self.chunks_count();
        let indices: Vec<u64> = (0..chunk_count).collect();

        #[cfg(feature = "multithreading")]
        if self.config.num_threads != 0 {
            use rayon::prelude::*;

            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.num_threads)
                .build();
            let render = &render;
            let per_chunk: Vec<Vec<Result<SerializedEvtxRecord<R>>>> = match pool {
                Ok(pool) => pool.install(|| {
                    indices
                        .par_iter()
                        .map(|&idx| self.decode_chunk(idx, render))
                        .collect()
                }),
                Err(_) => indices.iter().map(|&idx| self.decode_chunk(idx, render)).collect(),
            };
            return Box::new(per_chunk.into_iter().flatten());
        }

        Box::new(indices.into_iter().flat_map(move |idx| self.decode_chunk(idx, &render)))
    }

    /// Records rendered as XML documents (spec.md §4.9 "Records as XML strings").
    pub fn records(&self) -> impl Iterator<Item = Result<SerializedEvtxRecord<String>>> + '_ {
        let indent = self.config.indent;
        self.render_all(move |record| xml_output::render(&record.model, indent))
    }

    /// Records rendered as JSON text (spec.md §4.9 "Records as JSON value trees").
    pub fn records_json(&self) -> impl Iterator<Item = Result<SerializedEvtxRecord<String>>> + '_ {
        let separate = self.config.separate_json_attributes;
        let wide_int_mode = self.config.wide_int_mode;
        let indent = self.config.indent;
        self.render_all(move |record| {
            let value = json_output::build(&record.model, separate, wide_int_mode)?;
            if indent {
                serde_json::to_string_pretty(&value).map_err(EvtxError::from)
            } else {
                serde_json::to_string(&value).map_err(EvtxError::from)
            }
        })
    }

    /// Records rendered as `serde_json::Value` trees, skipping the
    /// text-serialization round trip `records_json` performs.
    pub fn records_json_value(&self) -> impl Iterator<Item = Result<SerializedEvtxRecord<Value>>> + '_ {
        let separate = self.config.separate_json_attributes;
        let wide_int_mode = self.config.wide_int_mode;
        self.render_all(move |record| json_output::build(&record.model, separate, wide_int_mode))
    }

    /// Records as the raw assembled `XmlModelItem` tree (spec.md §4.9
    /// "Records as typed value trees"): the strongly-typed value tree
    /// usable by downstream processing without committing to a text format.
    pub fn records_to_model(&self) -> impl Iterator<Item = Result<SerializedEvtxRecord<Vec<XmlModelItem>>>> + '_ {
        self.render_all(|record| Ok(record.model.clone()))
    }
}
