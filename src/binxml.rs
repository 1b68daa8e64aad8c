//! BinXML value reader and token deserializer (spec.md §4.1, §4.3).
//!
//! These two components are developed together because the token
//! deserializer cannot make progress without the value reader (every
//! `Value`/`Attribute`/`Substitution` token bottoms out in a typed value),
//! and the value reader's one genuinely recursive case -- an embedded
//! BinXML fragment -- bottoms out back in the token deserializer.

use std::cell::RefCell;
use std::rc::Rc;

use encoding::EncodingRef;

use crate::cursor::ByteReader;
use crate::error::{EvtxError, Result};
use crate::time::Timestamp;

/// Maximum nesting depth for embedded BinXML fragments (spec.md §4.5).
pub const MAX_RECURSION_DEPTH: u32 = 256;

/// BinXML value-type tag byte (spec.md §3 TypedValue, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    String,
    AnsiString,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Real32,
    Real64,
    Bool,
    Binary,
    Guid,
    SizeT,
    FileTime,
    SysTime,
    Sid,
    HexInt32,
    HexInt64,
    EvtHandle,
    BinXml,
    EvtXml,
    StringArray,
    AnsiStringArray,
    Int8Array,
    UInt8Array,
    Int16Array,
    UInt16Array,
    Int32Array,
    UInt32Array,
    Int64Array,
    UInt64Array,
    Real32Array,
    Real64Array,
    BoolArray,
    BinaryArray,
    GuidArray,
    SizeTArray,
    FileTimeArray,
    SysTimeArray,
    SidArray,
    HexInt32Array,
    HexInt64Array,
}

impl ValueType {
    pub fn from_byte(b: u8) -> Option<ValueType> {
        use ValueType::*;
        Some(match b {
            0x00 => Null,
            0x01 => String,
            0x02 => AnsiString,
            0x03 => Int8,
            0x04 => UInt8,
            0x05 => Int16,
            0x06 => UInt16,
            0x07 => Int32,
            0x08 => UInt32,
            0x09 => Int64,
            0x0a => UInt64,
            0x0b => Real32,
            0x0c => Real64,
            0x0d => Bool,
            0x0e => Binary,
            0x0f => Guid,
            0x10 => SizeT,
            0x11 => FileTime,
            0x12 => SysTime,
            0x13 => Sid,
            0x14 => HexInt32,
            0x15 => HexInt64,
            0x20 => EvtHandle,
            0x21 => BinXml,
            0x23 => EvtXml,
            0x81 => StringArray,
            0x82 => AnsiStringArray,
            0x83 => Int8Array,
            0x84 => UInt8Array,
            0x85 => Int16Array,
            0x86 => UInt16Array,
            0x87 => Int32Array,
            0x88 => UInt32Array,
            0x89 => Int64Array,
            0x8a => UInt64Array,
            0x8b => Real32Array,
            0x8c => Real64Array,
            0x8d => BoolArray,
            0x8e => BinaryArray,
            0x8f => GuidArray,
            0x90 => SizeTArray,
            0x91 => FileTimeArray,
            0x92 => SysTimeArray,
            0x93 => SidArray,
            0x94 => HexInt32Array,
            0x95 => HexInt64Array,
            _ => return None,
        })
    }

    pub fn is_array(self) -> bool {
        matches!(self, ValueType::StringArray
            | ValueType::AnsiStringArray
            | ValueType::Int8Array
            | ValueType::UInt8Array
            | ValueType::Int16Array
            | ValueType::UInt16Array
            | ValueType::Int32Array
            | ValueType::UInt32Array
            | ValueType::Int64Array
            | ValueType::UInt64Array
            | ValueType::Real32Array
            | ValueType::Real64Array
            | ValueType::BoolArray
            | ValueType::BinaryArray
            | ValueType::GuidArray
            | ValueType::SizeTArray
            | ValueType::FileTimeArray
            | ValueType::SysTimeArray
            | ValueType::SidArray
            | ValueType::HexInt32Array
            | ValueType::HexInt64Array)
    }
}

/// A decoded BinXML value (spec.md §3 TypedValue).
#[derive(Debug, Clone)]
pub enum TypedValue {
    Null,
    String(String),
    AnsiString(String),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    Bool(bool),
    Binary(Vec<u8>),
    Guid(String),
    SizeT(u64),
    FileTime(Timestamp),
    SysTime(Timestamp),
    Sid(String),
    HexInt32(String),
    HexInt64(String),
    EvtHandle(u64),
    /// An embedded BinXML fragment, tokenized but not yet expanded
    /// (expansion happens during template expansion, spec.md §4.5 rule 2).
    BinXmlFragment(Vec<DeserializedToken>),
    StringArray(Vec<String>),
    AnsiStringArray(Vec<String>),
    Int8Array(Vec<i8>),
    UInt8Array(Vec<u8>),
    Int16Array(Vec<i16>),
    UInt16Array(Vec<u16>),
    Int32Array(Vec<i32>),
    UInt32Array(Vec<u32>),
    Int64Array(Vec<i64>),
    UInt64Array(Vec<u64>),
    Real32Array(Vec<f32>),
    Real64Array(Vec<f64>),
    BoolArray(Vec<bool>),
    BinaryArray(Vec<Vec<u8>>),
    GuidArray(Vec<String>),
    SizeTArray(Vec<u64>),
    FileTimeArray(Vec<Timestamp>),
    SysTimeArray(Vec<Timestamp>),
    SidArray(Vec<String>),
    HexInt32Array(Vec<String>),
    HexInt64Array(Vec<String>),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// True for a value that renders as the empty string (spec.md §4.7:
    /// "Attribute values that decode to the empty string are omitted").
    pub fn is_empty_string(&self) -> bool {
        match self {
            TypedValue::String(s) | TypedValue::AnsiString(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Renders the scalar display form used for XML text/attribute values
    /// and as the JSON string fallback.
    pub fn to_display_string(&self) -> String {
        match self {
            TypedValue::Null => String::new(),
            TypedValue::String(s) | TypedValue::AnsiString(s) => s.clone(),
            TypedValue::Int8(v) => v.to_string(),
            TypedValue::UInt8(v) => v.to_string(),
            TypedValue::Int16(v) => v.to_string(),
            TypedValue::UInt16(v) => v.to_string(),
            TypedValue::Int32(v) => v.to_string(),
            TypedValue::UInt32(v) => v.to_string(),
            TypedValue::Int64(v) => v.to_string(),
            TypedValue::UInt64(v) => v.to_string(),
            TypedValue::Real32(v) => v.to_string(),
            TypedValue::Real64(v) => v.to_string(),
            TypedValue::Bool(v) => v.to_string(),
            TypedValue::Binary(b) => hex_no_prefix(b),
            TypedValue::Guid(s) | TypedValue::Sid(s) => s.clone(),
            TypedValue::SizeT(v) => v.to_string(),
            TypedValue::FileTime(t) | TypedValue::SysTime(t) => t.to_iso8601(),
            TypedValue::HexInt32(s) | TypedValue::HexInt64(s) => s.clone(),
            TypedValue::EvtHandle(v) => v.to_string(),
            TypedValue::BinXmlFragment(_) => String::new(),
            TypedValue::StringArray(v) | TypedValue::AnsiStringArray(v) => v.join(","),
            TypedValue::Int8Array(v) => join(v),
            TypedValue::UInt8Array(v) => join(v),
            TypedValue::Int16Array(v) => join(v),
            TypedValue::UInt16Array(v) => join(v),
            TypedValue::Int32Array(v) => join(v),
            TypedValue::UInt32Array(v) => join(v),
            TypedValue::Int64Array(v) => join(v),
            TypedValue::UInt64Array(v) => join(v),
            TypedValue::Real32Array(v) => join(v),
            TypedValue::Real64Array(v) => join(v),
            TypedValue::BoolArray(v) => join(v),
            TypedValue::BinaryArray(v) => v.iter().map(|b| hex_no_prefix(b)).collect::<Vec<_>>().join(","),
            TypedValue::GuidArray(v) | TypedValue::SidArray(v) => v.join(","),
            TypedValue::SizeTArray(v) => join(v),
            TypedValue::FileTimeArray(v) | TypedValue::SysTimeArray(v) => v
                .iter()
                .map(|t| t.to_iso8601())
                .collect::<Vec<_>>()
                .join(","),
            TypedValue::HexInt32Array(v) | TypedValue::HexInt64Array(v) => v.join(","),
        }
    }
}

fn join<T: ToString>(v: &[T]) -> String {
    v.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

fn hex_no_prefix(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Formats an unsigned integer the way spec.md §4.1 requires for hex
/// types: `0x` followed by lowercase digits, no zero padding.
fn format_hex(value: u64) -> String {
    format!("0x{value:x}")
}

/// A token produced by tokenizing a BinXML byte stream (spec.md §3
/// DeserializedToken, §4.3).
#[derive(Debug, Clone)]
pub enum DeserializedToken {
    FragmentHeader { major: u8, minor: u8, flags: u8 },
    TemplateInstance {
        definition_offset: u32,
        /// Shared + interior-mutable so the expander can null out a slot
        /// the instant it is consumed (spec.md §4.5 idempotence rule).
        substitutions: Rc<RefCell<Vec<TypedValue>>>,
    },
    OpenStartElement { data_size: u32, name_offset: u32 },
    AttributeList,
    Attribute { name_offset: u32 },
    CloseStartElement,
    CloseEmptyElement,
    CloseElement,
    Value(TypedValue),
    CDataSection(String),
    CharRef(char),
    EntityRef { name_offset: u32 },
    PITarget { name_offset: u32 },
    PIData(String),
    Substitution {
        index: u16,
        value_type: ValueType,
        optional: bool,
    },
    EndOfStream,
    StartOfStream,
}

/// Reads BinXML tokens from a cursor, sharing that cursor across
/// recursive descents into embedded fragments and template-instance
/// substitutions (spec.md §4.3).
pub struct TokenReader<'a, 'b> {
    reader: &'b mut ByteReader<'a>,
    ansi_codec: EncodingRef,
    depth: u32,
    pub diagnostics: Vec<(u64, String)>,
}

impl<'a, 'b> TokenReader<'a, 'b> {
    pub fn new(reader: &'b mut ByteReader<'a>, ansi_codec: EncodingRef) -> Self {
        TokenReader {
            reader,
            ansi_codec,
            depth: 0,
            diagnostics: Vec::new(),
        }
    }

    fn note(&mut self, offset: u64, message: impl Into<String>) {
        self.diagnostics.push((offset, message.into()));
    }

    fn check_depth(&self, offset: u64) -> Result<()> {
        if self.depth > MAX_RECURSION_DEPTH {
            return Err(EvtxError::TemplateRecursion {
                offset,
                max_depth: MAX_RECURSION_DEPTH,
            });
        }
        Ok(())
    }

    /// Reads tokens until `EndOfStream` (consumed, not emitted) or the
    /// cursor is exhausted.
    pub fn read_all(&mut self) -> Result<Vec<DeserializedToken>> {
        let mut tokens = Vec::new();
        while self.reader.remaining() > 0 {
            match self.read_one()? {
                Some(token) => tokens.push(token),
                None => break,
            }
        }
        Ok(tokens)
    }

    /// Reads a single token, returning `None` at `EndOfStream`.
    pub fn read_one(&mut self) -> Result<Option<DeserializedToken>> {
        let offset = self.reader.position();
        let raw = self.reader.read_u8()?;

        Ok(Some(match raw {
            0x00 => return Ok(None),
            0x01 | 0x41 => self.read_open_start_element(raw == 0x41, offset)?,
            0x02 => DeserializedToken::CloseStartElement,
            0x03 => DeserializedToken::CloseEmptyElement,
            0x04 => DeserializedToken::CloseElement,
            0x05 | 0x45 => self.read_inline_value()?,
            0x06 | 0x46 => self.read_attribute()?,
            0x07 | 0x47 => self.read_cdata()?,
            0x08 | 0x48 => self.read_char_ref()?,
            0x09 | 0x49 => self.read_entity_ref()?,
            0x0a => self.read_pi_target()?,
            0x0b => self.read_pi_data()?,
            0x0c => self.read_template_instance()?,
            0x0d => self.read_substitution(false)?,
            0x0e => self.read_substitution(true)?,
            0x0f => self.read_fragment_header()?,
            0x21 => self.read_embedded_binxml(offset)?,
            other => return Err(EvtxError::UnexpectedToken { token: other, offset }),
        }))
    }

    fn read_fragment_header(&mut self) -> Result<DeserializedToken> {
        let major = self.reader.read_u8()?;
        let minor = self.reader.read_u8()?;
        let flags = self.reader.read_u8()?;
        Ok(DeserializedToken::FragmentHeader { major, minor, flags })
    }

    fn read_open_start_element(&mut self, has_attributes: bool, token_offset: u64) -> Result<DeserializedToken> {
        let remaining_before = self.reader.remaining() as u64 + 1; // +1 for the token byte already read
        let rewind_point = self.reader.position();

        let _dependency_id = self.reader.read_u16()?;
        let mut data_size = self.reader.read_u32()?;
        let mut name_offset = self.reader.read_u32()?;

        if data_size as u64 > remaining_before {
            // Recovery per spec.md §4.3: this element was produced inside a
            // substitution and carries no dependency identifier.
            self.note(token_offset, "open-start-element missing dependency id, rewinding");
            self.reader.seek(rewind_point)?;
            data_size = self.reader.read_u32()?;
            name_offset = self.reader.read_u32()?;
        }

        if has_attributes {
            let _attribute_list_data_size = self.reader.read_u32()?;
        }

        Ok(DeserializedToken::OpenStartElement { data_size, name_offset })
    }

    fn read_attribute(&mut self) -> Result<DeserializedToken> {
        let name_offset = self.reader.read_u32()?;
        Ok(DeserializedToken::Attribute { name_offset })
    }

    fn read_value_type_byte(&mut self, offset: u64) -> Result<ValueType> {
        let raw = self.reader.read_u8()?;
        ValueType::from_byte(raw).ok_or(EvtxError::UnexpectedValueType { value_type: raw, offset })
    }

    fn read_inline_value(&mut self) -> Result<DeserializedToken> {
        let offset = self.reader.position();
        let value_type = self.read_value_type_byte(offset)?;
        let value = self.read_value(value_type, None, offset)?;
        Ok(DeserializedToken::Value(value))
    }

    fn read_cdata(&mut self) -> Result<DeserializedToken> {
        Ok(DeserializedToken::CDataSection(self.reader.read_utf16_len_prefixed()?))
    }

    fn read_char_ref(&mut self) -> Result<DeserializedToken> {
        let code = self.reader.read_u16()?;
        let ch = char::from_u32(code as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
        Ok(DeserializedToken::CharRef(ch))
    }

    fn read_entity_ref(&mut self) -> Result<DeserializedToken> {
        let name_offset = self.reader.read_u32()?;
        Ok(DeserializedToken::EntityRef { name_offset })
    }

    fn read_pi_target(&mut self) -> Result<DeserializedToken> {
        let name_offset = self.reader.read_u32()?;
        Ok(DeserializedToken::PITarget { name_offset })
    }

    fn read_pi_data(&mut self) -> Result<DeserializedToken> {
        Ok(DeserializedToken::PIData(self.reader.read_utf16_len_prefixed()?))
    }

    fn read_embedded_binxml(&mut self, token_offset: u64) -> Result<DeserializedToken> {
        self.depth += 1;
        self.check_depth(token_offset)?;
        let tokens = self.read_all();
        self.depth -= 1;
        Ok(DeserializedToken::Value(TypedValue::BinXmlFragment(tokens?)))
    }

    fn read_substitution(&mut self, optional: bool) -> Result<DeserializedToken> {
        let offset = self.reader.position();
        let index = self.reader.read_u16()?;
        let value_type = self.read_value_type_byte(offset)?;
        Ok(DeserializedToken::Substitution { index, value_type, optional })
    }

    fn read_template_instance(&mut self) -> Result<DeserializedToken> {
        let _reserved = self.reader.read_u8()?;
        let _template_id = self.reader.read_u32()?;
        let definition_offset = self.reader.read_u32()?;

        if self.reader.position() == definition_offset as u64 {
            // Definition body inlines here; skip past it. The chunk's
            // TemplateCache is responsible for actually parsing these same
            // bytes (spec.md §4.4).
            let _next_template_offset = self.reader.read_u32()?;
            let _guid = self.reader.read_guid()?;
            let data_size = self.reader.read_u32()?;
            self.reader.advance(data_size as usize)?;
        }

        let substitution_count = self.reader.read_u32()?;

        // Two-phase layout (spec.md §4.3): all `substitution_count`
        // descriptors (size u16, type u8, pad u8) are laid out contiguously
        // first; only after the last descriptor do the values themselves
        // begin, back-to-back. Reading a descriptor and its value in
        // lockstep (as if they interleaved) misparses every real record
        // with more than one substitution.
        let mut descriptors = Vec::with_capacity(substitution_count as usize);
        for _ in 0..substitution_count {
            let size = self.reader.read_u16()?;
            let raw_type = self.reader.read_u8()?;
            let _pad = self.reader.read_u8()?;
            descriptors.push((size, raw_type));
        }

        let mut substitutions = Vec::with_capacity(descriptors.len());
        for (size, raw_type) in descriptors {
            let value_start = self.reader.position();
            let value_type = ValueType::from_byte(raw_type)
                .ok_or(EvtxError::UnexpectedValueType { value_type: raw_type, offset: value_start })?;

            let value = if size == 0 {
                TypedValue::Null
            } else {
                self.read_value(value_type, Some(u32::from(size)), value_start)?
            };

            let expected_end = value_start + u64::from(size);
            let actual_end = self.reader.position();
            if actual_end != expected_end {
                if actual_end < expected_end {
                    self.note(value_start, "substitution value under-read, resynchronizing");
                } else {
                    log::warn!(
                        "offset {value_start}: substitution value over-read by {} bytes, resynchronizing (possible corruption)",
                        actual_end - expected_end
                    );
                }
                self.reader.seek(expected_end)?;
            }

            substitutions.push(value);
        }

        Ok(DeserializedToken::TemplateInstance {
            definition_offset,
            substitutions: Rc::new(RefCell::new(substitutions)),
        })
    }

    /// Dispatches on a value-type tag to decode a `TypedValue` (spec.md §4.1).
    ///
    /// `size` is `Some(n)` for a substitution slot (exactly `n` bytes must
    /// be consumed) or `None` for an inline value (self-describing length).
    pub fn read_value(&mut self, value_type: ValueType, size: Option<u32>, offset: u64) -> Result<TypedValue> {
        use ValueType::*;

        if value_type.is_array() {
            return self.read_array_value(value_type, size, offset);
        }

        Ok(match value_type {
            Null => TypedValue::Null,
            String => TypedValue::String(self.read_string_payload(size)?),
            AnsiString => TypedValue::AnsiString(self.read_ansi_payload(size)?),
            Int8 => TypedValue::Int8(self.reader.read_i8()?),
            UInt8 => TypedValue::UInt8(self.reader.read_u8()?),
            Int16 => TypedValue::Int16(self.reader.read_i16()?),
            UInt16 => TypedValue::UInt16(self.reader.read_u16()?),
            Int32 => TypedValue::Int32(self.reader.read_i32()?),
            UInt32 => TypedValue::UInt32(self.reader.read_u32()?),
            Int64 => TypedValue::Int64(self.reader.read_i64()?),
            UInt64 => TypedValue::UInt64(self.reader.read_u64()?),
            Real32 => TypedValue::Real32(self.reader.read_f32()?),
            Real64 => TypedValue::Real64(self.reader.read_f64()?),
            Bool => TypedValue::Bool(self.reader.read_bool()?),
            Binary => TypedValue::Binary(self.read_binary_payload(size)?),
            Guid => TypedValue::Guid(self.reader.read_guid()?),
            SizeT => TypedValue::SizeT(self.read_sized_uint(size)?),
            FileTime => TypedValue::FileTime(self.reader.read_filetime()?),
            SysTime => TypedValue::SysTime(self.reader.read_systemtime()?),
            Sid => TypedValue::Sid(self.reader.read_sid()?),
            HexInt32 => TypedValue::HexInt32(format_hex(self.reader.read_u32()? as u64)),
            HexInt64 => TypedValue::HexInt64(format_hex(self.reader.read_u64()?)),
            EvtHandle => TypedValue::EvtHandle(self.reader.read_u64()?),
            BinXml | EvtXml => self.read_embedded_fragment_value(size, offset)?,
            _ => unreachable!("array types are handled above"),
        })
    }

    fn read_sized_uint(&mut self, size: Option<u32>) -> Result<u64> {
        match size {
            Some(8) => Ok(self.reader.read_u64()?),
            _ => Ok(u64::from(self.reader.read_u32()?)),
        }
    }

    fn read_string_payload(&mut self, size: Option<u32>) -> Result<String> {
        match size {
            Some(byte_len) => self.reader.read_utf16_units_exact(byte_len as usize / 2),
            None => self.reader.read_utf16_len_prefixed(),
        }
    }

    fn read_ansi_payload(&mut self, size: Option<u32>) -> Result<String> {
        let byte_len = match size {
            Some(n) => n as usize,
            None => self.reader.read_u32()? as usize,
        };
        self.reader.read_ansi(byte_len, self.ansi_codec)
    }

    fn read_binary_payload(&mut self, size: Option<u32>) -> Result<Vec<u8>> {
        let byte_len = match size {
            Some(n) => n as usize,
            None => self.reader.read_u32()? as usize,
        };
        Ok(self.reader.read_bytes(byte_len, "binary value")?.to_vec())
    }

    fn read_embedded_fragment_value(&mut self, size: Option<u32>, offset: u64) -> Result<TypedValue> {
        self.depth += 1;
        self.check_depth(offset)?;
        let tokens = match size {
            Some(n) => {
                let bytes = self.reader.read_bytes(n as usize, "embedded binxml value")?;
                let mut sub_reader = ByteReader::new(bytes);
                let mut sub = TokenReader {
                    reader: &mut sub_reader,
                    ansi_codec: self.ansi_codec,
                    depth: self.depth,
                    diagnostics: Vec::new(),
                };
                let result = sub.read_all();
                self.diagnostics.append(&mut sub.diagnostics);
                result
            }
            None => self.read_all(),
        };
        self.depth -= 1;
        Ok(TypedValue::BinXmlFragment(tokens?))
    }

    fn read_array_value(&mut self, value_type: ValueType, size: Option<u32>, offset: u64) -> Result<TypedValue> {
        use ValueType::*;

        let byte_len = match size {
            Some(n) => n as usize,
            None => self.reader.read_u16()? as usize,
        };
        let bytes = self.reader.read_bytes(byte_len, "array value")?;
        let mut sub = ByteReader::new(bytes);

        macro_rules! fixed_width_array {
            ($width:expr, $read:expr) => {{
                let count = if $width == 0 { 0 } else { byte_len / $width };
                let mut out = Vec::with_capacity(count);
                for _ in 0..count {
                    out.push($read(&mut sub)?);
                }
                out
            }};
        }

        Ok(match value_type {
            StringArray => {
                let mut out = Vec::new();
                while sub.remaining() > 0 {
                    out.push(sub.read_utf16_nul_terminated()?);
                }
                TypedValue::StringArray(out)
            }
            AnsiStringArray => {
                let mut out = Vec::new();
                let mut acc = Vec::new();
                while sub.remaining() > 0 {
                    let b = sub.read_u8()?;
                    if b == 0 {
                        out.push(self.ansi_codec.decode(&acc, encoding::DecoderTrap::Replace).unwrap_or_default());
                        acc.clear();
                    } else {
                        acc.push(b);
                    }
                }
                TypedValue::AnsiStringArray(out)
            }
            Int8Array => TypedValue::Int8Array(fixed_width_array!(1, ByteReader::read_i8)),
            UInt8Array => TypedValue::UInt8Array(fixed_width_array!(1, ByteReader::read_u8)),
            Int16Array => TypedValue::Int16Array(fixed_width_array!(2, ByteReader::read_i16)),
            UInt16Array => TypedValue::UInt16Array(fixed_width_array!(2, ByteReader::read_u16)),
            Int32Array => TypedValue::Int32Array(fixed_width_array!(4, ByteReader::read_i32)),
            UInt32Array => TypedValue::UInt32Array(fixed_width_array!(4, ByteReader::read_u32)),
            Int64Array => TypedValue::Int64Array(fixed_width_array!(8, ByteReader::read_i64)),
            UInt64Array => TypedValue::UInt64Array(fixed_width_array!(8, ByteReader::read_u64)),
            Real32Array => TypedValue::Real32Array(fixed_width_array!(4, ByteReader::read_f32)),
            Real64Array => TypedValue::Real64Array(fixed_width_array!(8, ByteReader::read_f64)),
            BoolArray => TypedValue::BoolArray(fixed_width_array!(4, ByteReader::read_bool)),
            GuidArray => TypedValue::GuidArray(fixed_width_array!(16, ByteReader::read_guid)),
            SizeTArray => TypedValue::SizeTArray(fixed_width_array!(4, |r: &mut ByteReader| r.read_u32().map(u64::from))),
            FileTimeArray => TypedValue::FileTimeArray(fixed_width_array!(8, ByteReader::read_filetime)),
            SysTimeArray => TypedValue::SysTimeArray(fixed_width_array!(16, ByteReader::read_systemtime)),
            HexInt32Array => TypedValue::HexInt32Array(fixed_width_array!(4, |r: &mut ByteReader| r.read_u32().map(|v| format_hex(v as u64))) ),
            HexInt64Array => TypedValue::HexInt64Array(fixed_width_array!(8, |r: &mut ByteReader| r.read_u64().map(format_hex))),
            SidArray => {
                let mut out = Vec::new();
                while sub.remaining() > 0 {
                    out.push(sub.read_sid()?);
                }
                TypedValue::SidArray(out)
            }
            BinaryArray => TypedValue::BinaryArray(vec![bytes.to_vec()]),
            _ => return Err(EvtxError::UnexpectedValueType { value_type: 0xff, offset }),
        })
    }
}
