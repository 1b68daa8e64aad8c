//! Chunk-local name table (spec.md §4.2, §3 "Name").
//!
//! Name references are 4-byte offsets into the owning chunk. The blob at
//! that offset is `next-name offset (u32), hash (u16), length in chars
//! (u16), UTF-16LE chars, trailing u32 of zeros`. Names are shared across
//! templates and records within one chunk, so resolution is memoized per
//! chunk: the same offset always yields the same (cheaply-cloned) string.

use std::collections::HashMap;
use std::rc::Rc;

use crate::cursor::ByteReader;
use crate::error::{EvtxError, Result};

/// Per-chunk cache mapping a name-reference offset to its decoded string.
#[derive(Debug, Default)]
pub struct NameCache {
    cache: HashMap<u32, Rc<str>>,
}

impl NameCache {
    pub fn new() -> Self {
        NameCache {
            cache: HashMap::new(),
        }
    }

    /// Resolves a name-reference offset against `chunk_data`, the raw
    /// 65,536-byte chunk slice. Offset 0 is the sentinel "no name" and is
    /// rejected by callers before reaching here; it is not itself a valid
    /// blob location.
    pub fn resolve(&mut self, chunk_data: &[u8], offset: u32) -> Result<Rc<str>> {
        if let Some(cached) = self.cache.get(&offset) {
            return Ok(Rc::clone(cached));
        }

        let name = self.read_name_blob(chunk_data, offset)?;
        let name: Rc<str> = Rc::from(name);
        self.cache.insert(offset, Rc::clone(&name));
        Ok(name)
    }

    fn read_name_blob(&self, chunk_data: &[u8], offset: u32) -> Result<String> {
        let mut reader = ByteReader::at(chunk_data, offset as usize);

        let _next_name_offset = reader.read_u32().map_err(|_| bad_name(offset, "link"))?;
        let _hash = reader.read_u16().map_err(|_| bad_name(offset, "hash"))?;
        let length = reader
            .read_u16()
            .map_err(|_| bad_name(offset, "length"))? as usize;

        let name = reader
            .read_utf16_units_exact(length)
            .map_err(|_| bad_name(offset, "utf16 chars"))?;

        // Trailing u32 terminator accounting; not validated, just consumed
        // so later offsets in the same blob chain reconcile correctly.
        let _ = reader.read_u32();

        Ok(name)
    }
}

fn bad_name(offset: u32, reason: &str) -> EvtxError {
    EvtxError::BadName {
        reason: reason.to_string(),
        offset: offset as u64,
    }
}
