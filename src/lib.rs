//! Decodes Windows EVTX event log files: file and chunk headers, the BinXML
//! token stream, template expansion, and rendering to XML or JSON.

mod binxml;
mod chunk;
mod cursor;
mod error;
mod expand;
mod file;
mod file_header;
mod json_output;
mod model;
mod name;
mod template;
mod time;
mod xml_output;

pub use crate::binxml::TypedValue;
pub use crate::error::{Diagnostic, EvtxError, Result};
pub use crate::file::{AnsiCodec, EvtxParser, ParserSettings, SerializedEvtxRecord};
pub use crate::file_header::FileHeader;
pub use crate::model::XmlModelItem;
pub use crate::time::Timestamp;
