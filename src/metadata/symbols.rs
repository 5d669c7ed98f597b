//! Companion debug symbols: source documents and sequence points.
//!
//! A symbol file maps each method to the source document it was compiled from, plus the
//! IL offset to line mapping used by debuggers. The patch engine only needs the document
//! identity (to find methods that share a file with a changed method), but the full
//! sequence points are read and written so that a rewritten module ships with symbols
//! that are as complete as the candidate's.
//!
//! # Format
//!
//! Magic `DPDB`, a `u16` version, the Document table (0x30) as 7-bit prefixed names, then the
//! MethodDebugInformation table (0x31): method token, document token and a blob of sequence
//! points in the PortablePDB delta encoding.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::{symbols::{DebugSymbols, SequencePoint}, token::Token};
//!
//! let mut symbols = DebugSymbols::default();
//! let doc = symbols.add_document("Assets/Player.cs");
//! symbols.add_method(Token::new(0x0600_0001), doc, vec![SequencePoint::new(0, 12, 5, 12, 30)]);
//!
//! let bytes = symbols.write()?;
//! let parsed = DebugSymbols::read(&bytes)?;
//! assert_eq!(parsed.document_of(Token::new(0x0600_0001)), Some("Assets/Player.cs"));
//! # Ok::<(), dotpatch::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    file::{parser::Parser, writer::BlobWriter},
    metadata::token::{TableId, Token},
    Result,
};

/// Leading bytes of a symbol file.
pub const SYMBOLS_MAGIC: &[u8; 4] = b"DPDB";
/// Supported symbol file version.
pub const SYMBOLS_VERSION: u16 = 1;
/// Line number that marks a hidden sequence point.
pub const HIDDEN_LINE: u32 = 0x00FE_EFEE;

/// Maps one IL offset to a source range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePoint {
    /// IL offset within the method body
    pub il_offset: u32,
    /// First line (1-based)
    pub start_line: u32,
    /// First column (1-based)
    pub start_col: u16,
    /// Last line
    pub end_line: u32,
    /// Last column
    pub end_col: u16,
    /// Compiler generated code without a source location
    pub is_hidden: bool,
}

impl SequencePoint {
    /// A visible sequence point.
    #[must_use]
    pub fn new(il_offset: u32, start_line: u32, start_col: u16, end_line: u32, end_col: u16) -> Self {
        SequencePoint {
            il_offset,
            start_line,
            start_col,
            end_line,
            end_col,
            is_hidden: start_line == HIDDEN_LINE,
        }
    }
}

/// Debug information of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDebugInformation {
    /// The `MethodDef` this entry describes
    pub method: Token,
    /// The `Document` the method was compiled from
    pub document: Token,
    /// Sequence points ordered by IL offset
    pub sequence_points: Vec<SequencePoint>,
}

/// The contents of a symbol file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugSymbols {
    /// Document names, indexed by `Document` row - 1
    pub documents: Vec<String>,
    /// Per-method information
    pub methods: Vec<MethodDebugInformation>,
}

impl DebugSymbols {
    /// Add a document, returning the existing token if the name is already present.
    pub fn add_document(&mut self, name: impl Into<String>) -> Token {
        let name = name.into();
        let index = match self.documents.iter().position(|doc| *doc == name) {
            Some(index) => index,
            None => {
                self.documents.push(name);
                self.documents.len() - 1
            }
        };
        Token::from_parts(TableId::Document, index as u32 + 1)
    }

    /// Record debug information for `method`, replacing an earlier entry.
    pub fn add_method(&mut self, method: Token, document: Token, sequence_points: Vec<SequencePoint>) {
        self.methods.retain(|info| info.method != method);
        self.methods.push(MethodDebugInformation {
            method,
            document,
            sequence_points,
        });
    }

    /// Name of the source document `method` was compiled from.
    #[must_use]
    pub fn document_of(&self, method: Token) -> Option<&str> {
        let info = self.methods.iter().find(|info| info.method == method)?;
        info.document
            .index()
            .and_then(|index| self.documents.get(index))
            .map(String::as_str)
    }

    /// Method to document lookup table.
    #[must_use]
    pub fn document_map(&self) -> HashMap<Token, &str> {
        self.methods
            .iter()
            .filter_map(|info| {
                let name = info.document.index().and_then(|i| self.documents.get(i))?;
                Some((info.method, name.as_str()))
            })
            .collect()
    }

    /// Parse a symbol file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a bad magic, version or table id, or a document
    /// token that does not exist, and [`crate::Error::OutOfBounds`] for truncated data.
    pub fn read(data: &[u8]) -> Result<DebugSymbols> {
        let mut parser = Parser::new(data);

        let magic = parser.read_bytes(SYMBOLS_MAGIC.len())?;
        if magic != SYMBOLS_MAGIC {
            return Err(malformed_error!("Invalid symbol file magic - {:02x?}", magic));
        }
        let version = parser.read_le::<u16>()?;
        if version != SYMBOLS_VERSION {
            return Err(malformed_error!("Unsupported symbol file version - {}", version));
        }

        expect_table(&mut parser, TableId::Document)?;
        let count = parser.read_compressed_uint()?;
        let mut documents = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            documents.push(parser.read_prefixed_string_utf8()?);
        }

        expect_table(&mut parser, TableId::MethodDebugInformation)?;
        let count = parser.read_compressed_uint()?;
        let mut methods = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let method = Token::new(parser.read_le::<u32>()?);
            let document = Token::new(parser.read_le::<u32>()?);
            if document.index().map_or(true, |index| index >= documents.len()) {
                return Err(malformed_error!(
                    "Method {} references missing document {}",
                    method,
                    document
                ));
            }
            let sequence_points = parse_sequence_points(parser.read_blob()?)?;
            methods.push(MethodDebugInformation {
                method,
                document,
                sequence_points,
            });
        }

        Ok(DebugSymbols { documents, methods })
    }

    /// Serialize to the symbol file format.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a sequence point cannot be delta encoded.
    pub fn write(&self) -> Result<Vec<u8>> {
        let mut writer = BlobWriter::new();
        writer.write_bytes(SYMBOLS_MAGIC);
        writer.write_le::<u16>(SYMBOLS_VERSION);

        writer.write_le::<u8>(TableId::Document as u8);
        writer.write_compressed_uint(self.documents.len() as u32)?;
        for document in &self.documents {
            writer.write_prefixed_string_utf8(document);
        }

        writer.write_le::<u8>(TableId::MethodDebugInformation as u8);
        writer.write_compressed_uint(self.methods.len() as u32)?;
        for info in &self.methods {
            writer.write_le::<u32>(info.method.value());
            writer.write_le::<u32>(info.document.value());
            writer.write_blob(&encode_sequence_points(&info.sequence_points)?)?;
        }

        Ok(writer.into_inner())
    }
}

fn expect_table(parser: &mut Parser<'_>, table: TableId) -> Result<()> {
    let id = parser.read_le::<u8>()?;
    if id != table as u8 {
        return Err(malformed_error!(
            "Expected table {} in symbol file, found 0x{:02x}",
            table,
            id
        ));
    }
    Ok(())
}

/// Decode a delta encoded sequence point blob.
///
/// The first record stores absolute values; later records store the IL offset delta as an
/// unsigned and the start line/column deltas as signed compressed integers. End line and
/// column are always unsigned deltas from the start.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a delta leaves the valid range, or
/// [`crate::Error::OutOfBounds`] for a truncated blob.
pub fn parse_sequence_points(blob: &[u8]) -> Result<Vec<SequencePoint>> {
    let mut parser = Parser::new(blob);
    let mut points = Vec::new();
    let mut il_offset = 0u32;
    let mut start_line = 0u32;
    let mut start_col = 0u16;
    let mut first = true;

    while parser.has_more_data() {
        let il_offset_delta = parser.read_compressed_uint()?;
        if first {
            il_offset = il_offset_delta;
            start_line = parser.read_compressed_uint()?;
            start_col = u16::try_from(parser.read_compressed_uint()?)
                .map_err(|_| malformed_error!("Sequence point column out of range"))?;
        } else {
            il_offset = il_offset
                .checked_add(il_offset_delta)
                .ok_or_else(|| malformed_error!("Sequence point IL offset overflow"))?;
            let line_delta = parser.read_compressed_int()?;
            let col_delta = parser.read_compressed_int()?;
            start_line = start_line
                .checked_add_signed(line_delta)
                .ok_or_else(|| malformed_error!("Sequence point line out of range"))?;
            start_col = i32::from(start_col)
                .checked_add(col_delta)
                .and_then(|col| u16::try_from(col).ok())
                .ok_or_else(|| malformed_error!("Sequence point column out of range"))?;
        }

        let end_line_delta = parser.read_compressed_uint()?;
        let end_col_delta = parser.read_compressed_uint()?;
        let end_line = start_line
            .checked_add(end_line_delta)
            .ok_or_else(|| malformed_error!("Sequence point end line out of range"))?;
        let end_col = u32::from(start_col)
            .checked_add(end_col_delta)
            .and_then(|col| u16::try_from(col).ok())
            .ok_or_else(|| malformed_error!("Sequence point end column out of range"))?;

        points.push(SequencePoint {
            il_offset,
            start_line,
            start_col,
            end_line,
            end_col,
            is_hidden: start_line == HIDDEN_LINE,
        });
        first = false;
    }

    Ok(points)
}

/// Encode sequence points into the delta format read by [`parse_sequence_points`].
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if points are not ordered by IL offset or end before
/// they start.
pub fn encode_sequence_points(points: &[SequencePoint]) -> Result<Vec<u8>> {
    let mut writer = BlobWriter::new();
    let mut previous: Option<&SequencePoint> = None;

    for point in points {
        match previous {
            None => {
                writer.write_compressed_uint(point.il_offset)?;
                writer.write_compressed_uint(point.start_line)?;
                writer.write_compressed_uint(u32::from(point.start_col))?;
            }
            Some(prev) => {
                let il_delta = point.il_offset.checked_sub(prev.il_offset).ok_or_else(|| {
                    malformed_error!("Sequence points out of order at IL_{:04x}", point.il_offset)
                })?;
                writer.write_compressed_uint(il_delta)?;
                let line_delta = i64::from(point.start_line) - i64::from(prev.start_line);
                let line_delta = i32::try_from(line_delta)
                    .map_err(|_| malformed_error!("Sequence point line delta out of range"))?;
                writer.write_compressed_int(line_delta)?;
                writer.write_compressed_int(i32::from(point.start_col) - i32::from(prev.start_col))?;
            }
        }

        let end_line_delta = point.end_line.checked_sub(point.start_line).ok_or_else(|| {
            malformed_error!("Sequence point at IL_{:04x} ends before it starts", point.il_offset)
        })?;
        let end_col_delta = point.end_col.checked_sub(point.start_col).ok_or_else(|| {
            malformed_error!("Sequence point at IL_{:04x} ends before it starts", point.il_offset)
        })?;
        writer.write_compressed_uint(end_line_delta)?;
        writer.write_compressed_uint(u32::from(end_col_delta))?;

        previous = Some(point);
    }

    Ok(writer.into_inner())
}
