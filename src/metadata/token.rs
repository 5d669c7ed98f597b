//! Metadata tokens and the table identifiers they encode.
//!
//! A [`Token`] is a 32-bit value whose top byte selects a table ([`TableId`]) and whose low
//! 24 bits are a 1-based row index. Row `0` is the null reference.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::token::{TableId, Token};
//!
//! let token = Token::from_parts(TableId::MethodDef, 3);
//! assert_eq!(token.value(), 0x0600_0003);
//! assert_eq!(token.table_id(), Some(TableId::MethodDef));
//! assert_eq!(token.row(), 3);
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};

use strum::{Display, EnumIter};

/// Tables of a module image, with their ECMA-335 table numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter)]
#[repr(u8)]
pub enum TableId {
    /// External type references
    TypeRef = 0x01,
    /// Type definitions
    TypeDef = 0x02,
    /// Field definitions
    Field = 0x04,
    /// Method definitions
    MethodDef = 0x06,
    /// References to members of other types (external or generic instances)
    MemberRef = 0x0A,
    /// Custom attributes
    CustomAttribute = 0x0C,
    /// Constructed types (generic instances, arrays, ...)
    TypeSpec = 0x1B,
    /// The module's own assembly (single row, parent of assembly level attributes)
    Assembly = 0x20,
    /// Referenced assemblies
    AssemblyRef = 0x23,
    /// Generic method instantiations
    MethodSpec = 0x2B,
    /// Source documents (symbol file)
    Document = 0x30,
    /// Per-method sequence points (symbol file)
    MethodDebugInformation = 0x31,
    /// User string literals (`ldstr` operands)
    UserString = 0x70,
}

impl TableId {
    /// Map a raw table byte to a known table.
    #[must_use]
    pub fn from_u8(value: u8) -> Option<TableId> {
        Some(match value {
            0x01 => TableId::TypeRef,
            0x02 => TableId::TypeDef,
            0x04 => TableId::Field,
            0x06 => TableId::MethodDef,
            0x0A => TableId::MemberRef,
            0x0C => TableId::CustomAttribute,
            0x1B => TableId::TypeSpec,
            0x20 => TableId::Assembly,
            0x23 => TableId::AssemblyRef,
            0x2B => TableId::MethodSpec,
            0x30 => TableId::Document,
            0x31 => TableId::MethodDebugInformation,
            0x70 => TableId::UserString,
            _ => return None,
        })
    }
}

/// A metadata token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Token(pub u32);

impl Token {
    /// The null token.
    pub const NULL: Token = Token(0);

    /// Creates a new `Token` from a raw 32-bit value.
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Builds a token from a table and a 1-based row.
    #[must_use]
    pub fn from_parts(table: TableId, row: u32) -> Self {
        Token((u32::from(table as u8) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw 32-bit token value.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the table byte.
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Returns the table, if it is one this crate knows.
    #[must_use]
    pub fn table_id(&self) -> Option<TableId> {
        TableId::from_u8(self.table())
    }

    /// Returns `true` if the token points into `table`.
    #[must_use]
    pub fn is_table(&self, table: TableId) -> bool {
        self.table() == table as u8
    }

    /// Returns the 1-based row index.
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Zero-based index into the owning table, `None` for row 0.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        self.row().checked_sub(1).map(|row| row as usize)
    }

    /// Returns `true` if the token is the null token.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}
