//! Low-level byte stream parser for module images, signatures and CIL bytecode.
//!
//! This module provides the [`crate::file::parser::Parser`] type, a cursor-based binary data
//! parser with bounds-checked access, ECMA-335 compressed integers, 7-bit encoded lengths and
//! prefixed UTF-8 strings. Every decoder in the crate (image reader, symbol reader, signature
//! parser, instruction decoder) reads through it.
//!
//! # Usage Examples
//!
//! ```rust
//! use dotpatch::Parser;
//!
//! let data = [0x01, 0x02, 0x03, 0x04];
//! let mut parser = Parser::new(&data);
//!
//! let value = parser.read_le::<u16>()?;
//! assert_eq!(value, 0x0201);
//! assert_eq!(parser.remaining(), 2);
//! # Ok::<(), dotpatch::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    metadata::token::Token,
    Result,
};

/// A cursor over a byte slice.
///
/// `Parser` maintains an internal position and refuses every read that would run past the
/// end of the data, so malformed or truncated input surfaces as [`crate::Error::OutOfBounds`]
/// or [`crate::Error::Malformed`] instead of a panic.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new [`crate::file::parser::Parser`] from a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns the length of the underlying data buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the parser has no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if there is more data available to parse.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Number of bytes left after the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Get the current position of the parser within the data buffer.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move the current position to the specified index.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is beyond the data length.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds_error!());
        }

        self.position = pos;
        Ok(())
    }

    /// Move the position forward by one byte.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing would exceed the data length.
    pub fn advance(&mut self) -> Result<()> {
        self.advance_by(1)
    }

    /// Move the position forward by the specified number of bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if advancing by step would exceed the data length.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        if step > self.remaining() {
            return Err(out_of_bounds_error!());
        }

        self.position += step;
        Ok(())
    }

    /// Peek at the next byte without advancing the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if position is at or beyond the data length.
    pub fn peek_byte(&self) -> Result<u8> {
        if self.position >= self.data.len() {
            return Err(out_of_bounds_error!());
        }
        Ok(self.data[self.position])
    }

    /// Read a type `T` from the current position in little-endian format and advance the position.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if reading would exceed the data length.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a compressed unsigned integer (ECMA-335 II.23.2).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid lead byte, or
    /// [`crate::Error::OutOfBounds`] if the encoding is truncated.
    pub fn read_compressed_uint(&mut self) -> Result<u32> {
        let first_byte = self.read_le::<u8>()?;

        // 1-byte encoding: 0xxxxxxx
        if (first_byte & 0x80) == 0 {
            return Ok(u32::from(first_byte));
        }

        // 2-byte encoding: 10xxxxxx xxxxxxxx
        if (first_byte & 0xC0) == 0x80 {
            let second_byte = self.read_le::<u8>()?;
            let value = ((u32::from(first_byte) & 0x3F) << 8) | u32::from(second_byte);
            return Ok(value);
        }

        // 4-byte encoding: 11xxxxxx xxxxxxxx xxxxxxxx xxxxxxxx
        if (first_byte & 0xE0) == 0xC0 {
            let b1 = u32::from(self.read_le::<u8>()?);
            let b2 = u32::from(self.read_le::<u8>()?);
            let b3 = u32::from(self.read_le::<u8>()?);
            let value = ((u32::from(first_byte) & 0x1F) << 24) | (b1 << 16) | (b2 << 8) | b3;
            return Ok(value);
        }

        Err(malformed_error!("Invalid compressed uint - {}", first_byte))
    }

    /// Read a compressed signed integer, using the low bit as sign.
    ///
    /// # Errors
    /// Same conditions as [`Parser::read_compressed_uint`].
    pub fn read_compressed_int(&mut self) -> Result<i32> {
        let unsigned = self.read_compressed_uint()?;

        #[allow(clippy::cast_possible_wrap)]
        let signed = if (unsigned & 1) == 0 {
            (unsigned >> 1) as i32
        } else {
            -((unsigned >> 1) as i32 + 1)
        };

        Ok(signed)
    }

    /// Read a compressed `TypeDefOrRef` coded token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the tag bits do not name TypeDef, TypeRef or TypeSpec.
    pub fn read_compressed_token(&mut self) -> Result<Token> {
        let compressed_token = self.read_compressed_uint()?;

        let table: u32 = match compressed_token & 0x3 {
            0x0 => 0x0200_0000, // TypeDef
            0x1 => 0x0100_0000, // TypeRef
            0x2 => 0x1B00_0000, // TypeSpec
            _ => {
                return Err(malformed_error!(
                    "Invalid compressed token - {}",
                    compressed_token
                ))
            }
        };

        Ok(Token::new(table + (compressed_token >> 2)))
    }

    /// Read a 7-bit encoded integer (the length prefix format used for image strings).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the value would overflow a `u32`.
    pub fn read_7bit_encoded_int(&mut self) -> Result<u32> {
        let mut value = 0u32;
        let mut shift = 0;

        loop {
            let byte = self.read_le::<u8>()?;

            value |= u32::from(byte & 0x7F) << shift;
            shift += 7;

            if (byte & 0x80) == 0 {
                break;
            }

            if shift >= 32 {
                return Err(malformed_error!(
                    "7-bit encoded integer overflow after {} bits",
                    shift
                ));
            }
        }

        Ok(value)
    }

    /// Read a 7-bit length prefixed UTF-8 string.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if truncated, [`crate::Error::Malformed`] for
    /// invalid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let length = self.read_7bit_encoded_int()? as usize;
        let bytes = self.read_bytes(length)?;

        String::from_utf8(bytes.to_vec()).map_err(|e| {
            malformed_error!(
                "Invalid UTF-8 string at offset {}: {}",
                self.position - length,
                e.utf8_error()
            )
        })
    }

    /// Read a compressed-uint length prefixed blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the blob is truncated.
    pub fn read_blob(&mut self) -> Result<&'a [u8]> {
        let length = self.read_compressed_uint()? as usize;
        self.read_bytes(length)
    }

    /// Read `length` raw bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than `length` bytes remain.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        if length > self.remaining() {
            return Err(out_of_bounds_error!());
        }

        let bytes = &self.data[self.position..self.position + length];
        self.position += length;
        Ok(bytes)
    }
}
