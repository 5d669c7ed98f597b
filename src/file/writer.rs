//! Append-only byte buffer, the encoding counterpart of [`crate::file::parser::Parser`].
//!
//! Everything [`crate::file::parser::Parser`] can read, [`BlobWriter`] can write: little-endian
//! primitives, ECMA-335 compressed integers and tokens, 7-bit length prefixed strings and
//! length prefixed blobs.

use crate::{file::io::CilIO, metadata::token::Token, Result};

/// Growable output buffer used by the image writer, the symbol writer, the signature encoder
/// and the body encoder.
#[derive(Debug, Default, Clone)]
pub struct BlobWriter {
    data: Vec<u8>,
}

impl BlobWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the writer, returning the encoded bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    /// Borrow the bytes written so far.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Append a primitive in little-endian byte order.
    pub fn write_le<T: CilIO>(&mut self, value: T) {
        self.data.extend_from_slice(value.to_le_bytes().as_ref());
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a compressed unsigned integer (ECMA-335 II.23.2).
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for values above `0x1FFF_FFFF`, which the encoding
    /// cannot represent.
    pub fn write_compressed_uint(&mut self, value: u32) -> Result<()> {
        if value <= 0x7F {
            self.data.push(value as u8);
        } else if value <= 0x3FFF {
            self.data.push(((value >> 8) as u8) | 0x80);
            self.data.push(value as u8);
        } else if value <= 0x1FFF_FFFF {
            self.data.push(((value >> 24) as u8) | 0xC0);
            self.data.push((value >> 16) as u8);
            self.data.push((value >> 8) as u8);
            self.data.push(value as u8);
        } else {
            return Err(malformed_error!(
                "Value too large for compressed uint - {}",
                value
            ));
        }
        Ok(())
    }

    /// Append a compressed signed integer, sign in the low bit.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the magnitude does not fit the encoding.
    pub fn write_compressed_int(&mut self, value: i32) -> Result<()> {
        #[allow(clippy::cast_sign_loss)]
        let encoded = if value >= 0 {
            (value as u32) << 1
        } else {
            (((-(value + 1)) as u32) << 1) | 1
        };
        self.write_compressed_uint(encoded)
    }

    /// Append a `TypeDefOrRef` coded token.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the token is not a TypeDef, TypeRef or TypeSpec.
    pub fn write_compressed_token(&mut self, token: Token) -> Result<()> {
        let tag = match token.table() {
            0x02 => 0,
            0x01 => 1,
            0x1B => 2,
            other => {
                return Err(malformed_error!(
                    "Token {} (table 0x{:02x}) is not TypeDefOrRef",
                    token,
                    other
                ))
            }
        };
        self.write_compressed_uint((token.row() << 2) | tag)
    }

    /// Append a 7-bit encoded integer.
    pub fn write_7bit_encoded_int(&mut self, mut value: u32) {
        while value >= 0x80 {
            self.data.push((value as u8) | 0x80);
            value >>= 7;
        }
        self.data.push(value as u8);
    }

    /// Append a 7-bit length prefixed UTF-8 string.
    pub fn write_prefixed_string_utf8(&mut self, value: &str) {
        self.write_7bit_encoded_int(value.len() as u32);
        self.data.extend_from_slice(value.as_bytes());
    }

    /// Append a compressed-uint length prefixed blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob is larger than the length encoding allows.
    pub fn write_blob(&mut self, blob: &[u8]) -> Result<()> {
        self.write_compressed_uint(blob.len() as u32)?;
        self.data.extend_from_slice(blob);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::parser::Parser;

    #[test]
    fn test_compressed_uint_boundaries() {
        let mut writer = BlobWriter::new();
        for value in [0u32, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1FFF_FFFF] {
            writer.write_compressed_uint(value).unwrap();
        }
        assert!(writer.write_compressed_uint(0x2000_0000).is_err());

        let bytes = writer.into_inner();
        let mut parser = Parser::new(&bytes);
        for value in [0u32, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1FFF_FFFF] {
            assert_eq!(parser.read_compressed_uint().unwrap(), value);
        }
        assert!(!parser.has_more_data());
    }

    #[test]
    fn test_compressed_int_matches_ecma_examples() {
        let mut writer = BlobWriter::new();
        writer.write_compressed_int(3).unwrap();
        writer.write_compressed_int(-3).unwrap();
        writer.write_compressed_int(-1).unwrap();
        assert_eq!(writer.as_slice(), &[0x06, 0x05, 0x01]);
    }

    #[test]
    fn test_token_rejects_non_type_tables() {
        let mut writer = BlobWriter::new();
        writer.write_compressed_token(Token::new(0x0100_0003)).unwrap();
        assert_eq!(writer.as_slice(), &[0x0D]);
        assert!(writer.write_compressed_token(Token::new(0x0600_0001)).is_err());
    }

    #[test]
    fn test_prefixed_string() {
        let mut writer = BlobWriter::new();
        let long = "x".repeat(200);
        writer.write_prefixed_string_utf8(&long);
        let bytes = writer.into_inner();
        assert_eq!(&bytes[..2], &[0xC8, 0x01]);

        let mut parser = Parser::new(&bytes);
        assert_eq!(parser.read_prefixed_string_utf8().unwrap(), long);
    }
}
