//! Signature parsing, encoding and rendering.
//!
//! Signature blobs follow ECMA-335 II.23.2: a header byte, compressed counts, element type
//! bytes and `TypeDefOrRef` coded tokens. This crate supports the subset emitted for regular
//! managed code: method, field, local variable, type spec and method spec signatures.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::signatures::{encode_method_signature, parse_method_signature};
//!
//! let signature_data = &[0x20, 0x01, 0x01, 0x0E]; // instance void (string)
//! let method_sig = parse_method_signature(signature_data)?;
//! assert_eq!(encode_method_signature(&method_sig)?, signature_data);
//! # Ok::<(), dotpatch::Error>(())
//! ```

mod encoders;
mod parser;
mod render;
mod types;

pub use encoders::*;
pub use parser::*;
pub use render::*;
pub use types::*;

use crate::Result;

/// Parse a `MethodSignature` from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_method_signature(data: &[u8]) -> Result<SignatureMethod> {
    let mut parser = SignatureParser::new(data);
    parser.parse_method_signature()
}

/// Parse a `FieldSignature` from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_field_signature(data: &[u8]) -> Result<SignatureField> {
    let mut parser = SignatureParser::new(data);
    parser.parse_field_signature()
}

/// Parse a `LocalVariableSignature` from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_local_var_signature(data: &[u8]) -> Result<SignatureLocalVariables> {
    let mut parser = SignatureParser::new(data);
    parser.parse_local_var_signature()
}

/// Parse a `TypeSpec` signature from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_type_spec_signature(data: &[u8]) -> Result<TypeSignature> {
    let mut parser = SignatureParser::new(data);
    parser.parse_type_spec_signature()
}

/// Parse a `MethodSpec` signature from a byte slice
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_method_spec_signature(data: &[u8]) -> Result<SignatureMethodSpec> {
    let mut parser = SignatureParser::new(data);
    parser.parse_method_spec_signature()
}

/// Parse a `MemberRef` signature, which is either a field or a method signature.
///
/// # Errors
/// Returns an error if the signature data is malformed or parsing fails
pub fn parse_member_signature(data: &[u8]) -> Result<MemberSignature> {
    match data.first() {
        Some(&SIGNATURE_HEADER::FIELD) => Ok(MemberSignature::Field(parse_field_signature(data)?)),
        Some(_) => Ok(MemberSignature::Method(parse_method_signature(data)?)),
        None => Err(crate::Error::Empty),
    }
}

/// Encode a `MemberRef` signature.
///
/// # Errors
/// Returns an error if a contained type cannot be encoded.
pub fn encode_member_signature(signature: &MemberSignature) -> Result<Vec<u8>> {
    match signature {
        MemberSignature::Method(method) => encode_method_signature(method),
        MemberSignature::Field(field) => encode_field_signature(field),
    }
}
