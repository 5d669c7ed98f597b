//! Signature blob encoders, the inverse of [`crate::metadata::signatures::SignatureParser`].
//!
//! The image writer, the reference rewriter and the generic wrapper synthesizer all build
//! signatures as values and serialize them here. Output is canonical: the same value always
//! produces the same bytes, which keeps rewritten images byte-stable.

use crate::{
    file::writer::BlobWriter,
    metadata::signatures::{
        SignatureField, SignatureLocalVariables, SignatureMethod, SignatureMethodSpec,
        SignatureParameter, TypeSignature, ELEMENT_TYPE, SIGNATURE_HEADER,
    },
    Result,
};

/// Encodes a single type into `writer`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if an embedded token is not `TypeDefOrRef`.
pub fn encode_type(signature: &TypeSignature, writer: &mut BlobWriter) -> Result<()> {
    match signature {
        TypeSignature::Void => writer.write_le::<u8>(ELEMENT_TYPE::VOID),
        TypeSignature::Boolean => writer.write_le::<u8>(ELEMENT_TYPE::BOOLEAN),
        TypeSignature::Char => writer.write_le::<u8>(ELEMENT_TYPE::CHAR),
        TypeSignature::I1 => writer.write_le::<u8>(ELEMENT_TYPE::I1),
        TypeSignature::U1 => writer.write_le::<u8>(ELEMENT_TYPE::U1),
        TypeSignature::I2 => writer.write_le::<u8>(ELEMENT_TYPE::I2),
        TypeSignature::U2 => writer.write_le::<u8>(ELEMENT_TYPE::U2),
        TypeSignature::I4 => writer.write_le::<u8>(ELEMENT_TYPE::I4),
        TypeSignature::U4 => writer.write_le::<u8>(ELEMENT_TYPE::U4),
        TypeSignature::I8 => writer.write_le::<u8>(ELEMENT_TYPE::I8),
        TypeSignature::U8 => writer.write_le::<u8>(ELEMENT_TYPE::U8),
        TypeSignature::R4 => writer.write_le::<u8>(ELEMENT_TYPE::R4),
        TypeSignature::R8 => writer.write_le::<u8>(ELEMENT_TYPE::R8),
        TypeSignature::String => writer.write_le::<u8>(ELEMENT_TYPE::STRING),
        TypeSignature::Object => writer.write_le::<u8>(ELEMENT_TYPE::OBJECT),
        TypeSignature::I => writer.write_le::<u8>(ELEMENT_TYPE::I),
        TypeSignature::U => writer.write_le::<u8>(ELEMENT_TYPE::U),
        TypeSignature::TypedByRef => writer.write_le::<u8>(ELEMENT_TYPE::TYPEDBYREF),
        TypeSignature::Ptr(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE::PTR);
            encode_type(inner, writer)?;
        }
        TypeSignature::ByRef(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE::BYREF);
            encode_type(inner, writer)?;
        }
        TypeSignature::Pinned(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE::PINNED);
            encode_type(inner, writer)?;
        }
        TypeSignature::SzArray(inner) => {
            writer.write_le::<u8>(ELEMENT_TYPE::SZARRAY);
            encode_type(inner, writer)?;
        }
        TypeSignature::ValueType(token) => {
            writer.write_le::<u8>(ELEMENT_TYPE::VALUETYPE);
            writer.write_compressed_token(*token)?;
        }
        TypeSignature::Class(token) => {
            writer.write_le::<u8>(ELEMENT_TYPE::CLASS);
            writer.write_compressed_token(*token)?;
        }
        TypeSignature::GenericParamType(index) => {
            writer.write_le::<u8>(ELEMENT_TYPE::VAR);
            writer.write_compressed_uint(*index)?;
        }
        TypeSignature::GenericParamMethod(index) => {
            writer.write_le::<u8>(ELEMENT_TYPE::MVAR);
            writer.write_compressed_uint(*index)?;
        }
        TypeSignature::Array(inner, rank) => {
            writer.write_le::<u8>(ELEMENT_TYPE::ARRAY);
            encode_type(inner, writer)?;
            writer.write_compressed_uint(*rank)?;
            // no sizes, no lower bounds
            writer.write_compressed_uint(0)?;
            writer.write_compressed_uint(0)?;
        }
        TypeSignature::GenericInst(base, args) => {
            if !matches!(
                base.as_ref(),
                TypeSignature::Class(_) | TypeSignature::ValueType(_)
            ) {
                return Err(malformed_error!(
                    "GENERICINST base must be a class or value type - {:?}",
                    base
                ));
            }

            writer.write_le::<u8>(ELEMENT_TYPE::GENERICINST);
            encode_type(base, writer)?;
            writer.write_compressed_uint(args.len() as u32)?;
            for arg in args {
                encode_type(arg, writer)?;
            }
        }
    }

    Ok(())
}

fn encode_parameter(parameter: &SignatureParameter, writer: &mut BlobWriter) -> Result<()> {
    if parameter.by_ref {
        writer.write_le::<u8>(ELEMENT_TYPE::BYREF);
    }
    encode_type(&parameter.base, writer)
}

/// Encodes a `MethodDefSig` / `MethodRefSig`.
///
/// # Errors
/// Returns an error if a contained type cannot be encoded.
pub fn encode_method_signature(signature: &SignatureMethod) -> Result<Vec<u8>> {
    let mut writer = BlobWriter::new();

    let mut convention = 0u8;
    if signature.has_this {
        convention |= SIGNATURE_HEADER::HAS_THIS;
    }
    if signature.generic_param_count > 0 {
        convention |= SIGNATURE_HEADER::GENERIC;
    }
    writer.write_le::<u8>(convention);

    if signature.generic_param_count > 0 {
        writer.write_compressed_uint(signature.generic_param_count)?;
    }
    writer.write_compressed_uint(signature.params.len() as u32)?;
    encode_parameter(&signature.return_type, &mut writer)?;
    for param in &signature.params {
        encode_parameter(param, &mut writer)?;
    }

    Ok(writer.into_inner())
}

/// Encodes a `FieldSig`.
///
/// # Errors
/// Returns an error if the field type cannot be encoded.
pub fn encode_field_signature(signature: &SignatureField) -> Result<Vec<u8>> {
    let mut writer = BlobWriter::new();
    writer.write_le::<u8>(SIGNATURE_HEADER::FIELD);
    encode_type(&signature.base, &mut writer)?;
    Ok(writer.into_inner())
}

/// Encodes a `LocalVarSig`.
///
/// # Errors
/// Returns an error if a local's type cannot be encoded.
pub fn encode_local_var_signature(signature: &SignatureLocalVariables) -> Result<Vec<u8>> {
    let mut writer = BlobWriter::new();
    writer.write_le::<u8>(SIGNATURE_HEADER::LOCAL_SIG);
    writer.write_compressed_uint(signature.locals.len() as u32)?;
    for local in &signature.locals {
        if local.is_pinned {
            writer.write_le::<u8>(ELEMENT_TYPE::PINNED);
        }
        if local.is_byref {
            writer.write_le::<u8>(ELEMENT_TYPE::BYREF);
        }
        encode_type(&local.base, &mut writer)?;
    }
    Ok(writer.into_inner())
}

/// Encodes a `TypeSpec` blob.
///
/// # Errors
/// Returns an error if the type cannot be encoded.
pub fn encode_typespec_signature(signature: &TypeSignature) -> Result<Vec<u8>> {
    let mut writer = BlobWriter::new();
    encode_type(signature, &mut writer)?;
    Ok(writer.into_inner())
}

/// Encodes a `MethodSpec` instantiation blob.
///
/// # Errors
/// Returns an error if a type argument cannot be encoded.
pub fn encode_method_spec_signature(signature: &SignatureMethodSpec) -> Result<Vec<u8>> {
    let mut writer = BlobWriter::new();
    writer.write_le::<u8>(SIGNATURE_HEADER::METHOD_SPEC);
    writer.write_compressed_uint(signature.generic_args.len() as u32)?;
    for arg in &signature.generic_args {
        encode_type(arg, &mut writer)?;
    }
    Ok(writer.into_inner())
}
