//! Serializer for [`ModuleImage`].
//!
//! The layout mirrors [`super::reader`] field by field. Signatures are re-encoded from their
//! parsed form, so writing the same image twice yields identical bytes.

use crate::{
    file::writer::BlobWriter,
    metadata::{
        image::{
            tables::{AttributeArg, MethodBody, ModuleImage},
            IMAGE_MAGIC, IMAGE_VERSION,
        },
        signatures::{
            encode_field_signature, encode_local_var_signature, encode_member_signature,
            encode_method_signature, encode_method_spec_signature, encode_typespec_signature,
            ELEMENT_TYPE,
        },
        token::{TableId, Token},
    },
    Result,
};

fn write_token(writer: &mut BlobWriter, token: Token) {
    writer.write_le::<u32>(token.value());
}

fn write_table_header(writer: &mut BlobWriter, table: TableId, rows: usize) -> Result<()> {
    writer.write_le::<u8>(table as u8);
    writer.write_compressed_uint(rows as u32)
}

fn write_names(writer: &mut BlobWriter, names: &[String]) -> Result<()> {
    writer.write_compressed_uint(names.len() as u32)?;
    for name in names {
        writer.write_prefixed_string_utf8(name);
    }
    Ok(())
}

fn write_body(writer: &mut BlobWriter, body: &MethodBody) -> Result<()> {
    writer.write_le::<u16>(body.max_stack);
    writer.write_le::<u8>(u8::from(body.init_locals));
    writer.write_blob(&encode_local_var_signature(&body.locals)?)?;
    writer.write_blob(&body.code)?;

    writer.write_compressed_uint(body.exception_handlers.len() as u32)?;
    for handler in &body.exception_handlers {
        writer.write_le::<u16>(handler.flags.bits());
        writer.write_le::<u32>(handler.try_offset);
        writer.write_le::<u32>(handler.try_length);
        writer.write_le::<u32>(handler.handler_offset);
        writer.write_le::<u32>(handler.handler_length);
        write_token(writer, handler.class_token);
        writer.write_le::<u32>(handler.filter_offset);
    }
    Ok(())
}

fn write_attribute_arg(writer: &mut BlobWriter, arg: &AttributeArg) -> Result<()> {
    match arg {
        AttributeArg::I32(value) => {
            writer.write_le::<u8>(ELEMENT_TYPE::I4);
            writer.write_le::<i32>(*value);
        }
        AttributeArg::String(value) => {
            writer.write_le::<u8>(ELEMENT_TYPE::STRING);
            writer.write_prefixed_string_utf8(value);
        }
        AttributeArg::StringArray(values) => {
            writer.write_le::<u8>(ELEMENT_TYPE::SZARRAY);
            write_names(writer, values)?;
        }
    }
    Ok(())
}

/// Serialize `image` to bytes.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if a signature contains a token that cannot be
/// encoded, or a count exceeds the compressed integer range.
pub fn write_image(image: &ModuleImage) -> Result<Vec<u8>> {
    let mut writer = BlobWriter::new();

    writer.write_bytes(IMAGE_MAGIC);
    writer.write_le::<u16>(IMAGE_VERSION);
    writer.write_prefixed_string_utf8(&image.name);
    writer.write_prefixed_string_utf8(&image.assembly.name);
    for part in image.assembly.version {
        writer.write_le::<u16>(part);
    }

    write_table_header(&mut writer, TableId::AssemblyRef, image.assembly_refs.len())?;
    for row in &image.assembly_refs {
        writer.write_prefixed_string_utf8(&row.name);
        for part in row.version {
            writer.write_le::<u16>(part);
        }
    }

    write_table_header(&mut writer, TableId::TypeRef, image.type_refs.len())?;
    for row in &image.type_refs {
        write_token(&mut writer, row.scope);
        writer.write_prefixed_string_utf8(&row.namespace);
        writer.write_prefixed_string_utf8(&row.name);
    }

    write_table_header(&mut writer, TableId::TypeDef, image.type_defs.len())?;
    for row in &image.type_defs {
        writer.write_le::<u32>(row.flags.bits());
        writer.write_prefixed_string_utf8(&row.namespace);
        writer.write_prefixed_string_utf8(&row.name);
        write_token(&mut writer, row.extends);
        write_token(&mut writer, row.enclosing);
        write_names(&mut writer, &row.generic_params)?;
    }

    write_table_header(&mut writer, TableId::Field, image.fields.len())?;
    for row in &image.fields {
        write_token(&mut writer, row.parent);
        writer.write_le::<u32>(row.flags.bits());
        writer.write_prefixed_string_utf8(&row.name);
        writer.write_blob(&encode_field_signature(&row.signature)?)?;
        match row.offset {
            Some(offset) => {
                writer.write_le::<u8>(1);
                writer.write_le::<u32>(offset);
            }
            None => writer.write_le::<u8>(0),
        }
    }

    write_table_header(&mut writer, TableId::MethodDef, image.methods.len())?;
    for row in &image.methods {
        write_token(&mut writer, row.parent);
        writer.write_le::<u32>(row.flags.bits());
        writer.write_le::<u32>(row.impl_flags.bits());
        writer.write_prefixed_string_utf8(&row.name);
        writer.write_blob(&encode_method_signature(&row.signature)?)?;
        write_names(&mut writer, &row.generic_params)?;
        match &row.body {
            Some(body) => {
                writer.write_le::<u8>(1);
                write_body(&mut writer, body)?;
            }
            None => writer.write_le::<u8>(0),
        }
    }

    write_table_header(&mut writer, TableId::MemberRef, image.member_refs.len())?;
    for row in &image.member_refs {
        write_token(&mut writer, row.class);
        writer.write_prefixed_string_utf8(&row.name);
        writer.write_blob(&encode_member_signature(&row.signature)?)?;
    }

    write_table_header(&mut writer, TableId::TypeSpec, image.type_specs.len())?;
    for row in &image.type_specs {
        writer.write_blob(&encode_typespec_signature(&row.signature)?)?;
    }

    write_table_header(&mut writer, TableId::MethodSpec, image.method_specs.len())?;
    for row in &image.method_specs {
        write_token(&mut writer, row.method);
        writer.write_blob(&encode_method_spec_signature(&row.instantiation)?)?;
    }

    write_table_header(
        &mut writer,
        TableId::CustomAttribute,
        image.custom_attributes.len(),
    )?;
    for row in &image.custom_attributes {
        write_token(&mut writer, row.parent);
        writer.write_prefixed_string_utf8(&row.attribute_type);
        writer.write_compressed_uint(row.args.len() as u32)?;
        for arg in &row.args {
            write_attribute_arg(&mut writer, arg)?;
        }
    }

    write_table_header(&mut writer, TableId::UserString, image.user_strings.len())?;
    for value in &image.user_strings {
        writer.write_prefixed_string_utf8(value);
    }

    Ok(writer.into_inner())
}
