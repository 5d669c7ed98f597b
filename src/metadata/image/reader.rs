//! Parser for serialized [`ModuleImage`]s.
//!
//! Tables must appear in the fixed order written by [`super::writer::write_image`]; anything
//! else, including trailing bytes, is rejected as malformed.

use crate::{
    file::parser::Parser,
    metadata::{
        flags::{
            ExceptionHandlerFlags, FieldAttributes, MethodAttributes, MethodImplAttributes,
            TypeAttributes,
        },
        image::{
            tables::{
                AssemblyDef, AssemblyRefRow, AttributeArg, CustomAttributeRow, ExceptionHandler,
                FieldRow, MemberRefRow, MethodBody, MethodDefRow, MethodSpecRow, ModuleImage,
                TypeDefRow, TypeRefRow, TypeSpecRow, Version,
            },
            IMAGE_MAGIC, IMAGE_VERSION,
        },
        signatures::{
            parse_field_signature, parse_local_var_signature, parse_member_signature,
            parse_method_signature, parse_method_spec_signature, parse_type_spec_signature,
            ELEMENT_TYPE,
        },
        token::{TableId, Token},
    },
    Result,
};

/// Upper bound for pre-allocation from untrusted row counts.
const MAX_PREALLOC: usize = 4096;

struct ImageReader<'a> {
    parser: Parser<'a>,
}

impl<'a> ImageReader<'a> {
    fn token(&mut self) -> Result<Token> {
        Ok(Token::new(self.parser.read_le::<u32>()?))
    }

    fn string(&mut self) -> Result<String> {
        self.parser.read_prefixed_string_utf8()
    }

    fn version(&mut self) -> Result<Version> {
        Ok([
            self.parser.read_le::<u16>()?,
            self.parser.read_le::<u16>()?,
            self.parser.read_le::<u16>()?,
            self.parser.read_le::<u16>()?,
        ])
    }

    fn names(&mut self) -> Result<Vec<String>> {
        let count = self.parser.read_compressed_uint()? as usize;
        let mut names = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            names.push(self.string()?);
        }
        Ok(names)
    }

    fn flag(&mut self) -> Result<bool> {
        match self.parser.read_le::<u8>()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(malformed_error!("Invalid boolean byte - {}", other)),
        }
    }

    /// Read a table header, checking it names the expected table.
    fn table<T, F>(&mut self, expected: TableId, mut read_row: F) -> Result<Vec<T>>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let id = self.parser.read_le::<u8>()?;
        if id != expected as u8 {
            return Err(malformed_error!(
                "Expected table {} (0x{:02x}), found 0x{:02x} at offset {}",
                expected,
                expected as u8,
                id,
                self.parser.pos() - 1
            ));
        }

        let count = self.parser.read_compressed_uint()? as usize;
        let mut rows = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            rows.push(read_row(self)?);
        }
        Ok(rows)
    }

    fn body(&mut self) -> Result<MethodBody> {
        let max_stack = self.parser.read_le::<u16>()?;
        let init_locals = self.flag()?;
        let locals = parse_local_var_signature(self.parser.read_blob()?)?;
        let code = self.parser.read_blob()?.to_vec();

        let count = self.parser.read_compressed_uint()? as usize;
        let mut exception_handlers = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            exception_handlers.push(ExceptionHandler {
                flags: ExceptionHandlerFlags::from_bits_retain(self.parser.read_le::<u16>()?),
                try_offset: self.parser.read_le::<u32>()?,
                try_length: self.parser.read_le::<u32>()?,
                handler_offset: self.parser.read_le::<u32>()?,
                handler_length: self.parser.read_le::<u32>()?,
                class_token: self.token()?,
                filter_offset: self.parser.read_le::<u32>()?,
            });
        }

        Ok(MethodBody {
            max_stack,
            init_locals,
            locals,
            code,
            exception_handlers,
        })
    }

    fn attribute_arg(&mut self) -> Result<AttributeArg> {
        match self.parser.read_le::<u8>()? {
            ELEMENT_TYPE::I4 => Ok(AttributeArg::I32(self.parser.read_le::<i32>()?)),
            ELEMENT_TYPE::STRING => Ok(AttributeArg::String(self.string()?)),
            ELEMENT_TYPE::SZARRAY => Ok(AttributeArg::StringArray(self.names()?)),
            other => Err(malformed_error!(
                "Unsupported custom attribute argument type - {}",
                other
            )),
        }
    }
}

/// Parse a serialized module image.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for a bad magic, an unsupported version, tables out of
/// order, unparsable signatures or trailing data, and [`crate::Error::OutOfBounds`] if the
/// data is truncated.
pub fn read_image(data: &[u8]) -> Result<ModuleImage> {
    let mut reader = ImageReader {
        parser: Parser::new(data),
    };

    let magic = reader.parser.read_bytes(IMAGE_MAGIC.len())?;
    if magic != IMAGE_MAGIC {
        return Err(malformed_error!("Invalid module image magic - {:02x?}", magic));
    }
    let version = reader.parser.read_le::<u16>()?;
    if version != IMAGE_VERSION {
        return Err(malformed_error!(
            "Unsupported module image version - {}",
            version
        ));
    }

    let name = reader.string()?;
    let assembly = AssemblyDef {
        name: reader.string()?,
        version: reader.version()?,
    };

    let assembly_refs = reader.table(TableId::AssemblyRef, |r| {
        Ok(AssemblyRefRow {
            name: r.string()?,
            version: r.version()?,
        })
    })?;

    let type_refs = reader.table(TableId::TypeRef, |r| {
        Ok(TypeRefRow {
            scope: r.token()?,
            namespace: r.string()?,
            name: r.string()?,
        })
    })?;

    let type_defs = reader.table(TableId::TypeDef, |r| {
        Ok(TypeDefRow {
            flags: TypeAttributes::from_bits_retain(r.parser.read_le::<u32>()?),
            namespace: r.string()?,
            name: r.string()?,
            extends: r.token()?,
            enclosing: r.token()?,
            generic_params: r.names()?,
        })
    })?;

    let fields = reader.table(TableId::Field, |r| {
        Ok(FieldRow {
            parent: r.token()?,
            flags: FieldAttributes::from_bits_retain(r.parser.read_le::<u32>()?),
            name: r.string()?,
            signature: parse_field_signature(r.parser.read_blob()?)?,
            offset: if r.flag()? {
                Some(r.parser.read_le::<u32>()?)
            } else {
                None
            },
        })
    })?;

    let methods = reader.table(TableId::MethodDef, |r| {
        Ok(MethodDefRow {
            parent: r.token()?,
            flags: MethodAttributes::from_bits_retain(r.parser.read_le::<u32>()?),
            impl_flags: MethodImplAttributes::from_bits_retain(r.parser.read_le::<u32>()?),
            name: r.string()?,
            signature: parse_method_signature(r.parser.read_blob()?)?,
            generic_params: r.names()?,
            body: if r.flag()? { Some(r.body()?) } else { None },
        })
    })?;

    let member_refs = reader.table(TableId::MemberRef, |r| {
        Ok(MemberRefRow {
            class: r.token()?,
            name: r.string()?,
            signature: parse_member_signature(r.parser.read_blob()?)?,
        })
    })?;

    let type_specs = reader.table(TableId::TypeSpec, |r| {
        Ok(TypeSpecRow {
            signature: parse_type_spec_signature(r.parser.read_blob()?)?,
        })
    })?;

    let method_specs = reader.table(TableId::MethodSpec, |r| {
        Ok(MethodSpecRow {
            method: r.token()?,
            instantiation: parse_method_spec_signature(r.parser.read_blob()?)?,
        })
    })?;

    let custom_attributes = reader.table(TableId::CustomAttribute, |r| {
        let parent = r.token()?;
        let attribute_type = r.string()?;
        let count = r.parser.read_compressed_uint()? as usize;
        let mut args = Vec::with_capacity(count.min(MAX_PREALLOC));
        for _ in 0..count {
            args.push(r.attribute_arg()?);
        }
        Ok(CustomAttributeRow {
            parent,
            attribute_type,
            args,
        })
    })?;

    let user_strings = reader.table(TableId::UserString, ImageReader::string)?;

    if reader.parser.has_more_data() {
        return Err(malformed_error!(
            "{} trailing bytes after the last table",
            reader.parser.remaining()
        ));
    }

    Ok(ModuleImage {
        name,
        assembly,
        assembly_refs,
        type_refs,
        type_defs,
        fields,
        methods,
        member_refs,
        type_specs,
        method_specs,
        custom_attributes,
        user_strings,
    })
}
