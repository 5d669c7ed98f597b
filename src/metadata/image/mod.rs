//! The compiled module container.
//!
//! A [`ModuleImage`] holds every metadata table of one compiled module as owned rows. It is
//! read from and written to a compact binary format:
//!
//! | Part | Content |
//! |------|---------|
//! | header | magic `DPMI`, `u16` version, module name, assembly name and version |
//! | tables | `AssemblyRef`, `TypeRef`, `TypeDef`, `Field`, `MethodDef`, `MemberRef`, `TypeSpec`, `MethodSpec`, `CustomAttribute`, `UserString` |
//!
//! Each table starts with its one byte id and a compressed row count. Signatures are stored
//! as ECMA-335 blobs; tokens are stored as raw `u32` values.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::metadata::image::{ModuleBuilder, ModuleImage};
//!
//! let mut builder = ModuleBuilder::new("Game.dll", "Game");
//! builder.type_def("Game", "Player").public().build();
//! let (image, _) = builder.finish();
//!
//! let bytes = image.to_bytes()?;
//! let parsed = ModuleImage::from_bytes(&bytes)?;
//! assert_eq!(parsed, image);
//! # Ok::<(), dotpatch::Error>(())
//! ```

mod builder;
mod reader;
mod tables;
mod writer;

pub use builder::{FieldBuilder, MethodBuilder, ModuleBuilder, TypeBuilder, CORLIB};
pub use reader::read_image;
pub use tables::{
    AssemblyDef, AssemblyRefRow, AttributeArg, CustomAttributeRow, ExceptionHandler, FieldRow,
    MemberRefRow, MethodBody, MethodDefRow, MethodSpecRow, ModuleImage, TypeDefRow, TypeRefRow,
    TypeSpecRow, Version,
};
pub use writer::write_image;

use crate::Result;

/// Leading bytes of a module image.
pub const IMAGE_MAGIC: &[u8; 4] = b"DPMI";
/// Supported image format version.
pub const IMAGE_VERSION: u16 = 1;

impl ModuleImage {
    /// Parse a serialized image.
    ///
    /// # Errors
    /// See [`read_image`].
    pub fn from_bytes(data: &[u8]) -> Result<ModuleImage> {
        read_image(data)
    }

    /// Serialize the image.
    ///
    /// # Errors
    /// Fails if a signature cannot be encoded.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        write_image(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        metadata::{
            flags::ExceptionHandlerFlags,
            signatures::{MemberSignature, SignatureMethod, SignatureParameter, TypeSignature},
            token::Token,
        },
        Error,
    };

    fn sample() -> ModuleImage {
        let mut builder = ModuleBuilder::new("Game.dll", "Game");
        let console = builder.corlib_type("System", "Console");
        let write_line = builder.member_ref(
            console,
            "WriteLine",
            MemberSignature::Method(SignatureMethod {
                params: vec![SignatureParameter::new(TypeSignature::String)],
                ..SignatureMethod::default()
            }),
        );
        let player = builder.type_def("Game", "Player").public().build();
        builder.type_def("", "<>c").nested_in(player).build();
        builder.field(player, "hp", TypeSignature::I4).public().build();
        let greeting = builder.user_string("hello");
        let echo = builder
            .method(player, "Echo")
            .public()
            .static_method()
            .generic_params(&["T"])
            .returns(TypeSignature::GenericParamMethod(0))
            .param(TypeSignature::GenericParamMethod(0))
            .code(|asm| {
                asm.ldarg(0)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();
        builder.method_spec(echo, vec![TypeSignature::I4]);
        let greet = builder
            .method(player, "Greet")
            .public()
            .local(TypeSignature::String)
            .code(|asm| {
                asm.ldstr(greeting)?.call(write_line)?.ret()?;
                Ok(())
            })
            .build()
            .unwrap();

        let (mut image, _) = builder.finish();
        if let Some(body) = image.method_mut(greet).unwrap().body.as_mut() {
            body.exception_handlers.push(ExceptionHandler {
                flags: ExceptionHandlerFlags::FINALLY,
                try_offset: 0,
                try_length: 5,
                handler_offset: 5,
                handler_length: 6,
                class_token: Token::NULL,
                filter_offset: 0,
            });
        }
        image.add_custom_attribute(CustomAttributeRow {
            parent: echo,
            attribute_type: "HotPatch.GenericMethodIndexAttribute".into(),
            args: vec![
                AttributeArg::I32(3),
                AttributeArg::String("x".into()),
                AttributeArg::StringArray(vec!["System.Int32".into()]),
            ],
        });
        image
    }

    #[test]
    fn test_roundtrip_is_byte_stable() {
        let image = sample();
        let first = image.to_bytes().unwrap();
        let parsed = ModuleImage::from_bytes(&first).unwrap();
        assert_eq!(parsed, image);
        assert_eq!(parsed.to_bytes().unwrap(), first);
    }

    #[test]
    fn test_reject_bad_header() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            ModuleImage::from_bytes(&bytes),
            Err(Error::Malformed { .. })
        ));

        let mut bytes = sample().to_bytes().unwrap();
        bytes[4] = 9;
        assert!(matches!(
            ModuleImage::from_bytes(&bytes),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_reject_truncated_and_trailing() {
        let bytes = sample().to_bytes().unwrap();
        assert!(matches!(
            ModuleImage::from_bytes(&bytes[..bytes.len() - 3]),
            Err(Error::OutOfBounds { .. })
        ));

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(matches!(
            ModuleImage::from_bytes(&padded),
            Err(Error::Malformed { .. })
        ));

        assert!(ModuleImage::from_bytes(&[]).is_err());
    }
}
