//! Symbolic instruction text.
//!
//! Two compiles of the same source number their metadata rows differently, so raw operand
//! bytes cannot be compared across modules. Rendering replaces every token with the name of
//! the entity it designates and every branch with its absolute target label.

use std::fmt::Write;

use crate::{
    assembly::{Immediate, Instruction, Operand},
    metadata::{image::ModuleImage, signatures::TypeNames, token::TableId},
    Error, Result,
};

/// Formats an IL offset as a label, `IL_002a`.
#[must_use]
pub fn label(offset: u32) -> String {
    format!("IL_{offset:04x}")
}

fn immediate(value: &Immediate) -> String {
    match value {
        Immediate::Int8(v) => v.to_string(),
        Immediate::UInt8(v) => v.to_string(),
        Immediate::UInt16(v) => v.to_string(),
        Immediate::Int32(v) => v.to_string(),
        Immediate::Int64(v) => v.to_string(),
        // Bit patterns keep NaN payloads and signed zeros distinguishable
        Immediate::Float32(v) => format!("{v} (0x{:08x})", v.to_bits()),
        Immediate::Float64(v) => format!("{v} (0x{:016x})", v.to_bits()),
    }
}

/// Render a single instruction, resolving its operand through `image`.
///
/// # Errors
/// Returns [`Error::ResolutionFailure`] if a token operand does not resolve inside `image`.
pub fn render_instruction(instruction: &Instruction, image: &ModuleImage) -> Result<String> {
    let mut text = instruction.mnemonic.to_string();

    match &instruction.operand {
        Operand::None => {}
        Operand::Immediate(value) => {
            text.push(' ');
            text.push_str(&immediate(value));
        }
        Operand::Target(target) => {
            text.push(' ');
            text.push_str(&label(*target));
        }
        Operand::Switch(targets) => {
            let labels = targets.iter().map(|t| label(*t)).collect::<Vec<_>>();
            let _ = write!(text, " ({})", labels.join(","));
        }
        Operand::Token(token) => {
            let name = match token.table_id() {
                Some(TableId::TypeDef | TableId::TypeRef | TableId::TypeSpec) => {
                    image.type_name(*token)?
                }
                Some(
                    TableId::Field | TableId::MethodDef | TableId::MemberRef | TableId::MethodSpec,
                ) => image.member_name(*token)?,
                Some(TableId::UserString) => format!("{:?}", image.user_string(*token)?),
                _ => {
                    return Err(Error::resolution(
                        *token,
                        format!("unsupported operand table for '{}'", instruction.mnemonic),
                    ))
                }
            };
            text.push(' ');
            text.push_str(&name);
        }
    }

    Ok(text)
}

/// Render every instruction of a decoded body.
///
/// # Errors
/// Fails on the first operand that does not resolve.
pub fn render_body(instructions: &[Instruction], image: &ModuleImage) -> Result<Vec<String>> {
    instructions
        .iter()
        .map(|instruction| render_instruction(instruction, image))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::decode_stream,
        metadata::{
            flags::{FieldAttributes, TypeAttributes},
            image::{FieldRow, TypeDefRow},
            signatures::{SignatureField, TypeSignature},
            token::Token,
        },
    };

    fn image() -> (ModuleImage, Token, Token) {
        let mut image = ModuleImage::new("Game.dll", "Game");
        let player = image.add_type_def(TypeDefRow {
            flags: TypeAttributes::PUBLIC,
            namespace: "Game".into(),
            name: "Player".into(),
            ..Default::default()
        });
        let hp = image.add_field(FieldRow {
            parent: player,
            flags: FieldAttributes::PUBLIC | FieldAttributes::STATIC,
            name: "hp".into(),
            signature: SignatureField {
                base: TypeSignature::I4,
            },
            offset: None,
        });
        let greeting = image.add_user_string("hi \"there\"");
        (image, hp, greeting)
    }

    #[test]
    fn test_render_tokens_and_literals() {
        let (image, hp, greeting) = image();
        let mut code = vec![0x7E];
        code.extend_from_slice(&hp.value().to_le_bytes());
        code.push(0x72);
        code.extend_from_slice(&greeting.value().to_le_bytes());
        code.extend_from_slice(&[0x1F, 0xF6, 0x2B, 0x00, 0x2A]);

        let text = render_body(&decode_stream(&code).unwrap(), &image).unwrap();
        assert_eq!(
            text,
            vec![
                "ldsfld Game.Player::System.Int32 hp",
                "ldstr \"hi \\\"there\\\"\"",
                "ldc.i4.s -10",
                "br.s IL_000e",
                "ret",
            ]
        );
    }

    #[test]
    fn test_render_dangling_token() {
        let (image, _, _) = image();
        // call 0x06000009, no such method
        let code = [0x28, 0x09, 0x00, 0x00, 0x06];
        let instrs = decode_stream(&code).unwrap();
        let err = render_instruction(&instrs[0], &image).unwrap_err();
        assert!(matches!(err, Error::ResolutionFailure { .. }));
    }

    #[test]
    fn test_render_float_bits() {
        let image = ModuleImage::default();
        // ldc.r4 -0.0
        let code = [0x22, 0x00, 0x00, 0x00, 0x80];
        let instrs = decode_stream(&code).unwrap();
        assert_eq!(
            render_instruction(&instrs[0], &image).unwrap(),
            "ldc.r4 -0 (0x80000000)"
        );
    }
}
