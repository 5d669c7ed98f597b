//! In-place operand rewriting.

use crate::{
    assembly::{decode_stream, Operand},
    file::io::write_le_at,
    metadata::token::Token,
    Result,
};

/// Rewrite every token operand of `code` through `map`.
///
/// Instruction boundaries and branch displacements are untouched; only the four token bytes
/// of each operand are replaced. Returns the number of operands whose value changed.
///
/// # Errors
/// Fails if `code` cannot be decoded or `map` returns an error.
///
/// # Examples
///
/// ```rust
/// use dotpatch::{assembly::patch_tokens, metadata::token::Token};
///
/// // ldsfld 0x04000001, ret
/// let mut code = vec![0x7E, 0x01, 0x00, 0x00, 0x04, 0x2A];
/// let changed = patch_tokens(&mut code, |token| {
///     Ok(if token == Token::new(0x0400_0001) { Token::new(0x0A00_0003) } else { token })
/// })?;
/// assert_eq!(changed, 1);
/// assert_eq!(&code[1..5], &[0x03, 0x00, 0x00, 0x0A]);
/// # Ok::<(), dotpatch::Error>(())
/// ```
pub fn patch_tokens<F>(code: &mut [u8], mut map: F) -> Result<usize>
where
    F: FnMut(Token) -> Result<Token>,
{
    let instructions = decode_stream(code)?;
    let mut changed = 0;

    for instruction in &instructions {
        let Operand::Token(token) = instruction.operand else {
            continue;
        };

        let replacement = map(token)?;
        if replacement != token {
            let mut offset = instruction.operand_offset() as usize;
            write_le_at::<u32>(code, &mut offset, replacement.value())?;
            changed += 1;
        }
    }

    Ok(changed)
}

/// Collect every token operand of `code`, in instruction order.
///
/// # Errors
/// Fails if `code` cannot be decoded.
pub fn operand_tokens(code: &[u8]) -> Result<Vec<Token>> {
    Ok(decode_stream(code)?
        .iter()
        .filter_map(|instruction| instruction.token())
        .collect())
}
