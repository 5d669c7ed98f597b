//! CIL instruction handling.
//!
//! The patch pipeline needs four things from method bodies: decode them
//! ([`decode_stream`]), compare them across two compiles ([`render_body`]), rewrite their
//! token operands in place ([`patch_tokens`]) and synthesize small forwarding bodies
//! ([`BodyEncoder`]). Decoded branch operands carry absolute targets.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::assembly::{decode_stream, BodyEncoder};
//!
//! let mut asm = BodyEncoder::new();
//! asm.ldc_i4(2)?.ret()?;
//! let code = asm.finish()?;
//!
//! let mnemonics: Vec<_> = decode_stream(&code)?.iter().map(|i| i.mnemonic).collect();
//! assert_eq!(mnemonics, ["ldc.i4.2", "ret"]);
//! # Ok::<(), dotpatch::Error>(())
//! ```

mod decoder;
mod encoder;
mod instruction;
pub mod opcodes;
mod patch;
mod render;

pub use decoder::{decode_instruction, decode_stream};
pub use encoder::{BodyEncoder, Label};
pub use instruction::{Immediate, Instruction, Operand};
pub use patch::{operand_tokens, patch_tokens};
pub use render::{label, render_body, render_instruction};
