//! A small CIL emitter used for synthesized method bodies.
//!
//! [`BodyEncoder`] writes instructions sequentially, picking the short form of an opcode
//! whenever the operand fits. Forward branches go through [`Label`]s and always use the
//! 32-bit branch forms, so no relaxation pass is needed. Every emitter returns
//! `Result<&mut Self>` so calls chain with `?`.
//!
//! # Examples
//!
//! ```rust
//! use dotpatch::assembly::{decode_stream, BodyEncoder};
//!
//! let mut asm = BodyEncoder::new();
//! let done = asm.define_label();
//! asm.ldarg(0)?
//!    .brfalse(done)?
//!    .ldc_i4(2)?
//!    .ret()?
//!    .mark(done)?
//!    .ldc_i4(1)?
//!    .ret()?;
//! let code = asm.finish()?;
//! assert_eq!(decode_stream(&code)?.len(), 6);
//! # Ok::<(), dotpatch::Error>(())
//! ```

use crate::{
    assembly::opcodes::{self, FE_PREFIX},
    metadata::token::Token,
    Error, Result,
};

/// A branch target inside a [`BodyEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Sequential CIL writer with label resolution.
#[derive(Debug, Default)]
pub struct BodyEncoder {
    code: Vec<u8>,
    labels: Vec<Option<u32>>,
    /// (position of the 4 displacement bytes, label)
    fixups: Vec<(usize, Label)>,
}

impl BodyEncoder {
    /// Creates an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current write offset.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    /// Allocate a label to be placed later with [`BodyEncoder::mark`].
    pub fn define_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the current offset.
    ///
    /// # Errors
    /// Returns an error for unknown or already bound labels.
    pub fn mark(&mut self, label: Label) -> Result<&mut Self> {
        let offset = self.offset();
        match self.labels.get_mut(label.0) {
            Some(slot @ None) => *slot = Some(offset),
            Some(Some(_)) => return Err(Error::Error(format!("Label {} bound twice", label.0))),
            None => return Err(Error::Error(format!("Unknown label {}", label.0))),
        }
        Ok(self)
    }

    /// Emit a single byte opcode without operand.
    ///
    /// # Errors
    /// Returns an error if `opcode` is unknown or takes an operand.
    pub fn op(&mut self, opcode: u8) -> Result<&mut Self> {
        match opcodes::lookup_single(opcode) {
            Some(info) if info.operand == opcodes::OperandType::None => {
                self.code.push(opcode);
                Ok(self)
            }
            _ => Err(Error::Error(format!(
                "Opcode 0x{opcode:02x} cannot be emitted without operand"
            ))),
        }
    }

    /// Emit an opcode taking a metadata token. Two byte opcodes are passed with the
    /// [`FE_PREFIX`] as high byte, e.g. `0xFE06` for `ldftn`.
    ///
    /// # Errors
    /// Returns an error if `opcode` does not take a token operand.
    pub fn token_op(&mut self, opcode: u16, token: Token) -> Result<&mut Self> {
        let info = if opcode >> 8 == u16::from(FE_PREFIX) {
            opcodes::lookup_fe(opcode as u8)
        } else if opcode <= 0xFF {
            opcodes::lookup_single(opcode as u8)
        } else {
            None
        };

        match info {
            Some(info) if info.operand == opcodes::OperandType::Token => {
                if opcode > 0xFF {
                    self.code.push(FE_PREFIX);
                }
                self.code.push(opcode as u8);
                self.code.extend_from_slice(&token.value().to_le_bytes());
                Ok(self)
            }
            _ => Err(Error::Error(format!(
                "Opcode 0x{opcode:04x} does not take a token operand"
            ))),
        }
    }

    fn branch(&mut self, opcode: u8, label: Label) -> Result<&mut Self> {
        if label.0 >= self.labels.len() {
            return Err(Error::Error(format!("Unknown label {}", label.0)));
        }
        self.code.push(opcode);
        self.fixups.push((self.code.len(), label));
        self.code.extend_from_slice(&[0; 4]);
        Ok(self)
    }

    /// `nop`
    pub fn nop(&mut self) -> Result<&mut Self> {
        self.op(opcodes::NOP)
    }

    /// `ret`
    pub fn ret(&mut self) -> Result<&mut Self> {
        self.op(opcodes::RET)
    }

    /// `pop`
    pub fn pop(&mut self) -> Result<&mut Self> {
        self.op(opcodes::POP)
    }

    /// `dup`
    pub fn dup(&mut self) -> Result<&mut Self> {
        self.op(opcodes::DUP)
    }

    /// `add`
    pub fn add(&mut self) -> Result<&mut Self> {
        self.op(opcodes::ADD)
    }

    /// `ldnull`
    pub fn ldnull(&mut self) -> Result<&mut Self> {
        self.op(opcodes::LDNULL)
    }

    /// `throw`
    pub fn throw(&mut self) -> Result<&mut Self> {
        self.op(opcodes::THROW)
    }

    /// Load argument `index`, using `ldarg.N` / `ldarg.s` where possible.
    pub fn ldarg(&mut self, index: u16) -> Result<&mut Self> {
        match index {
            0..=3 => self.code.push(opcodes::LDARG_0 + index as u8),
            4..=255 => self.code.extend_from_slice(&[opcodes::LDARG_S, index as u8]),
            _ => {
                self.code.extend_from_slice(&[FE_PREFIX, opcodes::FE_LDARG]);
                self.code.extend_from_slice(&index.to_le_bytes());
            }
        }
        Ok(self)
    }

    /// Load local `index`.
    pub fn ldloc(&mut self, index: u16) -> Result<&mut Self> {
        match index {
            0..=3 => self.code.push(opcodes::LDLOC_0 + index as u8),
            4..=255 => self.code.extend_from_slice(&[opcodes::LDLOC_S, index as u8]),
            _ => {
                self.code.extend_from_slice(&[FE_PREFIX, opcodes::FE_LDLOC]);
                self.code.extend_from_slice(&index.to_le_bytes());
            }
        }
        Ok(self)
    }

    /// Store into local `index`.
    pub fn stloc(&mut self, index: u16) -> Result<&mut Self> {
        match index {
            0..=3 => self.code.push(opcodes::STLOC_0 + index as u8),
            4..=255 => self.code.extend_from_slice(&[opcodes::STLOC_S, index as u8]),
            _ => {
                self.code.extend_from_slice(&[FE_PREFIX, opcodes::FE_STLOC]);
                self.code.extend_from_slice(&index.to_le_bytes());
            }
        }
        Ok(self)
    }

    /// Load a 32-bit constant, using the shortest encoding.
    pub fn ldc_i4(&mut self, value: i32) -> Result<&mut Self> {
        match value {
            -1 => self.code.push(opcodes::LDC_I4_M1),
            0..=8 => self.code.push(opcodes::LDC_I4_0 + value as u8),
            -128..=127 => self
                .code
                .extend_from_slice(&[opcodes::LDC_I4_S, value as i8 as u8]),
            _ => {
                self.code.push(opcodes::LDC_I4);
                self.code.extend_from_slice(&value.to_le_bytes());
            }
        }
        Ok(self)
    }

    /// `ldstr` with a user string token.
    pub fn ldstr(&mut self, token: Token) -> Result<&mut Self> {
        self.token_op(u16::from(opcodes::LDSTR), token)
    }

    /// `call`
    pub fn call(&mut self, method: Token) -> Result<&mut Self> {
        self.token_op(u16::from(opcodes::CALL), method)
    }

    /// `callvirt`
    pub fn callvirt(&mut self, method: Token) -> Result<&mut Self> {
        self.token_op(u16::from(opcodes::CALLVIRT), method)
    }

    /// `newobj`
    pub fn newobj(&mut self, ctor: Token) -> Result<&mut Self> {
        self.token_op(u16::from(opcodes::NEWOBJ), ctor)
    }

    /// `ldfld`
    pub fn ldfld(&mut self, field: Token) -> Result<&mut Self> {
        self.token_op(u16::from(opcodes::LDFLD), field)
    }

    /// `stfld`
    pub fn stfld(&mut self, field: Token) -> Result<&mut Self> {
        self.token_op(u16::from(opcodes::STFLD), field)
    }

    /// `ldsfld`
    pub fn ldsfld(&mut self, field: Token) -> Result<&mut Self> {
        self.token_op(u16::from(opcodes::LDSFLD), field)
    }

    /// `stsfld`
    pub fn stsfld(&mut self, field: Token) -> Result<&mut Self> {
        self.token_op(u16::from(opcodes::STSFLD), field)
    }

    /// `box`
    pub fn box_value(&mut self, ty: Token) -> Result<&mut Self> {
        self.token_op(u16::from(opcodes::BOX), ty)
    }

    /// `ldftn`
    pub fn ldftn(&mut self, method: Token) -> Result<&mut Self> {
        self.token_op(
            u16::from(FE_PREFIX) << 8 | u16::from(opcodes::FE_LDFTN),
            method,
        )
    }

    /// `br` to `label`.
    ///
    /// # Errors
    /// Returns an error for unknown labels.
    pub fn br(&mut self, label: Label) -> Result<&mut Self> {
        self.branch(opcodes::BR, label)
    }

    /// `brtrue` to `label`.
    ///
    /// # Errors
    /// Returns an error for unknown labels.
    pub fn brtrue(&mut self, label: Label) -> Result<&mut Self> {
        self.branch(opcodes::BRTRUE, label)
    }

    /// `brfalse` to `label`.
    ///
    /// # Errors
    /// Returns an error for unknown labels.
    pub fn brfalse(&mut self, label: Label) -> Result<&mut Self> {
        self.branch(opcodes::BRFALSE, label)
    }

    /// `leave` to `label`.
    ///
    /// # Errors
    /// Returns an error for unknown labels.
    pub fn leave(&mut self, label: Label) -> Result<&mut Self> {
        self.branch(opcodes::LEAVE, label)
    }

    /// Resolve all branches and return the encoded body.
    ///
    /// # Errors
    /// Returns an error if a branch refers to a label that was never marked.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        for (position, label) in std::mem::take(&mut self.fixups) {
            let Some(Some(target)) = self.labels.get(label.0) else {
                return Err(Error::Error(format!("Label {} was never marked", label.0)));
            };

            let next = position as i64 + 4;
            let displacement = i32::try_from(i64::from(*target) - next)
                .map_err(|_| Error::Error("Branch displacement overflow".to_string()))?;
            self.code[position..position + 4].copy_from_slice(&displacement.to_le_bytes());
        }
        Ok(self.code)
    }
}
