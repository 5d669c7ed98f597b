//! CIL opcode table (ECMA-335 Partition III).
//!
//! [`lookup`] maps an opcode (with its optional `0xFE` prefix) to its mnemonic and operand
//! encoding. Named constants are provided for the opcodes this crate emits itself.
#![allow(missing_docs)]

/// Encoding of the operand that follows an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit integer
    Int8,
    /// Unsigned 8-bit integer (short argument / local indices, `unaligned.`, `no.`)
    UInt8,
    /// Unsigned 16-bit integer (long argument / local indices)
    UInt16,
    /// Signed 32-bit integer
    Int32,
    /// Signed 64-bit integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Metadata token reference
    Token,
    /// Signed 8-bit branch displacement
    ShortBranch,
    /// Signed 32-bit branch displacement
    Branch,
    /// Switch table operand
    Switch,
}

/// Static description of one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCodeInfo {
    /// Textual mnemonic
    pub mnemonic: &'static str,
    /// Operand encoding
    pub operand: OperandType,
}

pub const FE_PREFIX: u8 = 0xFE;

pub const NOP: u8 = 0x00;
pub const LDARG_0: u8 = 0x02;
pub const LDARG_S: u8 = 0x0E;
pub const LDLOC_0: u8 = 0x06;
pub const LDLOC_S: u8 = 0x11;
pub const STLOC_0: u8 = 0x0A;
pub const STLOC_S: u8 = 0x13;
pub const LDNULL: u8 = 0x14;
pub const LDC_I4_M1: u8 = 0x15;
pub const LDC_I4_0: u8 = 0x16;
pub const LDC_I4_S: u8 = 0x1F;
pub const LDC_I4: u8 = 0x20;
pub const DUP: u8 = 0x25;
pub const POP: u8 = 0x26;
pub const CALL: u8 = 0x28;
pub const RET: u8 = 0x2A;
pub const BR: u8 = 0x38;
pub const BRFALSE: u8 = 0x39;
pub const BRTRUE: u8 = 0x3A;
pub const ADD: u8 = 0x58;
pub const CALLVIRT: u8 = 0x6F;
pub const LDSTR: u8 = 0x72;
pub const NEWOBJ: u8 = 0x73;
pub const THROW: u8 = 0x7A;
pub const LDFLD: u8 = 0x7B;
pub const STFLD: u8 = 0x7D;
pub const LDSFLD: u8 = 0x7E;
pub const STSFLD: u8 = 0x80;
pub const BOX: u8 = 0x8C;
pub const LEAVE: u8 = 0xDD;
pub const ENDFINALLY: u8 = 0xDC;

pub const FE_LDARG: u8 = 0x09;
pub const FE_LDLOC: u8 = 0x0C;
pub const FE_STLOC: u8 = 0x0E;
pub const FE_LDFTN: u8 = 0x06;

const fn op(mnemonic: &'static str, operand: OperandType) -> Option<OpCodeInfo> {
    Some(OpCodeInfo { mnemonic, operand })
}

/// Look up a single byte opcode.
#[must_use]
#[allow(clippy::too_many_lines)]
pub const fn lookup_single(opcode: u8) -> Option<OpCodeInfo> {
    use OperandType::{
        Branch, Float32, Float64, Int32, Int64, Int8, None, ShortBranch, Switch, Token, UInt8,
    };

    match opcode {
        0x00 => op("nop", None),
        0x01 => op("break", None),
        0x02 => op("ldarg.0", None),
        0x03 => op("ldarg.1", None),
        0x04 => op("ldarg.2", None),
        0x05 => op("ldarg.3", None),
        0x06 => op("ldloc.0", None),
        0x07 => op("ldloc.1", None),
        0x08 => op("ldloc.2", None),
        0x09 => op("ldloc.3", None),
        0x0A => op("stloc.0", None),
        0x0B => op("stloc.1", None),
        0x0C => op("stloc.2", None),
        0x0D => op("stloc.3", None),
        0x0E => op("ldarg.s", UInt8),
        0x0F => op("ldarga.s", UInt8),
        0x10 => op("starg.s", UInt8),
        0x11 => op("ldloc.s", UInt8),
        0x12 => op("ldloca.s", UInt8),
        0x13 => op("stloc.s", UInt8),
        0x14 => op("ldnull", None),
        0x15 => op("ldc.i4.m1", None),
        0x16 => op("ldc.i4.0", None),
        0x17 => op("ldc.i4.1", None),
        0x18 => op("ldc.i4.2", None),
        0x19 => op("ldc.i4.3", None),
        0x1A => op("ldc.i4.4", None),
        0x1B => op("ldc.i4.5", None),
        0x1C => op("ldc.i4.6", None),
        0x1D => op("ldc.i4.7", None),
        0x1E => op("ldc.i4.8", None),
        0x1F => op("ldc.i4.s", Int8),
        0x20 => op("ldc.i4", Int32),
        0x21 => op("ldc.i8", Int64),
        0x22 => op("ldc.r4", Float32),
        0x23 => op("ldc.r8", Float64),
        0x25 => op("dup", None),
        0x26 => op("pop", None),
        0x27 => op("jmp", Token),
        0x28 => op("call", Token),
        0x29 => op("calli", Token),
        0x2A => op("ret", None),
        0x2B => op("br.s", ShortBranch),
        0x2C => op("brfalse.s", ShortBranch),
        0x2D => op("brtrue.s", ShortBranch),
        0x2E => op("beq.s", ShortBranch),
        0x2F => op("bge.s", ShortBranch),
        0x30 => op("bgt.s", ShortBranch),
        0x31 => op("ble.s", ShortBranch),
        0x32 => op("blt.s", ShortBranch),
        0x33 => op("bne.un.s", ShortBranch),
        0x34 => op("bge.un.s", ShortBranch),
        0x35 => op("bgt.un.s", ShortBranch),
        0x36 => op("ble.un.s", ShortBranch),
        0x37 => op("blt.un.s", ShortBranch),
        0x38 => op("br", Branch),
        0x39 => op("brfalse", Branch),
        0x3A => op("brtrue", Branch),
        0x3B => op("beq", Branch),
        0x3C => op("bge", Branch),
        0x3D => op("bgt", Branch),
        0x3E => op("ble", Branch),
        0x3F => op("blt", Branch),
        0x40 => op("bne.un", Branch),
        0x41 => op("bge.un", Branch),
        0x42 => op("bgt.un", Branch),
        0x43 => op("ble.un", Branch),
        0x44 => op("blt.un", Branch),
        0x45 => op("switch", Switch),
        0x46 => op("ldind.i1", None),
        0x47 => op("ldind.u1", None),
        0x48 => op("ldind.i2", None),
        0x49 => op("ldind.u2", None),
        0x4A => op("ldind.i4", None),
        0x4B => op("ldind.u4", None),
        0x4C => op("ldind.i8", None),
        0x4D => op("ldind.i", None),
        0x4E => op("ldind.r4", None),
        0x4F => op("ldind.r8", None),
        0x50 => op("ldind.ref", None),
        0x51 => op("stind.ref", None),
        0x52 => op("stind.i1", None),
        0x53 => op("stind.i2", None),
        0x54 => op("stind.i4", None),
        0x55 => op("stind.i8", None),
        0x56 => op("stind.r4", None),
        0x57 => op("stind.r8", None),
        0x58 => op("add", None),
        0x59 => op("sub", None),
        0x5A => op("mul", None),
        0x5B => op("div", None),
        0x5C => op("div.un", None),
        0x5D => op("rem", None),
        0x5E => op("rem.un", None),
        0x5F => op("and", None),
        0x60 => op("or", None),
        0x61 => op("xor", None),
        0x62 => op("shl", None),
        0x63 => op("shr", None),
        0x64 => op("shr.un", None),
        0x65 => op("neg", None),
        0x66 => op("not", None),
        0x67 => op("conv.i1", None),
        0x68 => op("conv.i2", None),
        0x69 => op("conv.i4", None),
        0x6A => op("conv.i8", None),
        0x6B => op("conv.r4", None),
        0x6C => op("conv.r8", None),
        0x6D => op("conv.u4", None),
        0x6E => op("conv.u8", None),
        0x6F => op("callvirt", Token),
        0x70 => op("cpobj", Token),
        0x71 => op("ldobj", Token),
        0x72 => op("ldstr", Token),
        0x73 => op("newobj", Token),
        0x74 => op("castclass", Token),
        0x75 => op("isinst", Token),
        0x76 => op("conv.r.un", None),
        0x79 => op("unbox", Token),
        0x7A => op("throw", None),
        0x7B => op("ldfld", Token),
        0x7C => op("ldflda", Token),
        0x7D => op("stfld", Token),
        0x7E => op("ldsfld", Token),
        0x7F => op("ldsflda", Token),
        0x80 => op("stsfld", Token),
        0x81 => op("stobj", Token),
        0x82 => op("conv.ovf.i1.un", None),
        0x83 => op("conv.ovf.i2.un", None),
        0x84 => op("conv.ovf.i4.un", None),
        0x85 => op("conv.ovf.i8.un", None),
        0x86 => op("conv.ovf.u1.un", None),
        0x87 => op("conv.ovf.u2.un", None),
        0x88 => op("conv.ovf.u4.un", None),
        0x89 => op("conv.ovf.u8.un", None),
        0x8A => op("conv.ovf.i.un", None),
        0x8B => op("conv.ovf.u.un", None),
        0x8C => op("box", Token),
        0x8D => op("newarr", Token),
        0x8E => op("ldlen", None),
        0x8F => op("ldelema", Token),
        0x90 => op("ldelem.i1", None),
        0x91 => op("ldelem.u1", None),
        0x92 => op("ldelem.i2", None),
        0x93 => op("ldelem.u2", None),
        0x94 => op("ldelem.i4", None),
        0x95 => op("ldelem.u4", None),
        0x96 => op("ldelem.i8", None),
        0x97 => op("ldelem.i", None),
        0x98 => op("ldelem.r4", None),
        0x99 => op("ldelem.r8", None),
        0x9A => op("ldelem.ref", None),
        0x9B => op("stelem.i", None),
        0x9C => op("stelem.i1", None),
        0x9D => op("stelem.i2", None),
        0x9E => op("stelem.i4", None),
        0x9F => op("stelem.i8", None),
        0xA0 => op("stelem.r4", None),
        0xA1 => op("stelem.r8", None),
        0xA2 => op("stelem.ref", None),
        0xA3 => op("ldelem", Token),
        0xA4 => op("stelem", Token),
        0xA5 => op("unbox.any", Token),
        0xB3 => op("conv.ovf.i1", None),
        0xB4 => op("conv.ovf.u1", None),
        0xB5 => op("conv.ovf.i2", None),
        0xB6 => op("conv.ovf.u2", None),
        0xB7 => op("conv.ovf.i4", None),
        0xB8 => op("conv.ovf.u4", None),
        0xB9 => op("conv.ovf.i8", None),
        0xBA => op("conv.ovf.u8", None),
        0xC2 => op("refanyval", Token),
        0xC3 => op("ckfinite", None),
        0xC6 => op("mkrefany", Token),
        0xD0 => op("ldtoken", Token),
        0xD1 => op("conv.u2", None),
        0xD2 => op("conv.u1", None),
        0xD3 => op("conv.i", None),
        0xD4 => op("conv.ovf.i", None),
        0xD5 => op("conv.ovf.u", None),
        0xD6 => op("add.ovf", None),
        0xD7 => op("add.ovf.un", None),
        0xD8 => op("mul.ovf", None),
        0xD9 => op("mul.ovf.un", None),
        0xDA => op("sub.ovf", None),
        0xDB => op("sub.ovf.un", None),
        0xDC => op("endfinally", None),
        0xDD => op("leave", Branch),
        0xDE => op("leave.s", ShortBranch),
        0xDF => op("stind.i", None),
        0xE0 => op("conv.u", None),
        _ => Option::None,
    }
}

/// Look up the second byte of a `0xFE` prefixed opcode.
#[must_use]
pub const fn lookup_fe(opcode: u8) -> Option<OpCodeInfo> {
    use OperandType::{None, Token, UInt16, UInt8};

    match opcode {
        0x00 => op("arglist", None),
        0x01 => op("ceq", None),
        0x02 => op("cgt", None),
        0x03 => op("cgt.un", None),
        0x04 => op("clt", None),
        0x05 => op("clt.un", None),
        0x06 => op("ldftn", Token),
        0x07 => op("ldvirtftn", Token),
        0x09 => op("ldarg", UInt16),
        0x0A => op("ldarga", UInt16),
        0x0B => op("starg", UInt16),
        0x0C => op("ldloc", UInt16),
        0x0D => op("ldloca", UInt16),
        0x0E => op("stloc", UInt16),
        0x0F => op("localloc", None),
        0x11 => op("endfilter", None),
        0x12 => op("unaligned.", UInt8),
        0x13 => op("volatile.", None),
        0x14 => op("tail.", None),
        0x15 => op("initobj", Token),
        0x16 => op("constrained.", Token),
        0x17 => op("cpblk", None),
        0x18 => op("initblk", None),
        0x19 => op("no.", UInt8),
        0x1A => op("rethrow", None),
        0x1C => op("sizeof", Token),
        0x1D => op("refanytype", None),
        0x1E => op("readonly.", None),
        _ => Option::None,
    }
}
