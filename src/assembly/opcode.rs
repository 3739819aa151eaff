//! The CIL opcode set (ECMA-335 Partition III).
//!
//! [`Opcode`] is generated from a single table that records, per opcode, the encoded bytes, the
//! mnemonic, the operand kind, the control flow behaviour and the fixed stack effect. Call-like
//! opcodes (`call`, `callvirt`, `calli`, `newobj`) as well as `ret` and `jmp` carry a stack
//! effect that depends on their operand and are resolved by
//! [`crate::assembly::Instruction::stack_behavior`].
//!
//! The mnemonic round-trips through [`std::str::FromStr`] and [`std::fmt::Display`]:
//!
//! ```rust
//! use dotscope_cflow::assembly::Opcode;
//!
//! let op: Opcode = "brtrue.s".parse().unwrap();
//! assert_eq!(op, Opcode::BrtrueS);
//! assert_eq!(op.to_string(), "brtrue.s");
//! assert_eq!(op.long_form(), Opcode::Brtrue);
//! ```
#![allow(missing_docs)]

use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::assembly::instruction::{FlowType, OperandType};

/// Prefix byte shared by all two-byte opcodes.
pub const FE_PREFIX: u8 = 0xFE;

macro_rules! opcodes {
    ($( $name:ident => ($prefix:expr, $code:expr, $mnemonic:literal, $operand:ident, $flow:ident, $pops:expr, $pushes:expr) ),* $(,)?) => {
        /// A CIL opcode.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter)]
        pub enum Opcode {
            $(
                #[strum(serialize = $mnemonic)]
                $name,
            )*
        }

        impl Opcode {
            /// Encoded opcode bytes as `(prefix, code)`; the prefix is 0 for one-byte opcodes.
            #[must_use]
            pub const fn encoding(self) -> (u8, u8) {
                match self {
                    $( Opcode::$name => ($prefix, $code), )*
                }
            }

            /// Kind of operand this opcode takes.
            #[must_use]
            pub const fn operand_type(self) -> OperandType {
                match self {
                    $( Opcode::$name => OperandType::$operand, )*
                }
            }

            /// Control flow behaviour of this opcode.
            #[must_use]
            pub const fn flow_type(self) -> FlowType {
                match self {
                    $( Opcode::$name => FlowType::$flow, )*
                }
            }

            /// Fixed `(pops, pushes)` of this opcode; zero for opcodes whose effect depends
            /// on the operand.
            #[must_use]
            pub const fn fixed_stack(self) -> (u8, u8) {
                match self {
                    $( Opcode::$name => ($pops, $pushes), )*
                }
            }
        }
    };
}

opcodes! {
    Nop => (0, 0x00, "nop", None, Sequential, 0, 0),
    Break => (0, 0x01, "break", None, Sequential, 0, 0),
    Ldarg0 => (0, 0x02, "ldarg.0", None, Sequential, 0, 1),
    Ldarg1 => (0, 0x03, "ldarg.1", None, Sequential, 0, 1),
    Ldarg2 => (0, 0x04, "ldarg.2", None, Sequential, 0, 1),
    Ldarg3 => (0, 0x05, "ldarg.3", None, Sequential, 0, 1),
    Ldloc0 => (0, 0x06, "ldloc.0", None, Sequential, 0, 1),
    Ldloc1 => (0, 0x07, "ldloc.1", None, Sequential, 0, 1),
    Ldloc2 => (0, 0x08, "ldloc.2", None, Sequential, 0, 1),
    Ldloc3 => (0, 0x09, "ldloc.3", None, Sequential, 0, 1),
    Stloc0 => (0, 0x0A, "stloc.0", None, Sequential, 1, 0),
    Stloc1 => (0, 0x0B, "stloc.1", None, Sequential, 1, 0),
    Stloc2 => (0, 0x0C, "stloc.2", None, Sequential, 1, 0),
    Stloc3 => (0, 0x0D, "stloc.3", None, Sequential, 1, 0),
    LdargS => (0, 0x0E, "ldarg.s", ShortVar, Sequential, 0, 1),
    LdargaS => (0, 0x0F, "ldarga.s", ShortVar, Sequential, 0, 1),
    StargS => (0, 0x10, "starg.s", ShortVar, Sequential, 1, 0),
    LdlocS => (0, 0x11, "ldloc.s", ShortVar, Sequential, 0, 1),
    LdlocaS => (0, 0x12, "ldloca.s", ShortVar, Sequential, 0, 1),
    StlocS => (0, 0x13, "stloc.s", ShortVar, Sequential, 1, 0),
    Ldnull => (0, 0x14, "ldnull", None, Sequential, 0, 1),
    LdcI4M1 => (0, 0x15, "ldc.i4.m1", None, Sequential, 0, 1),
    LdcI40 => (0, 0x16, "ldc.i4.0", None, Sequential, 0, 1),
    LdcI41 => (0, 0x17, "ldc.i4.1", None, Sequential, 0, 1),
    LdcI42 => (0, 0x18, "ldc.i4.2", None, Sequential, 0, 1),
    LdcI43 => (0, 0x19, "ldc.i4.3", None, Sequential, 0, 1),
    LdcI44 => (0, 0x1A, "ldc.i4.4", None, Sequential, 0, 1),
    LdcI45 => (0, 0x1B, "ldc.i4.5", None, Sequential, 0, 1),
    LdcI46 => (0, 0x1C, "ldc.i4.6", None, Sequential, 0, 1),
    LdcI47 => (0, 0x1D, "ldc.i4.7", None, Sequential, 0, 1),
    LdcI48 => (0, 0x1E, "ldc.i4.8", None, Sequential, 0, 1),
    LdcI4S => (0, 0x1F, "ldc.i4.s", Int8, Sequential, 0, 1),
    LdcI4 => (0, 0x20, "ldc.i4", Int32, Sequential, 0, 1),
    LdcI8 => (0, 0x21, "ldc.i8", Int64, Sequential, 0, 1),
    LdcR4 => (0, 0x22, "ldc.r4", Float32, Sequential, 0, 1),
    LdcR8 => (0, 0x23, "ldc.r8", Float64, Sequential, 0, 1),
    Dup => (0, 0x25, "dup", None, Sequential, 1, 2),
    Pop => (0, 0x26, "pop", None, Sequential, 1, 0),
    Jmp => (0, 0x27, "jmp", Method, Return, 0, 0),
    Call => (0, 0x28, "call", Method, Call, 0, 0),
    Calli => (0, 0x29, "calli", Signature, Call, 0, 0),
    Ret => (0, 0x2A, "ret", None, Return, 0, 0),
    BrS => (0, 0x2B, "br.s", ShortBranch, UnconditionalBranch, 0, 0),
    BrfalseS => (0, 0x2C, "brfalse.s", ShortBranch, ConditionalBranch, 1, 0),
    BrtrueS => (0, 0x2D, "brtrue.s", ShortBranch, ConditionalBranch, 1, 0),
    BeqS => (0, 0x2E, "beq.s", ShortBranch, ConditionalBranch, 2, 0),
    BgeS => (0, 0x2F, "bge.s", ShortBranch, ConditionalBranch, 2, 0),
    BgtS => (0, 0x30, "bgt.s", ShortBranch, ConditionalBranch, 2, 0),
    BleS => (0, 0x31, "ble.s", ShortBranch, ConditionalBranch, 2, 0),
    BltS => (0, 0x32, "blt.s", ShortBranch, ConditionalBranch, 2, 0),
    BneUnS => (0, 0x33, "bne.un.s", ShortBranch, ConditionalBranch, 2, 0),
    BgeUnS => (0, 0x34, "bge.un.s", ShortBranch, ConditionalBranch, 2, 0),
    BgtUnS => (0, 0x35, "bgt.un.s", ShortBranch, ConditionalBranch, 2, 0),
    BleUnS => (0, 0x36, "ble.un.s", ShortBranch, ConditionalBranch, 2, 0),
    BltUnS => (0, 0x37, "blt.un.s", ShortBranch, ConditionalBranch, 2, 0),
    Br => (0, 0x38, "br", Branch, UnconditionalBranch, 0, 0),
    Brfalse => (0, 0x39, "brfalse", Branch, ConditionalBranch, 1, 0),
    Brtrue => (0, 0x3A, "brtrue", Branch, ConditionalBranch, 1, 0),
    Beq => (0, 0x3B, "beq", Branch, ConditionalBranch, 2, 0),
    Bge => (0, 0x3C, "bge", Branch, ConditionalBranch, 2, 0),
    Bgt => (0, 0x3D, "bgt", Branch, ConditionalBranch, 2, 0),
    Ble => (0, 0x3E, "ble", Branch, ConditionalBranch, 2, 0),
    Blt => (0, 0x3F, "blt", Branch, ConditionalBranch, 2, 0),
    BneUn => (0, 0x40, "bne.un", Branch, ConditionalBranch, 2, 0),
    BgeUn => (0, 0x41, "bge.un", Branch, ConditionalBranch, 2, 0),
    BgtUn => (0, 0x42, "bgt.un", Branch, ConditionalBranch, 2, 0),
    BleUn => (0, 0x43, "ble.un", Branch, ConditionalBranch, 2, 0),
    BltUn => (0, 0x44, "blt.un", Branch, ConditionalBranch, 2, 0),
    Switch => (0, 0x45, "switch", Switch, Switch, 1, 0),
    LdindI1 => (0, 0x46, "ldind.i1", None, Sequential, 1, 1),
    LdindU1 => (0, 0x47, "ldind.u1", None, Sequential, 1, 1),
    LdindI2 => (0, 0x48, "ldind.i2", None, Sequential, 1, 1),
    LdindU2 => (0, 0x49, "ldind.u2", None, Sequential, 1, 1),
    LdindI4 => (0, 0x4A, "ldind.i4", None, Sequential, 1, 1),
    LdindU4 => (0, 0x4B, "ldind.u4", None, Sequential, 1, 1),
    LdindI8 => (0, 0x4C, "ldind.i8", None, Sequential, 1, 1),
    LdindI => (0, 0x4D, "ldind.i", None, Sequential, 1, 1),
    LdindR4 => (0, 0x4E, "ldind.r4", None, Sequential, 1, 1),
    LdindR8 => (0, 0x4F, "ldind.r8", None, Sequential, 1, 1),
    LdindRef => (0, 0x50, "ldind.ref", None, Sequential, 1, 1),
    StindRef => (0, 0x51, "stind.ref", None, Sequential, 2, 0),
    StindI1 => (0, 0x52, "stind.i1", None, Sequential, 2, 0),
    StindI2 => (0, 0x53, "stind.i2", None, Sequential, 2, 0),
    StindI4 => (0, 0x54, "stind.i4", None, Sequential, 2, 0),
    StindI8 => (0, 0x55, "stind.i8", None, Sequential, 2, 0),
    StindR4 => (0, 0x56, "stind.r4", None, Sequential, 2, 0),
    StindR8 => (0, 0x57, "stind.r8", None, Sequential, 2, 0),
    Add => (0, 0x58, "add", None, Sequential, 2, 1),
    Sub => (0, 0x59, "sub", None, Sequential, 2, 1),
    Mul => (0, 0x5A, "mul", None, Sequential, 2, 1),
    Div => (0, 0x5B, "div", None, Sequential, 2, 1),
    DivUn => (0, 0x5C, "div.un", None, Sequential, 2, 1),
    Rem => (0, 0x5D, "rem", None, Sequential, 2, 1),
    RemUn => (0, 0x5E, "rem.un", None, Sequential, 2, 1),
    And => (0, 0x5F, "and", None, Sequential, 2, 1),
    Or => (0, 0x60, "or", None, Sequential, 2, 1),
    Xor => (0, 0x61, "xor", None, Sequential, 2, 1),
    Shl => (0, 0x62, "shl", None, Sequential, 2, 1),
    Shr => (0, 0x63, "shr", None, Sequential, 2, 1),
    ShrUn => (0, 0x64, "shr.un", None, Sequential, 2, 1),
    Neg => (0, 0x65, "neg", None, Sequential, 1, 1),
    Not => (0, 0x66, "not", None, Sequential, 1, 1),
    ConvI1 => (0, 0x67, "conv.i1", None, Sequential, 1, 1),
    ConvI2 => (0, 0x68, "conv.i2", None, Sequential, 1, 1),
    ConvI4 => (0, 0x69, "conv.i4", None, Sequential, 1, 1),
    ConvI8 => (0, 0x6A, "conv.i8", None, Sequential, 1, 1),
    ConvR4 => (0, 0x6B, "conv.r4", None, Sequential, 1, 1),
    ConvR8 => (0, 0x6C, "conv.r8", None, Sequential, 1, 1),
    ConvU4 => (0, 0x6D, "conv.u4", None, Sequential, 1, 1),
    ConvU8 => (0, 0x6E, "conv.u8", None, Sequential, 1, 1),
    Callvirt => (0, 0x6F, "callvirt", Method, Call, 0, 0),
    Cpobj => (0, 0x70, "cpobj", Type, Sequential, 2, 0),
    Ldobj => (0, 0x71, "ldobj", Type, Sequential, 1, 1),
    Ldstr => (0, 0x72, "ldstr", String, Sequential, 0, 1),
    Newobj => (0, 0x73, "newobj", Method, Call, 0, 0),
    Castclass => (0, 0x74, "castclass", Type, Sequential, 1, 1),
    Isinst => (0, 0x75, "isinst", Type, Sequential, 1, 1),
    ConvRUn => (0, 0x76, "conv.r.un", None, Sequential, 1, 1),
    Unbox => (0, 0x79, "unbox", Type, Sequential, 1, 1),
    Throw => (0, 0x7A, "throw", None, Throw, 1, 0),
    Ldfld => (0, 0x7B, "ldfld", Field, Sequential, 1, 1),
    Ldflda => (0, 0x7C, "ldflda", Field, Sequential, 1, 1),
    Stfld => (0, 0x7D, "stfld", Field, Sequential, 2, 0),
    Ldsfld => (0, 0x7E, "ldsfld", Field, Sequential, 0, 1),
    Ldsflda => (0, 0x7F, "ldsflda", Field, Sequential, 0, 1),
    Stsfld => (0, 0x80, "stsfld", Field, Sequential, 1, 0),
    Stobj => (0, 0x81, "stobj", Type, Sequential, 2, 0),
    ConvOvfI1Un => (0, 0x82, "conv.ovf.i1.un", None, Sequential, 1, 1),
    ConvOvfI2Un => (0, 0x83, "conv.ovf.i2.un", None, Sequential, 1, 1),
    ConvOvfI4Un => (0, 0x84, "conv.ovf.i4.un", None, Sequential, 1, 1),
    ConvOvfI8Un => (0, 0x85, "conv.ovf.i8.un", None, Sequential, 1, 1),
    ConvOvfU1Un => (0, 0x86, "conv.ovf.u1.un", None, Sequential, 1, 1),
    ConvOvfU2Un => (0, 0x87, "conv.ovf.u2.un", None, Sequential, 1, 1),
    ConvOvfU4Un => (0, 0x88, "conv.ovf.u4.un", None, Sequential, 1, 1),
    ConvOvfU8Un => (0, 0x89, "conv.ovf.u8.un", None, Sequential, 1, 1),
    ConvOvfIUn => (0, 0x8A, "conv.ovf.i.un", None, Sequential, 1, 1),
    ConvOvfUUn => (0, 0x8B, "conv.ovf.u.un", None, Sequential, 1, 1),
    Box => (0, 0x8C, "box", Type, Sequential, 1, 1),
    Newarr => (0, 0x8D, "newarr", Type, Sequential, 1, 1),
    Ldlen => (0, 0x8E, "ldlen", None, Sequential, 1, 1),
    Ldelema => (0, 0x8F, "ldelema", Type, Sequential, 2, 1),
    LdelemI1 => (0, 0x90, "ldelem.i1", None, Sequential, 2, 1),
    LdelemU1 => (0, 0x91, "ldelem.u1", None, Sequential, 2, 1),
    LdelemI2 => (0, 0x92, "ldelem.i2", None, Sequential, 2, 1),
    LdelemU2 => (0, 0x93, "ldelem.u2", None, Sequential, 2, 1),
    LdelemI4 => (0, 0x94, "ldelem.i4", None, Sequential, 2, 1),
    LdelemU4 => (0, 0x95, "ldelem.u4", None, Sequential, 2, 1),
    LdelemI8 => (0, 0x96, "ldelem.i8", None, Sequential, 2, 1),
    LdelemI => (0, 0x97, "ldelem.i", None, Sequential, 2, 1),
    LdelemR4 => (0, 0x98, "ldelem.r4", None, Sequential, 2, 1),
    LdelemR8 => (0, 0x99, "ldelem.r8", None, Sequential, 2, 1),
    LdelemRef => (0, 0x9A, "ldelem.ref", None, Sequential, 2, 1),
    StelemI => (0, 0x9B, "stelem.i", None, Sequential, 3, 0),
    StelemI1 => (0, 0x9C, "stelem.i1", None, Sequential, 3, 0),
    StelemI2 => (0, 0x9D, "stelem.i2", None, Sequential, 3, 0),
    StelemI4 => (0, 0x9E, "stelem.i4", None, Sequential, 3, 0),
    StelemI8 => (0, 0x9F, "stelem.i8", None, Sequential, 3, 0),
    StelemR4 => (0, 0xA0, "stelem.r4", None, Sequential, 3, 0),
    StelemR8 => (0, 0xA1, "stelem.r8", None, Sequential, 3, 0),
    StelemRef => (0, 0xA2, "stelem.ref", None, Sequential, 3, 0),
    Ldelem => (0, 0xA3, "ldelem", Type, Sequential, 2, 1),
    Stelem => (0, 0xA4, "stelem", Type, Sequential, 3, 0),
    UnboxAny => (0, 0xA5, "unbox.any", Type, Sequential, 1, 1),
    ConvOvfI1 => (0, 0xB3, "conv.ovf.i1", None, Sequential, 1, 1),
    ConvOvfU1 => (0, 0xB4, "conv.ovf.u1", None, Sequential, 1, 1),
    ConvOvfI2 => (0, 0xB5, "conv.ovf.i2", None, Sequential, 1, 1),
    ConvOvfU2 => (0, 0xB6, "conv.ovf.u2", None, Sequential, 1, 1),
    ConvOvfI4 => (0, 0xB7, "conv.ovf.i4", None, Sequential, 1, 1),
    ConvOvfU4 => (0, 0xB8, "conv.ovf.u4", None, Sequential, 1, 1),
    ConvOvfI8 => (0, 0xB9, "conv.ovf.i8", None, Sequential, 1, 1),
    ConvOvfU8 => (0, 0xBA, "conv.ovf.u8", None, Sequential, 1, 1),
    Refanyval => (0, 0xC2, "refanyval", Type, Sequential, 1, 1),
    Ckfinite => (0, 0xC3, "ckfinite", None, Sequential, 1, 1),
    Mkrefany => (0, 0xC6, "mkrefany", Type, Sequential, 1, 1),
    Ldtoken => (0, 0xD0, "ldtoken", Token, Sequential, 0, 1),
    ConvU2 => (0, 0xD1, "conv.u2", None, Sequential, 1, 1),
    ConvU1 => (0, 0xD2, "conv.u1", None, Sequential, 1, 1),
    ConvI => (0, 0xD3, "conv.i", None, Sequential, 1, 1),
    ConvOvfI => (0, 0xD4, "conv.ovf.i", None, Sequential, 1, 1),
    ConvOvfU => (0, 0xD5, "conv.ovf.u", None, Sequential, 1, 1),
    AddOvf => (0, 0xD6, "add.ovf", None, Sequential, 2, 1),
    AddOvfUn => (0, 0xD7, "add.ovf.un", None, Sequential, 2, 1),
    MulOvf => (0, 0xD8, "mul.ovf", None, Sequential, 2, 1),
    MulOvfUn => (0, 0xD9, "mul.ovf.un", None, Sequential, 2, 1),
    SubOvf => (0, 0xDA, "sub.ovf", None, Sequential, 2, 1),
    SubOvfUn => (0, 0xDB, "sub.ovf.un", None, Sequential, 2, 1),
    Endfinally => (0, 0xDC, "endfinally", None, EndFinally, 0, 0),
    Leave => (0, 0xDD, "leave", Branch, Leave, 0, 0),
    LeaveS => (0, 0xDE, "leave.s", ShortBranch, Leave, 0, 0),
    StindI => (0, 0xDF, "stind.i", None, Sequential, 2, 0),
    ConvU => (0, 0xE0, "conv.u", None, Sequential, 1, 1),
    Arglist => (FE_PREFIX, 0x00, "arglist", None, Sequential, 0, 1),
    Ceq => (FE_PREFIX, 0x01, "ceq", None, Sequential, 2, 1),
    Cgt => (FE_PREFIX, 0x02, "cgt", None, Sequential, 2, 1),
    CgtUn => (FE_PREFIX, 0x03, "cgt.un", None, Sequential, 2, 1),
    Clt => (FE_PREFIX, 0x04, "clt", None, Sequential, 2, 1),
    CltUn => (FE_PREFIX, 0x05, "clt.un", None, Sequential, 2, 1),
    Ldftn => (FE_PREFIX, 0x06, "ldftn", Method, Sequential, 0, 1),
    Ldvirtftn => (FE_PREFIX, 0x07, "ldvirtftn", Method, Sequential, 1, 1),
    Ldarg => (FE_PREFIX, 0x09, "ldarg", Var, Sequential, 0, 1),
    Ldarga => (FE_PREFIX, 0x0A, "ldarga", Var, Sequential, 0, 1),
    Starg => (FE_PREFIX, 0x0B, "starg", Var, Sequential, 1, 0),
    Ldloc => (FE_PREFIX, 0x0C, "ldloc", Var, Sequential, 0, 1),
    Ldloca => (FE_PREFIX, 0x0D, "ldloca", Var, Sequential, 0, 1),
    Stloc => (FE_PREFIX, 0x0E, "stloc", Var, Sequential, 1, 0),
    Localloc => (FE_PREFIX, 0x0F, "localloc", None, Sequential, 1, 1),
    Endfilter => (FE_PREFIX, 0x11, "endfilter", None, EndFilter, 1, 0),
    Unaligned => (FE_PREFIX, 0x12, "unaligned.", UInt8, Sequential, 0, 0),
    Volatile => (FE_PREFIX, 0x13, "volatile.", None, Sequential, 0, 0),
    Tail => (FE_PREFIX, 0x14, "tail.", None, Sequential, 0, 0),
    Initobj => (FE_PREFIX, 0x15, "initobj", Type, Sequential, 1, 0),
    Constrained => (FE_PREFIX, 0x16, "constrained.", Type, Sequential, 0, 0),
    Cpblk => (FE_PREFIX, 0x17, "cpblk", None, Sequential, 3, 0),
    Initblk => (FE_PREFIX, 0x18, "initblk", None, Sequential, 3, 0),
    Rethrow => (FE_PREFIX, 0x1A, "rethrow", None, Throw, 0, 0),
    Sizeof => (FE_PREFIX, 0x1C, "sizeof", Type, Sequential, 0, 1),
    Refanytype => (FE_PREFIX, 0x1D, "refanytype", None, Sequential, 1, 1),
    Readonly => (FE_PREFIX, 0x1E, "readonly.", None, Sequential, 0, 0),
}

impl Opcode {
    /// Number of bytes the opcode itself occupies.
    #[must_use]
    pub const fn opcode_size(self) -> u32 {
        if self.encoding().0 == FE_PREFIX {
            2
        } else {
            1
        }
    }

    /// Returns the short branch form of a long branch opcode, or `self` if there is none.
    #[must_use]
    pub const fn short_form(self) -> Opcode {
        match self {
            Opcode::Br => Opcode::BrS,
            Opcode::Brfalse => Opcode::BrfalseS,
            Opcode::Brtrue => Opcode::BrtrueS,
            Opcode::Beq => Opcode::BeqS,
            Opcode::Bge => Opcode::BgeS,
            Opcode::Bgt => Opcode::BgtS,
            Opcode::Ble => Opcode::BleS,
            Opcode::Blt => Opcode::BltS,
            Opcode::BneUn => Opcode::BneUnS,
            Opcode::BgeUn => Opcode::BgeUnS,
            Opcode::BgtUn => Opcode::BgtUnS,
            Opcode::BleUn => Opcode::BleUnS,
            Opcode::BltUn => Opcode::BltUnS,
            Opcode::Leave => Opcode::LeaveS,
            other => other,
        }
    }

    /// Returns the long branch form of a short branch opcode, or `self` if there is none.
    #[must_use]
    pub const fn long_form(self) -> Opcode {
        match self {
            Opcode::BrS => Opcode::Br,
            Opcode::BrfalseS => Opcode::Brfalse,
            Opcode::BrtrueS => Opcode::Brtrue,
            Opcode::BeqS => Opcode::Beq,
            Opcode::BgeS => Opcode::Bge,
            Opcode::BgtS => Opcode::Bgt,
            Opcode::BleS => Opcode::Ble,
            Opcode::BltS => Opcode::Blt,
            Opcode::BneUnS => Opcode::BneUn,
            Opcode::BgeUnS => Opcode::BgeUn,
            Opcode::BgtUnS => Opcode::BgtUn,
            Opcode::BleUnS => Opcode::BleUn,
            Opcode::BltUnS => Opcode::BltUn,
            Opcode::LeaveS => Opcode::Leave,
            other => other,
        }
    }

    /// True for `brtrue` and `brtrue.s`.
    #[must_use]
    pub const fn is_brtrue(self) -> bool {
        matches!(self, Opcode::Brtrue | Opcode::BrtrueS)
    }

    /// True for `brfalse` and `brfalse.s`.
    #[must_use]
    pub const fn is_brfalse(self) -> bool {
        matches!(self, Opcode::Brfalse | Opcode::BrfalseS)
    }

    /// True if the opcode uses its variable operand as an argument index.
    #[must_use]
    pub const fn is_argument_access(self) -> bool {
        matches!(
            self,
            Opcode::LdargS
                | Opcode::LdargaS
                | Opcode::StargS
                | Opcode::Ldarg
                | Opcode::Ldarga
                | Opcode::Starg
        )
    }

    /// The literal pushed by the operand-less `ldc.i4.*` forms.
    #[must_use]
    pub const fn implicit_i4(self) -> Option<i32> {
        match self {
            Opcode::LdcI4M1 => Some(-1),
            Opcode::LdcI40 => Some(0),
            Opcode::LdcI41 => Some(1),
            Opcode::LdcI42 => Some(2),
            Opcode::LdcI43 => Some(3),
            Opcode::LdcI44 => Some(4),
            Opcode::LdcI45 => Some(5),
            Opcode::LdcI46 => Some(6),
            Opcode::LdcI47 => Some(7),
            Opcode::LdcI48 => Some(8),
            _ => None,
        }
    }

    /// True for opcodes that may have effects beyond the evaluation stack (memory, locals,
    /// arguments, fields, calls, allocation, exceptions, control flow).
    ///
    /// Static field loads are reported as pure here; callers decide whether a field read is
    /// acceptable in their context.
    #[must_use]
    pub const fn has_side_effects(self) -> bool {
        if !matches!(self.flow_type(), FlowType::Sequential) {
            return true;
        }
        matches!(
            self,
            Opcode::Break
                | Opcode::Stloc0
                | Opcode::Stloc1
                | Opcode::Stloc2
                | Opcode::Stloc3
                | Opcode::StlocS
                | Opcode::Stloc
                | Opcode::StargS
                | Opcode::Starg
                | Opcode::LdargaS
                | Opcode::Ldarga
                | Opcode::LdlocaS
                | Opcode::Ldloca
                | Opcode::StindRef
                | Opcode::StindI1
                | Opcode::StindI2
                | Opcode::StindI4
                | Opcode::StindI8
                | Opcode::StindR4
                | Opcode::StindR8
                | Opcode::StindI
                | Opcode::Stfld
                | Opcode::Stsfld
                | Opcode::Stobj
                | Opcode::Cpobj
                | Opcode::StelemI
                | Opcode::StelemI1
                | Opcode::StelemI2
                | Opcode::StelemI4
                | Opcode::StelemI8
                | Opcode::StelemR4
                | Opcode::StelemR8
                | Opcode::StelemRef
                | Opcode::Stelem
                | Opcode::Newarr
                | Opcode::Localloc
                | Opcode::Initobj
                | Opcode::Cpblk
                | Opcode::Initblk
                | Opcode::Ldflda
                | Opcode::Ldsflda
                | Opcode::Ldelema
                | Opcode::Unaligned
                | Opcode::Volatile
                | Opcode::Tail
                | Opcode::Constrained
                | Opcode::Readonly
                | Opcode::Arglist
        )
    }
}
