//! CIL instruction representation, operand types and stack metadata.
//!
//! Instructions in this crate are not addressed by byte offset. Every instruction carries a
//! stable [`InstrId`], and branch operands and exception handler boundaries refer to those ids.
//! This lets the rewriting passes mutate opcodes and operands in place, insert and delete
//! instructions, and re-derive blocks, without ever invalidating a reference held somewhere
//! else in the method body. Byte offsets only exist for reporting and are recomputed by
//! [`crate::metadata::method::MethodBody::update_offsets`].
//!
//! # Key Components
//!
//! - [`Instruction`] - One opcode/operand record with its identity and original offset
//! - [`Operand`] - Typed operand, with branch targets expressed as [`InstrId`]s
//! - [`Immediate`] - Literal operand values
//! - [`FlowType`] - Control flow behaviour of an opcode
//! - [`StackBehavior`] - Stack effect of an instruction
//!
//! # Examples
//!
//! ```rust
//! use dotscope_cflow::assembly::{Immediate, InstrId, Instruction, Opcode, Operand};
//!
//! let load = Instruction::new(InstrId(0), Opcode::LdcI4, Operand::Immediate(Immediate::Int32(7)));
//! assert_eq!(load.int_literal(), Some(7));
//!
//! let branch = Instruction::new(InstrId(1), Opcode::Br, Operand::Target(InstrId(0)));
//! assert!(branch.is_branch());
//! assert_eq!(branch.branch_targets(), vec![InstrId(0)]);
//! ```

use std::fmt;

use crate::{
    assembly::Opcode,
    metadata::{method::MethodRef, token::Token},
};

/// Stable identity of an instruction within one method body.
///
/// Ids are allocated once and never reused inside a body; a rewrite that changes the opcode
/// of an instruction keeps its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstrId(pub u32);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Encoded operand kinds of CIL opcodes, as listed in ECMA-335 Partition III.
///
/// The operand kind determines both which [`Operand`] variants an opcode accepts and the
/// encoded size of the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// No operand present
    None,
    /// Signed 8-bit literal (`ldc.i4.s`)
    Int8,
    /// Unsigned 8-bit literal (`unaligned.`)
    UInt8,
    /// Signed 32-bit literal
    Int32,
    /// Signed 64-bit literal
    Int64,
    /// 32-bit floating point literal
    Float32,
    /// 64-bit floating point literal
    Float64,
    /// 8-bit relative branch target
    ShortBranch,
    /// 32-bit relative branch target
    Branch,
    /// Switch jump table
    Switch,
    /// 8-bit local or argument index
    ShortVar,
    /// 16-bit local or argument index
    Var,
    /// Method token
    Method,
    /// Field token
    Field,
    /// Type token
    Type,
    /// User string token
    String,
    /// Stand-alone signature token (`calli`)
    Signature,
    /// Any metadata token (`ldtoken`)
    Token,
}

impl OperandType {
    /// Returns the size in bytes of this operand type.
    ///
    /// Returns `Some(size)` for fixed-size operands, or `None` for the switch table whose size
    /// depends on its number of targets.
    #[must_use]
    pub const fn size(&self) -> Option<u32> {
        match self {
            OperandType::None => Some(0),
            OperandType::Int8
            | OperandType::UInt8
            | OperandType::ShortBranch
            | OperandType::ShortVar => Some(1),
            OperandType::Var => Some(2),
            OperandType::Int32
            | OperandType::Float32
            | OperandType::Branch
            | OperandType::Method
            | OperandType::Field
            | OperandType::Type
            | OperandType::String
            | OperandType::Signature
            | OperandType::Token => Some(4),
            OperandType::Int64 | OperandType::Float64 => Some(8),
            OperandType::Switch => None,
        }
    }
}

/// Represents an immediate value embedded in a CIL instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Unsigned 8-bit immediate value
    UInt8(u8),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

impl Immediate {
    /// Returns the value as an `i64` if the immediate is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Immediate::Int8(v) => Some(i64::from(v)),
            Immediate::UInt8(v) => Some(i64::from(v)),
            Immediate::Int32(v) => Some(i64::from(v)),
            Immediate::Int64(v) => Some(v),
            Immediate::Float32(_) | Immediate::Float64(_) => None,
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immediate::Int8(v) => write!(f, "{v}"),
            Immediate::UInt8(v) => write!(f, "{v}"),
            Immediate::Int32(v) => write!(f, "{v}"),
            Immediate::Int64(v) => write!(f, "{v}"),
            Immediate::Float32(v) => write!(f, "{v}"),
            Immediate::Float64(v) => write!(f, "{v}"),
        }
    }
}

/// A field reference operand.
///
/// The declaring type is kept next to the token so that passes can reason about which class
/// owns the field without a metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    /// Field token
    pub token: Token,
    /// Full name of the type declaring the field
    pub declaring_type: String,
}

/// Represents an operand in a structured way.
///
/// Branch targets are stable [`InstrId`]s rather than offsets, so that instructions can be
/// inserted or removed without re-encoding every branch.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate value (constant embedded in instruction)
    Immediate(Immediate),
    /// Branch target instruction
    Target(InstrId),
    /// Switch table with one target instruction per case
    Switch(Vec<InstrId>),
    /// Method reference of a call-like instruction, or the call-site signature of a `calli`
    Method(MethodRef),
    /// Field reference
    Field(FieldRef),
    /// Any other metadata token (type, string, signature)
    Token(Token),
    /// Local variable index
    Local(u16),
    /// Method argument index
    Argument(u16),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Immediate(imm) => write!(f, "{imm}"),
            Operand::Target(t) => write!(f, "{t}"),
            Operand::Switch(targets) => {
                write!(f, "(")?;
                for (i, t) in targets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, ")")
            }
            Operand::Method(m) => write!(f, "{}", m.token),
            Operand::Field(fr) => write!(f, "{}", fr.token),
            Operand::Token(t) => write!(f, "{t}"),
            Operand::Local(l) => write!(f, "V_{l}"),
            Operand::Argument(a) => write!(f, "A_{a}"),
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location (unconditional jump)
    UnconditionalBranch,
    /// Call to another method
    Call,
    /// Returns from current method (`ret`, `jmp`)
    Return,
    /// Multi-way branch (switch statement)
    Switch,
    /// Exception throwing (`throw`, `rethrow`)
    Throw,
    /// End of finally or fault block
    EndFinally,
    /// End of filter block
    EndFilter,
    /// Leave protected region (try/catch/finally)
    Leave,
}

impl FlowType {
    /// Returns true if an instruction with this flow type ends a basic block.
    #[must_use]
    pub const fn ends_block(&self) -> bool {
        !matches!(self, FlowType::Sequential | FlowType::Call)
    }

    /// Returns true if execution may continue with the next instruction in the stream.
    #[must_use]
    pub const fn falls_through(&self) -> bool {
        matches!(
            self,
            FlowType::Sequential
                | FlowType::Call
                | FlowType::ConditionalBranch
                | FlowType::Switch
        )
    }
}

/// Stack effect of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackBehavior {
    /// Number of items popped from stack
    pub pops: u16,
    /// Number of items pushed to stack
    pub pushes: u16,
}

impl StackBehavior {
    /// Net effect on stack depth (pushes - pops)
    #[must_use]
    pub fn net_effect(&self) -> i32 {
        i32::from(self.pushes) - i32::from(self.pops)
    }
}

/// One instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Stable identity, never changes once allocated
    pub id: InstrId,
    /// Byte offset in the body, valid after the last `update_offsets`
    pub offset: u32,
    /// The opcode, rewritable in place
    pub opcode: Opcode,
    /// The operand, rewritable in place
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction with offset zero.
    #[must_use]
    pub fn new(id: InstrId, opcode: Opcode, operand: Operand) -> Self {
        Instruction {
            id,
            offset: 0,
            opcode,
            operand,
        }
    }

    /// Control flow behaviour of the instruction
    #[must_use]
    pub fn flow_type(&self) -> FlowType {
        self.opcode.flow_type()
    }

    /// Check if this instruction is a branch instruction (including `switch` and `leave`).
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(
            self.flow_type(),
            FlowType::ConditionalBranch
                | FlowType::UnconditionalBranch
                | FlowType::Switch
                | FlowType::Leave
        )
    }

    /// Check if this instruction is a terminal instruction (ends a basic block).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.flow_type().ends_block()
    }

    /// Get the target instructions of this instruction, in operand order.
    ///
    /// For conditional branches this only includes the branch target, not the fall-through.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<InstrId> {
        match &self.operand {
            Operand::Target(t) if self.is_branch() => vec![*t],
            Operand::Switch(targets) if self.opcode == Opcode::Switch => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Returns the integer pushed by this instruction if it is an `ldc.i4`/`ldc.i8` form.
    #[must_use]
    pub fn int_literal(&self) -> Option<i64> {
        if let Some(v) = self.opcode.implicit_i4() {
            return Some(i64::from(v));
        }
        match (self.opcode, &self.operand) {
            (Opcode::LdcI4S | Opcode::LdcI4 | Opcode::LdcI8, Operand::Immediate(imm)) => {
                imm.as_i64()
            }
            _ => None,
        }
    }

    /// Returns the method reference of a call-like instruction.
    #[must_use]
    pub fn method_operand(&self) -> Option<&MethodRef> {
        match &self.operand {
            Operand::Method(m) => Some(m),
            _ => None,
        }
    }

    /// Argument index read by an `ldarg` form, including the implicit ones.
    #[must_use]
    pub fn loaded_argument(&self) -> Option<u16> {
        match self.opcode {
            Opcode::Ldarg0 => Some(0),
            Opcode::Ldarg1 => Some(1),
            Opcode::Ldarg2 => Some(2),
            Opcode::Ldarg3 => Some(3),
            Opcode::LdargS | Opcode::Ldarg => match self.operand {
                Operand::Argument(a) => Some(a),
                _ => None,
            },
            _ => None,
        }
    }

    /// Local index read by an `ldloc` form, including the implicit ones.
    #[must_use]
    pub fn loaded_local(&self) -> Option<u16> {
        match self.opcode {
            Opcode::Ldloc0 => Some(0),
            Opcode::Ldloc1 => Some(1),
            Opcode::Ldloc2 => Some(2),
            Opcode::Ldloc3 => Some(3),
            Opcode::LdlocS | Opcode::Ldloc => match self.operand {
                Operand::Local(l) => Some(l),
                _ => None,
            },
            _ => None,
        }
    }

    /// Local index written by a `stloc` form, including the implicit ones.
    #[must_use]
    pub fn stored_local(&self) -> Option<u16> {
        match self.opcode {
            Opcode::Stloc0 => Some(0),
            Opcode::Stloc1 => Some(1),
            Opcode::Stloc2 => Some(2),
            Opcode::Stloc3 => Some(3),
            Opcode::StlocS | Opcode::Stloc => match self.operand {
                Operand::Local(l) => Some(l),
                _ => None,
            },
            _ => None,
        }
    }

    /// Stack effect of this instruction.
    ///
    /// Call-like instructions derive their effect from the [`MethodRef`] operand; `ret` pops one
    /// value when the enclosing method returns a value. Returns `None` if the effect cannot be
    /// determined, for example a `calli` with an opaque signature token.
    #[must_use]
    pub fn stack_behavior(&self, method_returns_value: bool) -> Option<StackBehavior> {
        match self.opcode {
            Opcode::Call | Opcode::Callvirt | Opcode::Calli => {
                let m = self.method_operand()?;
                let pops = m.params + u16::from(m.has_this) + u16::from(self.opcode == Opcode::Calli);
                Some(StackBehavior {
                    pops,
                    pushes: u16::from(m.returns_value),
                })
            }
            Opcode::Newobj => {
                let m = self.method_operand()?;
                Some(StackBehavior {
                    pops: m.params,
                    pushes: 1,
                })
            }
            Opcode::Ret => Some(StackBehavior {
                pops: u16::from(method_returns_value),
                pushes: 0,
            }),
            Opcode::Jmp => Some(StackBehavior { pops: 0, pushes: 0 }),
            op => {
                let (pops, pushes) = op.fixed_stack();
                Some(StackBehavior {
                    pops: u16::from(pops),
                    pushes: u16::from(pushes),
                })
            }
        }
    }

    /// Encoded size of the instruction in bytes.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn size(&self) -> u32 {
        let operand = match (&self.operand, self.opcode.operand_type().size()) {
            (_, Some(size)) => size,
            (Operand::Switch(targets), None) => 4 + 4 * targets.len() as u32,
            (_, None) => 4,
        };
        self.opcode.opcode_size() + operand
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.opcode)?;
        if !matches!(self.operand, Operand::None) {
            write!(f, " {}", self.operand)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(params: u16, has_this: bool, returns_value: bool) -> MethodRef {
        MethodRef {
            token: Token::method_def(1),
            params,
            has_this,
            returns_value,
        }
    }

    #[test]
    fn test_int_literal_forms() {
        let cases = [
            (Opcode::LdcI4M1, Operand::None, Some(-1)),
            (Opcode::LdcI40, Operand::None, Some(0)),
            (Opcode::LdcI48, Operand::None, Some(8)),
            (Opcode::LdcI4S, Operand::Immediate(Immediate::Int8(-5)), Some(-5)),
            (Opcode::LdcI4, Operand::Immediate(Immediate::Int32(1000)), Some(1000)),
            (Opcode::LdcR4, Operand::Immediate(Immediate::Float32(1.0)), None),
            (Opcode::Nop, Operand::None, None),
        ];
        for (opcode, operand, expected) in cases {
            let instr = Instruction::new(InstrId(0), opcode, operand);
            assert_eq!(instr.int_literal(), expected, "{opcode}");
        }
    }

    #[test]
    fn test_branch_targets() {
        let cond = Instruction::new(InstrId(0), Opcode::BrtrueS, Operand::Target(InstrId(4)));
        assert_eq!(cond.branch_targets(), vec![InstrId(4)]);

        let sw = Instruction::new(
            InstrId(1),
            Opcode::Switch,
            Operand::Switch(vec![InstrId(2), InstrId(3)]),
        );
        assert_eq!(sw.branch_targets(), vec![InstrId(2), InstrId(3)]);

        // A branch that was neutralised to nop keeps its operand but has no targets
        let nop = Instruction::new(InstrId(2), Opcode::Nop, Operand::Target(InstrId(4)));
        assert!(nop.branch_targets().is_empty());
    }

    #[test]
    fn test_call_stack_behavior() {
        let call = Instruction::new(
            InstrId(0),
            Opcode::Call,
            Operand::Method(method(2, true, true)),
        );
        let effect = call.stack_behavior(false).unwrap();
        assert_eq!(effect.pops, 3);
        assert_eq!(effect.pushes, 1);

        let ctor = Instruction::new(
            InstrId(1),
            Opcode::Newobj,
            Operand::Method(method(1, true, false)),
        );
        assert_eq!(ctor.stack_behavior(false).unwrap().net_effect(), 0);

        let ret = Instruction::new(InstrId(2), Opcode::Ret, Operand::None);
        assert_eq!(ret.stack_behavior(true).unwrap().pops, 1);
        assert_eq!(ret.stack_behavior(false).unwrap().pops, 0);

        let opaque = Instruction::new(InstrId(3), Opcode::Calli, Operand::Token(Token::new(0x1100_0001)));
        assert!(opaque.stack_behavior(false).is_none());
    }

    #[test]
    fn test_instruction_sizes() {
        let nop = Instruction::new(InstrId(0), Opcode::Nop, Operand::None);
        assert_eq!(nop.size(), 1);
        let br_s = Instruction::new(InstrId(1), Opcode::BrS, Operand::Target(InstrId(0)));
        assert_eq!(br_s.size(), 2);
        let ceq = Instruction::new(InstrId(2), Opcode::Ceq, Operand::None);
        assert_eq!(ceq.size(), 2);
        let sw = Instruction::new(
            InstrId(3),
            Opcode::Switch,
            Operand::Switch(vec![InstrId(0), InstrId(1), InstrId(2)]),
        );
        assert_eq!(sw.size(), 1 + 4 + 12);
        let ldarg = Instruction::new(InstrId(4), Opcode::Ldarg, Operand::Argument(300));
        assert_eq!(ldarg.size(), 4);
    }

    #[test]
    fn test_display() {
        let mut instr = Instruction::new(InstrId(0), Opcode::LdcI4S, Operand::Immediate(Immediate::Int8(3)));
        instr.offset = 0x10;
        assert_eq!(instr.to_string(), "IL_0010: ldc.i4.s 3");
    }
}
