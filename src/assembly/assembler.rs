//! Label-based construction of method bodies.
//!
//! [`BodyAssembler`] builds a [`MethodBody`] from mnemonics and symbolic labels. Branches and
//! exception handler regions name labels; they are resolved to [`InstrId`]s in
//! [`BodyAssembler::finalize`], so instructions can be emitted in any order relative to the
//! labels they reference.
//!
//! # Examples
//!
//! ```rust
//! use dotscope_cflow::assembly::BodyAssembler;
//!
//! let mut asm = BodyAssembler::new();
//! asm.emit_instruction("ldarg.0", None)?;
//! asm.emit_branch("brfalse.s", "false_case")?;
//! asm.emit_ldc_i4(1)?;
//! asm.emit_instruction("ret", None)?;
//! asm.define_label("false_case")?;
//! asm.emit_ldc_i4(0)?;
//! asm.emit_instruction("ret", None)?;
//!
//! let body = asm.finalize()?;
//! assert_eq!(body.instructions.len(), 6);
//! # Ok::<(), dotscope_cflow::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{FlowType, Immediate, InstrId, Instruction, Operand, OperandType},
        Opcode,
    },
    metadata::{
        method::{ExceptionHandler, ExceptionHandlerFlags, MethodBody, MethodRef},
        token::Token,
    },
    Error, Result,
};

/// Operand of an emitted instruction that still references labels.
#[derive(Debug)]
enum PendingOperand {
    Resolved(Operand),
    Label(String),
    Labels(Vec<String>),
}

/// An exception handler clause whose boundaries are still label names.
#[derive(Debug)]
struct PendingHandler {
    flags: ExceptionHandlerFlags,
    try_start: String,
    try_end: String,
    handler_start: String,
    handler_end: String,
    filter_start: Option<String>,
    catch_type: Option<Token>,
}

/// Builder for [`MethodBody`] values.
///
/// Each emitted instruction receives the next sequential [`InstrId`], starting from zero, so
/// callers can refer to instructions they emitted through the returned ids.
#[derive(Debug, Default)]
pub struct BodyAssembler {
    /// Emitted instructions with unresolved label operands
    instructions: Vec<(Opcode, PendingOperand)>,
    /// Label name -> index of the instruction that follows the label
    labels: HashMap<String, usize>,
    /// Exception handler clauses awaiting label resolution
    handlers: Vec<PendingHandler>,
    /// Declared local variable count
    local_count: u16,
    /// Declared maximum stack depth
    max_stack: u16,
}

impl BodyAssembler {
    /// Create a new, empty assembler.
    #[must_use]
    pub fn new() -> Self {
        BodyAssembler {
            max_stack: 8,
            ..Default::default()
        }
    }

    /// Sets the number of local variables of the body.
    pub fn locals(&mut self, count: u16) -> &mut Self {
        self.local_count = count;
        self
    }

    /// Sets the declared maximum stack depth (defaults to 8).
    pub fn max_stack(&mut self, depth: u16) -> &mut Self {
        self.max_stack = depth;
        self
    }

    fn next_id(&self) -> Result<InstrId> {
        let index = u32::try_from(self.instructions.len())
            .map_err(|_| malformed_error!("Too many instructions in body"))?;
        Ok(InstrId(index))
    }

    fn lookup(mnemonic: &str) -> Result<Opcode> {
        mnemonic
            .parse::<Opcode>()
            .map_err(|_| Error::InvalidMnemonic(mnemonic.to_string()))
    }

    /// Emit a CIL instruction with optional operand.
    ///
    /// # Arguments
    ///
    /// * `mnemonic` - The instruction mnemonic (e.g. "nop", "add", "ldarg.s")
    /// * `operand` - Operand for the instruction, must match the opcode's operand kind
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMnemonic`] if the mnemonic is not recognized, or
    /// [`Error::Malformed`] if the operand does not fit the opcode. Branches must be emitted
    /// through [`BodyAssembler::emit_branch`] and [`BodyAssembler::emit_switch`].
    pub fn emit_instruction(&mut self, mnemonic: &str, operand: Option<Operand>) -> Result<InstrId> {
        let opcode = Self::lookup(mnemonic)?;
        let operand = operand.unwrap_or(Operand::None);
        if !operand_fits(opcode, &operand) {
            return Err(malformed_error!(
                "Operand {:?} does not fit instruction '{}'",
                operand,
                mnemonic
            ));
        }

        let id = self.next_id()?;
        self.instructions
            .push((opcode, PendingOperand::Resolved(operand)));
        Ok(id)
    }

    /// Emit a branch instruction targeting a label.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMnemonic`] if the mnemonic is not recognized, or
    /// [`Error::InvalidBranch`] if the mnemonic is not a branch or `leave` instruction.
    pub fn emit_branch(&mut self, mnemonic: &str, label: &str) -> Result<InstrId> {
        let opcode = Self::lookup(mnemonic)?;
        if !matches!(
            opcode.flow_type(),
            FlowType::ConditionalBranch | FlowType::UnconditionalBranch | FlowType::Leave
        ) {
            return Err(Error::InvalidBranch(format!(
                "instruction '{mnemonic}' is not a branch instruction"
            )));
        }

        let id = self.next_id()?;
        self.instructions
            .push((opcode, PendingOperand::Label(label.to_string())));
        Ok(id)
    }

    /// Emit a `switch` instruction with one label per case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBranch`] if no labels are given.
    pub fn emit_switch(&mut self, labels: &[&str]) -> Result<InstrId> {
        if labels.is_empty() {
            return Err(Error::InvalidBranch(
                "switch requires at least one target".to_string(),
            ));
        }

        let id = self.next_id()?;
        self.instructions.push((
            Opcode::Switch,
            PendingOperand::Labels(labels.iter().map(|l| (*l).to_string()).collect()),
        ));
        Ok(id)
    }

    /// Emit a call-like instruction (`call`, `callvirt`, `newobj`, `jmp`).
    ///
    /// # Errors
    ///
    /// Returns an error if the mnemonic is unknown or does not take a method operand.
    pub fn emit_call(&mut self, mnemonic: &str, method: MethodRef) -> Result<InstrId> {
        self.emit_instruction(mnemonic, Some(Operand::Method(method)))
    }

    /// Emit the shortest `ldarg` form for an argument index.
    ///
    /// # Errors
    ///
    /// Never fails for valid indices; errors are propagated from instruction emission.
    pub fn emit_ldarg(&mut self, index: u16) -> Result<InstrId> {
        match index {
            0 => self.emit_instruction("ldarg.0", None),
            1 => self.emit_instruction("ldarg.1", None),
            2 => self.emit_instruction("ldarg.2", None),
            3 => self.emit_instruction("ldarg.3", None),
            4..=255 => self.emit_instruction("ldarg.s", Some(Operand::Argument(index))),
            _ => self.emit_instruction("ldarg", Some(Operand::Argument(index))),
        }
    }

    /// Emit the shortest `ldloc` form for a local index.
    ///
    /// # Errors
    ///
    /// Errors are propagated from instruction emission.
    pub fn emit_ldloc(&mut self, index: u16) -> Result<InstrId> {
        match index {
            0 => self.emit_instruction("ldloc.0", None),
            1 => self.emit_instruction("ldloc.1", None),
            2 => self.emit_instruction("ldloc.2", None),
            3 => self.emit_instruction("ldloc.3", None),
            4..=255 => self.emit_instruction("ldloc.s", Some(Operand::Local(index))),
            _ => self.emit_instruction("ldloc", Some(Operand::Local(index))),
        }
    }

    /// Emit the shortest `stloc` form for a local index.
    ///
    /// # Errors
    ///
    /// Errors are propagated from instruction emission.
    pub fn emit_stloc(&mut self, index: u16) -> Result<InstrId> {
        match index {
            0 => self.emit_instruction("stloc.0", None),
            1 => self.emit_instruction("stloc.1", None),
            2 => self.emit_instruction("stloc.2", None),
            3 => self.emit_instruction("stloc.3", None),
            4..=255 => self.emit_instruction("stloc.s", Some(Operand::Local(index))),
            _ => self.emit_instruction("stloc", Some(Operand::Local(index))),
        }
    }

    /// Emit the shortest `ldc.i4` form for a 32-bit literal.
    ///
    /// # Errors
    ///
    /// Errors are propagated from instruction emission.
    pub fn emit_ldc_i4(&mut self, value: i32) -> Result<InstrId> {
        let (opcode, operand) = ldc_i4(value);
        let id = self.next_id()?;
        self.instructions
            .push((opcode, PendingOperand::Resolved(operand)));
        Ok(id)
    }

    /// Define a label at the current position.
    ///
    /// The label refers to the next instruction emitted after this call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLabel`] if a label with the same name has already been defined.
    pub fn define_label(&mut self, name: &str) -> Result<()> {
        if self.labels.contains_key(name) {
            return Err(Error::DuplicateLabel(name.to_string()));
        }
        self.labels.insert(name.to_string(), self.instructions.len());
        Ok(())
    }

    /// Declare a typed catch clause. All boundaries are labels; end labels are exclusive.
    pub fn try_catch(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
        catch_type: Token,
    ) -> &mut Self {
        self.push_handler(
            ExceptionHandlerFlags::EXCEPTION,
            [try_start, try_end, handler_start, handler_end],
            None,
            Some(catch_type),
        )
    }

    /// Declare a finally clause.
    pub fn try_finally(
        &mut self,
        try_start: &str,
        try_end: &str,
        handler_start: &str,
        handler_end: &str,
    ) -> &mut Self {
        self.push_handler(
            ExceptionHandlerFlags::FINALLY,
            [try_start, try_end, handler_start, handler_end],
            None,
            None,
        )
    }

    /// Declare a filter clause; the filter block starts at `filter_start` and runs up to the
    /// handler start.
    pub fn try_filter(
        &mut self,
        try_start: &str,
        try_end: &str,
        filter_start: &str,
        handler_start: &str,
        handler_end: &str,
    ) -> &mut Self {
        self.push_handler(
            ExceptionHandlerFlags::FILTER,
            [try_start, try_end, handler_start, handler_end],
            Some(filter_start),
            None,
        )
    }

    fn push_handler(
        &mut self,
        flags: ExceptionHandlerFlags,
        bounds: [&str; 4],
        filter_start: Option<&str>,
        catch_type: Option<Token>,
    ) -> &mut Self {
        let [try_start, try_end, handler_start, handler_end] = bounds.map(str::to_string);
        self.handlers.push(PendingHandler {
            flags,
            try_start,
            try_end,
            handler_start,
            handler_end,
            filter_start: filter_start.map(str::to_string),
            catch_type,
        });
        self
    }

    /// Resolve a label that must name an instruction.
    fn resolve(&self, label: &str, ids: &[InstrId]) -> Result<InstrId> {
        let index = *self
            .labels
            .get(label)
            .ok_or_else(|| Error::UndefinedLabel(label.to_string()))?;
        ids.get(index).copied().ok_or_else(|| {
            Error::InvalidBranch(format!("label '{label}' does not precede an instruction"))
        })
    }

    /// Resolve an exclusive end label; a label at the end of the body resolves to `None`.
    fn resolve_end(&self, label: &str, ids: &[InstrId]) -> Result<Option<InstrId>> {
        let index = *self
            .labels
            .get(label)
            .ok_or_else(|| Error::UndefinedLabel(label.to_string()))?;
        Ok(ids.get(index).copied())
    }

    /// Resolve all labels and produce the method body.
    ///
    /// Offsets of the produced body are up to date; branch forms are kept as emitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UndefinedLabel`] if a branch or handler names an unknown label, and
    /// [`Error::InvalidBranch`] if a branch target label sits at the very end of the body.
    pub fn finalize(self) -> Result<MethodBody> {
        let ids = (0..self.instructions.len())
            .map(|i| {
                u32::try_from(i)
                    .map(InstrId)
                    .map_err(|_| malformed_error!("Too many instructions in body"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut instructions = Vec::with_capacity(self.instructions.len());
        for ((opcode, pending), id) in self.instructions.iter().zip(&ids) {
            let operand = match pending {
                PendingOperand::Resolved(operand) => operand.clone(),
                PendingOperand::Label(label) => Operand::Target(self.resolve(label, &ids)?),
                PendingOperand::Labels(labels) => Operand::Switch(
                    labels
                        .iter()
                        .map(|l| self.resolve(l, &ids))
                        .collect::<Result<Vec<_>>>()?,
                ),
            };
            instructions.push(Instruction::new(*id, *opcode, operand));
        }

        let mut exception_handlers = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            exception_handlers.push(ExceptionHandler {
                flags: handler.flags,
                try_start: self.resolve(&handler.try_start, &ids)?,
                try_end: self.resolve_end(&handler.try_end, &ids)?,
                handler_start: self.resolve(&handler.handler_start, &ids)?,
                handler_end: self.resolve_end(&handler.handler_end, &ids)?,
                filter_start: handler
                    .filter_start
                    .as_deref()
                    .map(|l| self.resolve(l, &ids))
                    .transpose()?,
                catch_type: handler.catch_type,
            });
        }

        let mut body = MethodBody::new(instructions, exception_handlers);
        body.max_stack = self.max_stack;
        body.local_count = self.local_count;
        body.update_offsets();
        Ok(body)
    }
}

/// The shortest `ldc.i4` encoding of a literal.
#[must_use]
pub fn ldc_i4(value: i32) -> (Opcode, Operand) {
    match value {
        -1 => (Opcode::LdcI4M1, Operand::None),
        0 => (Opcode::LdcI40, Operand::None),
        1 => (Opcode::LdcI41, Operand::None),
        2 => (Opcode::LdcI42, Operand::None),
        3 => (Opcode::LdcI43, Operand::None),
        4 => (Opcode::LdcI44, Operand::None),
        5 => (Opcode::LdcI45, Operand::None),
        6 => (Opcode::LdcI46, Operand::None),
        7 => (Opcode::LdcI47, Operand::None),
        8 => (Opcode::LdcI48, Operand::None),
        v => match i8::try_from(v) {
            Ok(small) => (Opcode::LdcI4S, Operand::Immediate(Immediate::Int8(small))),
            Err(_) => (Opcode::LdcI4, Operand::Immediate(Immediate::Int32(v))),
        },
    }
}

/// Check that an operand is acceptable for an opcode's operand kind.
pub(crate) fn operand_fits(opcode: Opcode, operand: &Operand) -> bool {
    match (opcode.operand_type(), operand) {
        (OperandType::None, Operand::None)
        | (OperandType::Int8, Operand::Immediate(Immediate::Int8(_)))
        | (OperandType::UInt8, Operand::Immediate(Immediate::UInt8(_)))
        | (OperandType::Int32, Operand::Immediate(Immediate::Int32(_)))
        | (OperandType::Int64, Operand::Immediate(Immediate::Int64(_)))
        | (OperandType::Float32, Operand::Immediate(Immediate::Float32(_)))
        | (OperandType::Float64, Operand::Immediate(Immediate::Float64(_)))
        | (OperandType::ShortBranch | OperandType::Branch, Operand::Target(_))
        | (OperandType::Switch, Operand::Switch(_))
        | (OperandType::Method, Operand::Method(_))
        | (OperandType::Field, Operand::Field(_))
        | (OperandType::Signature, Operand::Method(_) | Operand::Token(_))
        | (OperandType::Type | OperandType::String, Operand::Token(_))
        | (OperandType::Token, Operand::Token(_) | Operand::Method(_) | Operand::Field(_)) => true,
        (OperandType::ShortVar, Operand::Argument(i)) => opcode.is_argument_access() && *i <= 255,
        (OperandType::ShortVar, Operand::Local(i)) => !opcode.is_argument_access() && *i <= 255,
        (OperandType::Var, Operand::Argument(_)) => opcode.is_argument_access(),
        (OperandType::Var, Operand::Local(_)) => !opcode.is_argument_access(),
        _ => false,
    }
}
