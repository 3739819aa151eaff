//! Inlining of trivial forwarding callees.
//!
//! Obfuscators hide constants and simple expressions behind tiny static helpers such as
//! `static int F(int a, int b) => a + b ^ 0x5A`. Replacing the call with the helper's body
//! exposes the expression to the constant folder.
//!
//! A callee qualifies when its body:
//!
//! - has no exception handlers and no branches
//! - starts with `ldarg.0 .. ldarg.(n-1)`, each parameter loaded once in order
//! - ends with a single `ret`
//! - in between, touches no locals or arguments, stores no fields, loads static fields of the
//!   caller's declaring type only, and calls only further qualifying callees
//!
//! Because the arguments are already on the caller's stack in order, the argument prefix is
//! dropped and only the remainder is spliced in place of the `call`.

use crate::{
    analysis::cfg::BlockGraph,
    assembly::{Instruction, Opcode, Operand},
    compiler::{BlockPass, EventKind, PassContext},
    metadata::{method::MethodBody, token::Token},
    Result,
};

/// Nesting limit when checking the chain of forwarding callees.
const MAX_FORWARD_DEPTH: usize = 8;

/// Replaces calls to trivial static helpers with the helper's body.
pub struct CallInliner;

impl Default for CallInliner {
    fn default() -> Self {
        Self::new()
    }
}

impl CallInliner {
    /// Creates a new call inliner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// The instructions to splice in place of a call to `token`, or `None` if the callee does
    /// not qualify.
    ///
    /// `chain` holds the callees already being inlined on this path; reaching one of them
    /// again, or the caller itself, is recursion and disqualifies the callee.
    fn inline_body(ctx: &PassContext<'_>, token: Token, chain: &mut Vec<Token>) -> Option<Vec<Instruction>> {
        if token == ctx.method.token || chain.contains(&token) || chain.len() >= MAX_FORWARD_DEPTH {
            return None;
        }
        let callee = ctx.resolver.resolve_method(token)?;
        if callee.has_this && !ctx.config.inline_instance_methods {
            return None;
        }

        let body: MethodBody = read_lock!(callee.body).ok()?.as_ref()?.clone();
        if !body.exception_handlers.is_empty()
            || body.len() > ctx.config.inline_max_instructions
            || body.instructions.iter().any(Instruction::is_branch)
        {
            return None;
        }

        let (last, rest) = body.instructions.split_last()?;
        if last.opcode != Opcode::Ret {
            return None;
        }
        let arity = usize::from(callee.params) + usize::from(callee.has_this);
        if rest.len() < arity {
            return None;
        }
        let (prefix, remainder) = rest.split_at(arity);
        let in_order = prefix
            .iter()
            .enumerate()
            .all(|(n, instr)| instr.loaded_argument().map(usize::from) == Some(n));
        if !in_order {
            return None;
        }

        chain.push(token);
        let qualifies = remainder
            .iter()
            .all(|instr| Self::is_inlineable(ctx, instr, chain));
        chain.pop();
        if !qualifies {
            return None;
        }

        // The remainder must consume exactly the arguments and leave the return value
        let mut depth = arity;
        for instr in remainder {
            let effect = instr.stack_behavior(false)?;
            depth = depth.checked_sub(usize::from(effect.pops))? + usize::from(effect.pushes);
        }
        if depth != usize::from(callee.returns_value()) {
            return None;
        }

        Some(remainder.to_vec())
    }

    /// True if `instr` may appear in the spliced part of a callee.
    fn is_inlineable(ctx: &PassContext<'_>, instr: &Instruction, chain: &mut Vec<Token>) -> bool {
        if instr.is_terminal()
            || instr.opcode.is_argument_access()
            || instr.loaded_argument().is_some()
            || instr.loaded_local().is_some()
        {
            return false;
        }

        match (instr.opcode, &instr.operand) {
            (Opcode::Call, Operand::Method(m)) => Self::inline_body(ctx, m.token, chain).is_some(),
            (Opcode::Ldsfld, Operand::Field(field)) => {
                field.declaring_type == ctx.method.declaring_type
            }
            (Opcode::Callvirt | Opcode::Calli | Opcode::Newobj | Opcode::Jmp, _)
            | (Opcode::Ldfld | Opcode::Ldsfld, _) => false,
            (op, _) => !op.has_side_effects(),
        }
    }
}

impl BlockPass for CallInliner {
    fn name(&self) -> &'static str {
        "call-inliner"
    }

    fn description(&self) -> &'static str {
        "Inline calls to trivial static forwarding helpers"
    }

    fn run(&mut self, graph: &mut BlockGraph, ctx: &PassContext<'_>) -> Result<bool> {
        let mut changed = false;

        for block_id in graph.layout().to_vec() {
            let mut at = 0;
            loop {
                let site = graph.block(block_id).and_then(|block| {
                    block.instructions[at..].iter().enumerate().find_map(|(n, instr)| {
                        match (instr.opcode, &instr.operand) {
                            (Opcode::Call, Operand::Method(m)) => Some((at + n, m.token)),
                            _ => None,
                        }
                    })
                });
                let Some((index, callee)) = site else {
                    break;
                };
                at = index + 1;

                let Some(spliced) = Self::inline_body(ctx, callee, &mut Vec::new()) else {
                    continue;
                };
                let callee_name = ctx
                    .resolver
                    .resolve_method(callee)
                    .map_or_else(|| callee.to_string(), |m| m.full_name());

                let fresh: Vec<Instruction> = spliced
                    .iter()
                    .skip(1)
                    .map(|instr| Instruction::new(graph.alloc_instr_id(), instr.opcode, instr.operand.clone()))
                    .collect();
                let Some(block) = graph.block_mut(block_id) else {
                    break;
                };

                // The call keeps its identity and becomes the first spliced instruction
                let call = &mut block.instructions[index];
                match spliced.first() {
                    Some(first) => {
                        call.opcode = first.opcode;
                        call.operand = first.operand.clone();
                    }
                    None => {
                        call.opcode = Opcode::Nop;
                        call.operand = Operand::None;
                    }
                }
                let inserted = fresh.len();
                block.instructions.splice(index + 1..index + 1, fresh);
                at = index + 1 + inserted;

                ctx.events
                    .record(EventKind::MethodInlined)
                    .at(ctx.method.token, block_id.0)
                    .pass(self.name())
                    .message(format!("inlined {callee_name}"));
                changed = true;
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{BodyAssembler, FieldRef},
        compiler::EventLog,
        deobfuscation::CflowConfig,
        metadata::{
            method::{MethodDef, BOOLEAN_TYPE},
            module::Module,
        },
    };

    const INT32: &str = "System.Int32";

    fn helper(module: &Module, row: u32, params: u16, build: impl FnOnce(&mut BodyAssembler)) -> Token {
        let mut asm = BodyAssembler::new();
        build(&mut asm);
        let method = MethodDef::new(Token::method_def(row), "Obf.Helpers", &format!("H{row}"))
            .with_signature(INT32, params, false)
            .with_body(asm.finalize().unwrap());
        module.insert(method).token
    }

    fn caller(module: &Module, callee: Token) -> (MethodDef, BlockGraph) {
        let callee_ref = module.get(callee).unwrap().method_ref();
        let mut asm = BodyAssembler::new();
        asm.emit_ldc_i4(3).unwrap();
        asm.emit_ldc_i4(4).unwrap();
        asm.emit_call("call", callee_ref).unwrap();
        asm.emit_instruction("ret", None).unwrap();
        let body = asm.finalize().unwrap();
        let graph = BlockGraph::from_body(&body).unwrap();
        let method = MethodDef::new(Token::method_def(100), "Obf.Main", "Run")
            .with_signature(INT32, 0, false)
            .with_body(body);
        (method, graph)
    }

    fn run(module: &Module, method: &MethodDef, graph: &mut BlockGraph) -> (bool, EventLog) {
        let config = CflowConfig::default();
        let events = EventLog::new();
        let ctx = PassContext {
            method,
            resolver: module,
            config: &config,
            events: &events,
        };
        let changed = CallInliner::new().run(graph, &ctx).unwrap();
        (changed, events)
    }

    fn opcodes(graph: &BlockGraph) -> Vec<Opcode> {
        graph
            .blocks()
            .flat_map(|b| b.instructions.iter().map(|i| i.opcode))
            .collect()
    }

    #[test]
    fn test_inlines_forwarding_helper() {
        let module = Module::new("test");
        let callee = helper(&module, 1, 2, |asm| {
            asm.emit_ldarg(0).unwrap();
            asm.emit_ldarg(1).unwrap();
            asm.emit_instruction("add", None).unwrap();
            asm.emit_ldc_i4(90).unwrap();
            asm.emit_instruction("xor", None).unwrap();
            asm.emit_instruction("ret", None).unwrap();
        });
        let (method, mut graph) = caller(&module, callee);
        let call_id = graph.block(graph.entry()).unwrap().instructions[2].id;

        let (changed, events) = run(&module, &method, &mut graph);
        assert!(changed);
        assert_eq!(
            opcodes(&graph),
            vec![Opcode::LdcI43, Opcode::LdcI44, Opcode::Add, Opcode::LdcI4S, Opcode::Xor, Opcode::Ret]
        );
        assert_eq!(graph.block(graph.entry()).unwrap().instructions[2].id, call_id);
        assert_eq!(events.count_kind(EventKind::MethodInlined), 1);
    }

    #[test]
    fn test_rejects_side_effects_and_shuffled_arguments() {
        let module = Module::new("test");
        let swapped = helper(&module, 1, 2, |asm| {
            asm.emit_ldarg(1).unwrap();
            asm.emit_ldarg(0).unwrap();
            asm.emit_instruction("sub", None).unwrap();
            asm.emit_instruction("ret", None).unwrap();
        });
        let (method, mut graph) = caller(&module, swapped);
        assert!(!run(&module, &method, &mut graph).0);

        let storing = helper(&module, 2, 2, |asm| {
            asm.emit_ldarg(0).unwrap();
            asm.emit_ldarg(1).unwrap();
            asm.emit_instruction("add", None).unwrap();
            asm.emit_instruction("dup", None).unwrap();
            asm.emit_stloc(0).unwrap();
            asm.emit_instruction("ret", None).unwrap();
        });
        let (method, mut graph) = caller(&module, storing);
        assert!(!run(&module, &method, &mut graph).0);
    }

    #[test]
    fn test_static_field_of_foreign_type_rejected() {
        let module = Module::new("test");
        let field = FieldRef {
            token: Token::new(0x0400_0001),
            declaring_type: "Other.Type".to_string(),
        };
        let callee = helper(&module, 1, 2, move |asm| {
            asm.emit_ldarg(0).unwrap();
            asm.emit_ldarg(1).unwrap();
            asm.emit_instruction("add", None).unwrap();
            asm.emit_instruction("ldsfld", Some(Operand::Field(field))).unwrap();
            asm.emit_instruction("add", None).unwrap();
            asm.emit_instruction("ret", None).unwrap();
        });
        let (method, mut graph) = caller(&module, callee);
        assert!(!run(&module, &method, &mut graph).0);
    }

    #[test]
    fn test_recursive_helper_rejected() {
        let module = Module::new("test");
        let own = Token::method_def(1);
        let self_ref = crate::metadata::method::MethodRef {
            token: own,
            params: 2,
            has_this: false,
            returns_value: true,
        };
        helper(&module, 1, 2, move |asm| {
            asm.emit_ldarg(0).unwrap();
            asm.emit_ldarg(1).unwrap();
            asm.emit_call("call", self_ref).unwrap();
            asm.emit_instruction("ret", None).unwrap();
        });
        let (method, mut graph) = caller(&module, own);
        assert!(!run(&module, &method, &mut graph).0);
    }

    #[test]
    fn test_instance_helper_needs_opt_in() {
        let module = Module::new("test");
        let mut asm = BodyAssembler::new();
        asm.emit_ldarg(0).unwrap();
        asm.emit_instruction("pop", None).unwrap();
        asm.emit_ldc_i4(1).unwrap();
        asm.emit_instruction("ret", None).unwrap();
        let callee = module.insert(
            MethodDef::new(Token::method_def(5), "Obf.Main", "get_Flag")
                .with_signature(BOOLEAN_TYPE, 0, true)
                .with_body(asm.finalize().unwrap()),
        );

        let mut asm = BodyAssembler::new();
        asm.emit_ldarg(0).unwrap();
        asm.emit_call("call", callee.method_ref()).unwrap();
        asm.emit_instruction("ret", None).unwrap();
        let body = asm.finalize().unwrap();
        let method = MethodDef::new(Token::method_def(100), "Obf.Main", "Run")
            .with_signature(BOOLEAN_TYPE, 0, true);

        let mut graph = BlockGraph::from_body(&body).unwrap();
        assert!(!run(&module, &method, &mut graph).0);

        let config = CflowConfig {
            inline_instance_methods: true,
            ..CflowConfig::default()
        };
        let events = EventLog::new();
        let ctx = PassContext {
            method: &method,
            resolver: &module,
            config: &config,
            events: &events,
        };
        assert!(CallInliner::new().run(&mut graph, &ctx).unwrap());
        assert_eq!(
            opcodes(&graph),
            vec![Opcode::Ldarg0, Opcode::Pop, Opcode::LdcI41, Opcode::Ret]
        );
    }
}
