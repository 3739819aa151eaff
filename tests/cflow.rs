//! End-to-end tests of the control-flow deobfuscation pipeline.
//!
//! Every test assembles its input with [`BodyAssembler`], runs the engine or one of its stages
//! and checks the exact resulting instruction sequence and handler table.

use dotscope_cflow::{
    analysis::{rebuild, BlockGraph},
    deobfuscation::simplify_equations,
    prelude::*,
};

/// `static bool Guard::IsFeatureEnabled() => value`
fn predicate(module: &Module, row: u32, value: bool) -> MethodDefRc {
    let mut asm = BodyAssembler::new();
    asm.emit_ldc_i4(i32::from(value)).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    module.insert(
        MethodDef::new(Token::method_def(row), "Guard", "IsFeatureEnabled")
            .with_signature(BOOLEAN_TYPE, 0, false)
            .with_body(asm.finalize().unwrap()),
    )
}

fn opcodes(method: &MethodDef) -> Vec<Opcode> {
    method
        .body
        .read()
        .unwrap()
        .as_ref()
        .unwrap()
        .instructions
        .iter()
        .map(|i| i.opcode)
        .collect()
}

fn body(method: &MethodDef) -> MethodBody {
    method.body.read().unwrap().clone().unwrap()
}

/// ```text
///     ldc.i4.1
///     call     IsFeatureEnabled
///     brtrue   L1
///     pop
///     ldc.i4.2          <A>
/// L1: switch   (L2)     <B>
/// L2: ldc.i4.7
///     ret
/// ```
fn guarded_dispatch(module: &Module, guard: &MethodDef) -> MethodDefRc {
    let mut asm = BodyAssembler::new();
    asm.emit_ldc_i4(1).unwrap();
    asm.emit_call("call", guard.method_ref()).unwrap();
    asm.emit_branch("brtrue", "L1").unwrap();
    asm.emit_instruction("pop", None).unwrap();
    asm.emit_ldc_i4(2).unwrap();
    asm.define_label("L1").unwrap();
    asm.emit_switch(&["L2"]).unwrap();
    asm.define_label("L2").unwrap();
    asm.emit_ldc_i4(7).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    module.insert(
        MethodDef::new(Token::method_def(10), "Program", "Dispatch")
            .with_signature("System.Int32", 0, false)
            .with_body(asm.finalize().unwrap()),
    )
}

#[test]
fn always_false_guard_is_removed_end_to_end() {
    let module = Module::new("e2e");
    let guard = predicate(&module, 1, false);
    let method = guarded_dispatch(&module, &guard);

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());

    let ops = opcodes(&method);
    assert_eq!(
        ops,
        vec![
            Opcode::LdcI41,
            Opcode::Nop,
            Opcode::Nop,
            Opcode::Pop,
            Opcode::Nop,
            Opcode::Nop,
            Opcode::LdcI47,
            Opcode::Ret,
        ]
    );
    assert!(!ops.contains(&Opcode::Call));
    assert!(body(&method).instructions.iter().all(|i| !i.is_branch()));
    assert_eq!(body(&method).max_stack, 1);

    let events = engine.events();
    assert_eq!(events.count_kind(EventKind::EquationSimplified), 1);
    assert_eq!(events.count_kind(EventKind::BranchSimplified), 1);
    assert_eq!(events.methods_affected(), 1);
}

#[test]
fn equations_require_a_switch() {
    let module = Module::new("gate");
    let guard = predicate(&module, 1, false);

    let mut asm = BodyAssembler::new();
    asm.emit_ldc_i4(1).unwrap();
    asm.emit_call("call", guard.method_ref()).unwrap();
    asm.emit_branch("brtrue", "L1").unwrap();
    asm.emit_instruction("pop", None).unwrap();
    asm.emit_ldc_i4(2).unwrap();
    asm.define_label("L1").unwrap();
    asm.emit_instruction("ret", None).unwrap();
    let method = module.insert(
        MethodDef::new(Token::method_def(10), "Program", "NoSwitch")
            .with_signature("System.Int32", 0, false)
            .with_body(asm.finalize().unwrap()),
    );

    // Without inlining nothing else can see through the call
    let engine = CflowDeobfuscator::new(CflowConfig::default().with_inlining(false));
    assert!(engine.deobfuscate(&method, &module).unwrap());
    assert!(opcodes(&method).contains(&Opcode::Call));
    assert_eq!(engine.events().count_kind(EventKind::EquationSimplified), 0);
}

#[test]
fn deobfuscate_is_idempotent() {
    let module = Module::new("idempotence");
    let guard = predicate(&module, 1, true);
    let method = guarded_dispatch(&module, &guard);

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());
    let first = body(&method);
    assert!(!engine.deobfuscate(&method, &module).unwrap());
    assert_eq!(body(&method), first);

    // A fresh engine is a fresh batch and processes the method again
    let other = CflowDeobfuscator::default();
    assert!(other.deobfuscate(&method, &module).unwrap());
}

#[test]
fn truth_table_for_always_false_callee() {
    let module = Module::new("truth");
    let guard = predicate(&module, 1, false);

    for (branch, expected) in [("brtrue", Opcode::Nop), ("brfalse", Opcode::Br)] {
        let mut asm = BodyAssembler::new();
        asm.emit_call("call", guard.method_ref()).unwrap();
        asm.emit_branch(branch, "L1").unwrap();
        asm.emit_instruction("pop", None).unwrap();
        asm.define_label("L1").unwrap();
        asm.emit_instruction("ret", None).unwrap();
        let mut body = asm.finalize().unwrap();

        let events = EventLog::new();
        assert_eq!(
            simplify_equations(&mut body, &module, Token::method_def(10), &events),
            1
        );
        let ops: Vec<_> = body.instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(ops, vec![Opcode::Nop, expected, Opcode::Pop, Opcode::Ret]);
    }
}

#[test]
fn unreachable_block_shrinks_try_region() {
    let mut asm = BodyAssembler::new();
    asm.define_label("ts").unwrap();
    asm.emit_ldc_i4(0).unwrap();
    asm.emit_branch("brtrue.s", "dead").unwrap();
    asm.emit_instruction("nop", None).unwrap();
    asm.emit_branch("leave", "end").unwrap();
    asm.define_label("dead").unwrap();
    asm.emit_instruction("nop", None).unwrap();
    asm.emit_branch("leave", "end").unwrap();
    asm.define_label("hs").unwrap();
    asm.emit_instruction("pop", None).unwrap();
    asm.emit_branch("leave", "end").unwrap();
    asm.define_label("end").unwrap();
    asm.emit_instruction("ret", None).unwrap();
    asm.try_catch("ts", "hs", "hs", "end", Token::new(0x0100_0001));

    let module = Module::new("handlers");
    let method = module.insert(
        MethodDef::new(Token::method_def(1), "Program", "Guarded")
            .with_body(asm.finalize().unwrap()),
    );

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());

    let body = body(&method);
    let ops: Vec<_> = body.instructions.iter().map(|i| i.opcode.long_form()).collect();
    assert_eq!(
        ops,
        vec![
            Opcode::Nop,
            Opcode::Nop,
            Opcode::Nop,
            Opcode::Leave,
            Opcode::Pop,
            Opcode::Leave,
            Opcode::Ret,
        ]
    );

    assert_eq!(body.exception_handlers.len(), 1);
    let eh = &body.exception_handlers[0];
    assert_eq!(body.index_of(eh.try_start), Some(0));
    assert_eq!(eh.try_end.and_then(|id| body.index_of(id)), Some(4));
    assert_eq!(body.index_of(eh.handler_start), Some(4));
    assert_eq!(eh.handler_end.and_then(|id| body.index_of(id)), Some(6));
    assert_eq!(engine.events().count_kind(EventKind::BlockRemoved), 1);
}

#[test]
fn dead_try_region_is_dropped() {
    let mut asm = BodyAssembler::new();
    asm.emit_branch("br", "end").unwrap();
    asm.define_label("ts").unwrap();
    asm.emit_instruction("nop", None).unwrap();
    asm.emit_branch("leave", "end").unwrap();
    asm.define_label("hs").unwrap();
    asm.emit_instruction("pop", None).unwrap();
    asm.emit_branch("leave", "end").unwrap();
    asm.define_label("end").unwrap();
    asm.emit_instruction("ret", None).unwrap();
    asm.try_catch("ts", "hs", "hs", "end", Token::new(0x0100_0001));

    let module = Module::new("handlers");
    let method = module.insert(
        MethodDef::new(Token::method_def(1), "Program", "Skipped")
            .with_body(asm.finalize().unwrap()),
    );

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());

    assert_eq!(opcodes(&method), vec![Opcode::Ret]);
    assert!(body(&method).exception_handlers.is_empty());
    assert_eq!(engine.events().count_kind(EventKind::HandlerRemoved), 1);
    assert_eq!(engine.events().count_kind(EventKind::BlockRemoved), 2);
}

#[test]
fn rebuild_round_trip_preserves_edges() {
    let module = Module::new("roundtrip");
    let guard = predicate(&module, 1, false);
    let method = guarded_dispatch(&module, &guard);
    let original = body(&method);

    let graph = BlockGraph::from_body(&original).unwrap();
    let rebuilt = rebuild(&graph).unwrap();
    let again = BlockGraph::from_body(&rebuilt).unwrap();

    assert_eq!(graph.block_count(), again.block_count());
    assert_eq!(graph.edges(), again.edges());
    assert_eq!(rebuilt.instructions.len(), original.instructions.len());
}

#[test]
fn forwarding_helper_is_inlined_and_folded() {
    let module = Module::new("inline");

    // static int Helper.Key(int a, int b) => (a + b) ^ 90
    let mut asm = BodyAssembler::new();
    asm.emit_ldarg(0).unwrap();
    asm.emit_ldarg(1).unwrap();
    asm.emit_instruction("add", None).unwrap();
    asm.emit_ldc_i4(90).unwrap();
    asm.emit_instruction("xor", None).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    let helper = module.insert(
        MethodDef::new(Token::method_def(1), "Helper", "Key")
            .with_signature("System.Int32", 2, false)
            .with_body(asm.finalize().unwrap()),
    );

    // if (Key(3, 4) == 39) return 1; return 2;   (3 + 4) ^ 90 == 93
    let mut asm = BodyAssembler::new();
    asm.emit_ldc_i4(3).unwrap();
    asm.emit_ldc_i4(4).unwrap();
    asm.emit_call("call", helper.method_ref()).unwrap();
    asm.emit_ldc_i4(39).unwrap();
    asm.emit_branch("beq", "yes").unwrap();
    asm.emit_ldc_i4(2).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    asm.define_label("yes").unwrap();
    asm.emit_ldc_i4(1).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    let method = module.insert(
        MethodDef::new(Token::method_def(2), "Program", "Check")
            .with_signature("System.Int32", 0, false)
            .with_body(asm.finalize().unwrap()),
    );

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());

    let ops = opcodes(&method);
    assert!(!ops.contains(&Opcode::Call));
    assert!(!ops.iter().any(|op| op.long_form() == Opcode::Beq));
    assert_eq!(ops[ops.len() - 2..], [Opcode::LdcI42, Opcode::Ret]);
    assert_eq!(engine.events().count_kind(EventKind::MethodInlined), 1);
}

#[test]
fn module_batch_reports_outcomes() {
    let module = Module::new("batch");
    let guard = predicate(&module, 1, false);
    guarded_dispatch(&module, &guard);
    module.insert(
        MethodDef::new(Token::method_def(20), "Program", "Extern")
            .with_signature(BOOLEAN_TYPE, 0, false),
    );

    let engine = CflowDeobfuscator::default();
    let summary = engine.deobfuscate_module(&module);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.stats.methods_regenerated, 2);
    assert!(summary.summary().starts_with("2 processed, 1 skipped, 0 failed"));
}

/// ```text
///     ldarg.0
///     ldc.i4.5
///     dup
///     stloc.0
///     brtrue   L1
///     pop
///     ldc.i4.0
///     ret
/// L1: pop
///     ldloc.0
///     ret
/// ```
#[test]
fn duplicated_literal_keeps_stored_copy() {
    let module = Module::new("dup");
    let mut asm = BodyAssembler::new();
    asm.locals(1);
    asm.emit_ldarg(0).unwrap();
    asm.emit_ldc_i4(5).unwrap();
    asm.emit_instruction("dup", None).unwrap();
    asm.emit_stloc(0).unwrap();
    asm.emit_branch("brtrue", "L1").unwrap();
    asm.emit_instruction("pop", None).unwrap();
    asm.emit_ldc_i4(0).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    asm.define_label("L1").unwrap();
    asm.emit_instruction("pop", None).unwrap();
    asm.emit_ldloc(0).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    let method = module.insert(
        MethodDef::new(Token::method_def(10), "Program", "Stored")
            .with_signature("System.Int32", 1, false)
            .with_body(asm.finalize().unwrap()),
    );

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());
    assert_eq!(
        opcodes(&method),
        vec![
            Opcode::Ldarg0,
            Opcode::LdcI45,
            Opcode::Nop,
            Opcode::Stloc0,
            Opcode::Pop,
            Opcode::LdcI45,
            Opcode::Ret,
        ]
    );
    assert_eq!(body(&method).max_stack, 2);
    assert_eq!(engine.events().count_kind(EventKind::Warning), 0);
    assert_eq!(engine.events().count_kind(EventKind::BranchSimplified), 1);
}

#[test]
fn duplicated_literal_alone_on_stack() {
    let module = Module::new("dup");
    let mut asm = BodyAssembler::new();
    asm.locals(1);
    asm.emit_ldc_i4(5).unwrap();
    asm.emit_instruction("dup", None).unwrap();
    asm.emit_stloc(0).unwrap();
    asm.emit_branch("brtrue", "L1").unwrap();
    asm.emit_ldc_i4(0).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    asm.define_label("L1").unwrap();
    asm.emit_ldloc(0).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    let method = module.insert(
        MethodDef::new(Token::method_def(10), "Program", "Alone")
            .with_signature("System.Int32", 0, false)
            .with_body(asm.finalize().unwrap()),
    );

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());
    assert_eq!(
        opcodes(&method),
        vec![Opcode::LdcI45, Opcode::Nop, Opcode::Stloc0, Opcode::LdcI45, Opcode::Ret]
    );
    assert_eq!(engine.events().count_kind(EventKind::Warning), 0);
}

#[test]
fn duplicated_literal_stored_then_folded() {
    let module = Module::new("dup");
    let mut asm = BodyAssembler::new();
    asm.locals(1);
    asm.emit_ldc_i4(5).unwrap();
    asm.emit_instruction("dup", None).unwrap();
    asm.emit_stloc(0).unwrap();
    asm.emit_ldc_i4(3).unwrap();
    asm.emit_instruction("add", None).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    let method = module.insert(
        MethodDef::new(Token::method_def(10), "Program", "Folded")
            .with_signature("System.Int32", 0, false)
            .with_body(asm.finalize().unwrap()),
    );

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());
    assert_eq!(
        opcodes(&method),
        vec![
            Opcode::LdcI45,
            Opcode::Nop,
            Opcode::Stloc0,
            Opcode::Nop,
            Opcode::LdcI48,
            Opcode::Ret,
        ]
    );
    assert_eq!(engine.events().count_kind(EventKind::Warning), 0);
}

fn indirect_call(signature: Operand) -> MethodBody {
    let mut asm = BodyAssembler::new();
    asm.emit_ldc_i4(1).unwrap();
    asm.emit_ldarg(0).unwrap();
    asm.emit_instruction("calli", Some(signature)).unwrap();
    asm.emit_instruction("ret", None).unwrap();
    asm.finalize().unwrap()
}

#[test]
fn calli_with_call_site_signature_is_processed() {
    let module = Module::new("calli");
    let signature = MethodRef {
        token: Token::new(0x1100_0001),
        params: 1,
        has_this: false,
        returns_value: true,
    };
    let method = module.insert(
        MethodDef::new(Token::method_def(10), "Program", "Indirect")
            .with_signature("System.Int32", 1, false)
            .with_body(indirect_call(Operand::Method(signature))),
    );

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());
    assert_eq!(body(&method).max_stack, 2);
    assert_eq!(engine.events().count_kind(EventKind::Warning), 0);
    assert_eq!(engine.events().count_kind(EventKind::CodeRegenerated), 1);
}

#[test]
fn calli_with_opaque_signature_keeps_body() {
    let module = Module::new("calli");
    let original = indirect_call(Operand::Token(Token::new(0x1100_0001)));
    let method = module.insert(
        MethodDef::new(Token::method_def(10), "Program", "Opaque")
            .with_signature("System.Int32", 1, false)
            .with_body(original.clone()),
    );

    let engine = CflowDeobfuscator::default();
    assert!(engine.deobfuscate(&method, &module).unwrap());
    assert_eq!(body(&method), original);
    assert_eq!(engine.events().count_kind(EventKind::Warning), 1);
}
