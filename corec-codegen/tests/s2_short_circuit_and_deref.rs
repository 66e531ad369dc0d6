//! S2 -- Short-circuit `&&` (spec.md §8): `p && *p` loads `p`, normalizes it
//! to 0/1, branches past the right-hand side, flushes without discarding
//! (the branch might not be taken), then evaluates the dereference and
//! joins.

mod support;

use std::collections::HashMap;

use corec_codegen::config::Config;
use corec_codegen::eval::{eval_expression, EvalCtx};
use corec_codegen::external::SymbolKind;
use corec_codegen::ir::entities::FunctionId;
use corec_codegen::ir::function::Function;
use corec_codegen::ir::instruction::Opcode;
use corec_codegen::interner::Interner;
use corec_codegen::result::SourcePosition;
use corec_codegen::variable::VariableStore;
use corec_entity::PrimaryMap;

use support::Fixture;

#[test]
fn and_short_circuits_before_dereferencing() {
    let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
    let mut variables = VariableStore::new(1 << 20);
    let mut interner = Interner::new();
    let cfg = Config::default();
    let external_functions: HashMap<u32, FunctionId> = HashMap::new();
    let fid = FunctionId::from_u32(0);
    let mut function = Function::new(interner.intern("f"), None);
    function.begin_codegen(cfg.gpr_count());

    let p = variables.new_local(fid, interner.intern("p"), 0, cfg.sizeofgpr as u32, Some(interner.intern("voidptr")));

    let mut fixture = Fixture::new(&[]);
    fixture.native("voidptr", cfg.sizeofgpr as u32, false);
    fixture.symbols.insert("p".to_string(), SymbolKind::Variable(p));
    let mut lexer = Fixture::new(&["p", "&&", "*", "p"]);

    let mut ctx = EvalCtx::new(
        &functions,
        fid,
        &mut variables,
        &mut interner,
        &cfg,
        &fixture,
        &mut lexer,
        &external_functions,
        0,
    );

    let mut flush = support::no_flush();

    let result = eval_expression(&mut ctx, &mut function, SourcePosition::default(), &mut *flush).unwrap();
    assert!(ctx.variables.get(result).is_tempvar());

    let ops: Vec<Opcode> = function.instructions().iter().map(|i| i.opcode).collect();
    let snz_count = ops.iter().filter(|op| matches!(op, Opcode::SetNonZero)).count();
    assert_eq!(snz_count, 2, "both the left and right operand get normalized to 0/1: {:?}", ops);
    assert!(ops.iter().any(|op| matches!(op, Opcode::JumpIfZero)), "{:?}", ops);
    assert!(ops.iter().any(|op| matches!(op, Opcode::Load)), "dereferencing *p should emit a load: {:?}", ops);
    // The join label must be the last thing planted: finish_codegen fails
    // if any label (including the branch's own target) is left dangling.
    function.finish_codegen().unwrap();
}
