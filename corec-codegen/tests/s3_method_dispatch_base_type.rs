//! S3 -- Method dispatch with inheritance (spec.md §8): `child_obj.method(arg)`
//! where `method` is declared on the base type. Expect the exact-type
//! signature to miss, the base-type signature to hit, and a call emitted
//! with the child object's address passed as the first argument.

mod support;

use std::collections::HashMap;

use corec_codegen::config::Config;
use corec_codegen::eval::{eval_expression, EvalCtx};
use corec_codegen::external::SymbolKind;
use corec_codegen::ir::entities::FunctionId;
use corec_codegen::ir::function::Function;
use corec_codegen::interner::Interner;
use corec_codegen::result::SourcePosition;
use corec_codegen::variable::VariableStore;
use corec_entity::PrimaryMap;

use support::Fixture;

#[test]
fn method_call_falls_back_to_the_base_type_signature() {
    let mut interner = Interner::new();
    let mut functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
    let caller = functions.push(Function::new(interner.intern("f"), None));
    let callee = functions.push(Function::new(interner.intern("draw"), None));

    let mut variables = VariableStore::new(1 << 20);
    let cfg = Config::default();

    let mut external_functions: HashMap<u32, FunctionId> = HashMap::new();
    external_functions.insert(9, callee);

    let child = variables.new_local(caller, interner.intern("child_obj"), 0, cfg.sizeofgpr as u32, Some(interner.intern("Circle")));
    let arg = variables.new_local(caller, interner.intern("arg"), cfg.sizeofgpr as u32, 4, Some(interner.intern("int")));

    let mut fixture = Fixture::new(&[]);
    fixture.native("int", 4, true);
    fixture.native("Circle", cfg.sizeofgpr as u32, false);
    fixture.symbols.insert("child_obj".to_string(), SymbolKind::Variable(child));
    fixture.symbols.insert("arg".to_string(), SymbolKind::Variable(arg));
    fixture.base_types.insert("Circle".to_string(), vec!["Shape".to_string()]);
    // The exact-type signature is deliberately absent; only the base-type
    // one resolves.
    fixture.funcs.insert("method|Shape|int|".to_string(), 9);

    let mut lexer = Fixture::new(&["child_obj", ".", "method", "(", "arg", ")"]);

    let mut function = Function::new(interner.intern("f"), None);
    function.begin_codegen(cfg.gpr_count());

    let mut ctx = EvalCtx::new(
        &functions,
        caller,
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
    assert_eq!(*function.called_functions.get(&callee).unwrap(), 1);

    function.finish_codegen().unwrap();
}
