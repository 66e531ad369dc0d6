//! S4 -- Indirect call through a function pointer (spec.md §8): any register
//! marked reserved must be saved to a fresh stack tempvar before the call and
//! reloaded after, and the tempvar slot must be freed again once the call
//! returns.

mod support;

use corec_codegen::config::Config;
use corec_codegen::eval::call_with_reserved_registers_saved;
use corec_codegen::interner::Interner;
use corec_codegen::ir::entities::FunctionId;
use corec_codegen::ir::function::Function;
use corec_codegen::ir::instruction::Opcode;
use corec_codegen::regalloc::FlushFn;
use corec_codegen::result::SourcePosition;
use corec_codegen::variable::VariableStore;
use corec_entity::PrimaryMap;

#[test]
fn reserved_register_is_saved_before_the_call_and_reloaded_after() {
    let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
    let mut interner = Interner::new();
    let mut function = Function::new(interner.intern("f"), None);
    function.begin_codegen(16);

    let reserved_id = function.ring().scan_order().next().unwrap();
    function.ring_mut().get_mut(reserved_id).reserved = true;

    let mut variables = VariableStore::new(1 << 16);
    let cfg = Config::default();
    let mut flush: Box<FlushFn> = support::no_flush();

    let mut call_ran = false;
    call_with_reserved_registers_saved(
        &functions,
        FunctionId::from_u32(0),
        &mut function,
        &mut variables,
        &mut interner,
        &cfg,
        SourcePosition::default(),
        |_f, _vars, _interner, _flush| {
            call_ran = true;
            Ok(())
        },
        &mut *flush,
    )
    .unwrap();

    assert!(call_ran);
    // the tempvar slot used to save/restore the reserved register is freed
    // again once the call returns
    assert_eq!(variables.locals_used(), 0);

    let ops: Vec<Opcode> = function.instructions().iter().map(|i| i.opcode).collect();
    let stores = ops.iter().filter(|op| matches!(op, Opcode::Store)).count();
    let loads = ops.iter().filter(|op| matches!(op, Opcode::Load)).count();
    assert_eq!(stores, 1, "one store per reserved register: {:?}", ops);
    assert_eq!(loads, 1, "one reload per reserved register: {:?}", ops);

    function.finish_codegen().unwrap();
}

#[test]
fn nothing_reserved_means_no_save_restore_overhead() {
    let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
    let mut interner = Interner::new();
    let mut function = Function::new(interner.intern("f"), None);
    function.begin_codegen(16);

    let mut variables = VariableStore::new(1 << 16);
    let cfg = Config::default();
    let mut flush: Box<FlushFn> = support::no_flush();

    call_with_reserved_registers_saved(
        &functions,
        FunctionId::from_u32(0),
        &mut function,
        &mut variables,
        &mut interner,
        &cfg,
        SourcePosition::default(),
        |_f, _vars, _interner, _flush| Ok(()),
        &mut *flush,
    )
    .unwrap();

    assert_eq!(function.instructions().len(), 0);
    assert_eq!(variables.locals_used(), 0);
    function.finish_codegen().unwrap();
}
