//! S6 -- Ancestor-frame read through an address-taken function (spec.md §8):
//! when the ancestor whose frame is being reached has had its address taken
//! (`its_pointer_is_obtained`), the pointer can't be recovered from a simple
//! parent-chain walk, since the frame may have been entered through a saved
//! function pointer rather than lexically. Instead the walk scans the
//! previous-stackframe chain comparing each candidate's stackframe-id
//! against the ancestor's own code address. This regression-tests the fix
//! to the id-scan loop, which used to reuse one register for both the
//! scanned candidate and the comparison target so the comparison never did
//! anything real.

use corec_codegen::interner::Interner;
use corec_codegen::ir::entities::FunctionId;
use corec_codegen::ir::function::Function;
use corec_codegen::ir::instruction::Opcode;
use corec_codegen::regalloc::{FlushFn, Tenant};
use corec_codegen::result::SourcePosition;
use corec_codegen::stackframe::{get_ancestor_frame_pointer, FrameSource};
use corec_entity::PrimaryMap;

#[test]
fn ancestor_walk_through_an_address_taken_function_emits_a_real_compare_loop() {
    let mut interner = Interner::new();
    let mut functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();

    let mut parent_fn = Function::new(interner.intern("outer"), None);
    parent_fn.is_stackframe_holder = true;
    // The ancestor's address was taken (`&outer`) somewhere in the unit, so
    // reaching it requires the stackframe-id scan rather than a plain
    // parent-chain load.
    parent_fn.its_pointer_is_obtained = true;
    let parent = functions.push(parent_fn);

    let child_fn = Function::new(interner.intern("inner"), Some(parent));
    let child = functions.push(child_fn);

    let mut function = Function::new(interner.intern("inner"), Some(parent));
    function.begin_codegen(16);
    let mut flush: Box<FlushFn> = Box::new(|_ring, _id| Ok(()));

    let source = get_ancestor_frame_pointer(&functions, child, &mut function, 1, false, SourcePosition::default(), &mut *flush).unwrap();

    let reg = match source {
        FrameSource::Fresh(reg) => reg,
        other => panic!("expected a freshly loaded pointer, got {:?}", other),
    };
    assert!(matches!(function.ring().get(reg).tenant, Tenant::FuncLevel(1)));
    assert!(!function.ring().get(reg).dirty);

    let ops: Vec<Opcode> = function.instructions().iter().map(|i| i.opcode).collect();
    assert!(ops.iter().any(|op| matches!(op, Opcode::Afip)), "{:?}", ops);
    let loads = ops.iter().filter(|op| matches!(op, Opcode::Load)).count();
    assert_eq!(loads, 3, "one load to step onto the previous-stackframe chain, one to read each candidate's id, one to step to the next candidate: {:?}", ops);
    assert!(ops.iter().any(|op| matches!(op, Opcode::Sub)), "the id comparison must actually subtract the scanned candidate from the target: {:?}", ops);
    assert!(ops.iter().any(|op| matches!(op, Opcode::JumpIfZero)), "{:?}", ops);
    assert!(ops.iter().any(|op| matches!(op, Opcode::Jump)), "the loop must jump back to retry the next candidate: {:?}", ops);

    function.finish_codegen().unwrap();
}

#[test]
fn ancestor_walk_through_a_plain_ancestor_is_a_single_load() {
    let mut interner = Interner::new();
    let mut functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();

    let mut parent_fn = Function::new(interner.intern("outer"), None);
    parent_fn.is_stackframe_holder = true;
    let parent = functions.push(parent_fn);

    let child_fn = Function::new(interner.intern("inner"), Some(parent));
    let child = functions.push(child_fn);

    let mut function = Function::new(interner.intern("inner"), Some(parent));
    function.begin_codegen(16);
    let mut flush: Box<FlushFn> = Box::new(|_ring, _id| Ok(()));

    get_ancestor_frame_pointer(&functions, child, &mut function, 1, false, SourcePosition::default(), &mut *flush).unwrap();

    let ops: Vec<Opcode> = function.instructions().iter().map(|i| i.opcode).collect();
    assert_eq!(ops, vec![Opcode::Load], "no ancestor has had its address taken, so this is a single load of the stored parent pointer");

    function.finish_codegen().unwrap();
}
