//! S5 -- Bitfield write (spec.md §8): writing to a bitfield member binds a
//! dirty register to the exact `(var, offset, size, bitselect)` tuple without
//! loading or masking anything up front, and the mask/shift/OR/store
//! sequence happens entirely inside the embedder's flush callback, which
//! must see that same bitselect value intact.

mod support;

use corec_codegen::config::Config;
use corec_codegen::interner::Interner;
use corec_codegen::ir::entities::FunctionId;
use corec_codegen::ir::function::Function;
use corec_codegen::memory::{GetRegForVar, Purpose};
use corec_codegen::regalloc::{flush_and_discard_all, FlushAllMode, FlushFn, Tenant};
use corec_codegen::result::SourcePosition;
use corec_codegen::variable::VariableStore;
use corec_entity::PrimaryMap;

#[test]
fn writing_a_bitfield_binds_a_dirty_register_and_flushes_with_its_bitselect() {
    let functions: PrimaryMap<FunctionId, Function> = PrimaryMap::new();
    let mut interner = Interner::new();
    let mut function = Function::new(interner.intern("f"), None);
    function.begin_codegen(16);

    let mut variables = VariableStore::new(1 << 16);
    let cfg = Config::default();
    let fid = FunctionId::from_u32(0);

    // A 3-bit field starting at bit 4 of a 4-byte word at offset 0.
    let flag_word = variables.new_local(fid, interner.intern("flags"), 0, 4, None);
    let bitselect: u64 = 0b111 << 4;

    let mut flush = support::no_flush();
    let reg = {
        let mut getreg = GetRegForVar {
            functions: &functions,
            current: fid,
            function: &mut function,
            variables: &mut variables,
            interner: &mut interner,
            cfg: &cfg,
        };
        getreg
            .run(flag_word, 0, 4, bitselect, false, Purpose::ForOutput, SourcePosition::default(), &mut *flush)
            .unwrap()
    };

    assert!(function.ring().get(reg).dirty, "an output-purpose register starts dirty");
    match function.ring().get(reg).tenant {
        Tenant::Variable { var, offset, size, bitselect: b } => {
            assert_eq!(var, flag_word);
            assert_eq!(offset, 0);
            assert_eq!(size, 4);
            assert_eq!(b, bitselect, "the register must carry the exact bitselect the caller asked to write");
        }
        other => panic!("expected a Variable tenant, got {:?}", other),
    }
    // no load/mask/shift is emitted up front; that sequence is the
    // embedder's responsibility inside the flush callback
    assert_eq!(function.instructions().len(), 0);

    let mut seen_bitselect = None;
    let mut record_flush: Box<FlushFn> = Box::new(|ring, id| {
        if let Tenant::Variable { bitselect, .. } = ring.get(id).tenant {
            seen_bitselect = Some(bitselect);
        }
        ring.get_mut(id).dirty = false;
        Ok(())
    });
    flush_and_discard_all(function.ring_mut(), FlushAllMode::FlushAndDiscardAll, &mut *record_flush).unwrap();
    assert_eq!(seen_bitselect, Some(bitselect));

    function.finish_codegen().unwrap();
}
