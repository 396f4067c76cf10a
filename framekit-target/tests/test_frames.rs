//! スレッドのフレーム管理と同一性のテスト

use framekit_symbols::{
    CompileUnit, FrameBase, Function, ModuleBuilder, Symbol, SymbolContextItem, TypeInfo, ValueType, Variable,
    VariableLocation, FUNCTION_BLOCK,
};
use framekit_target::{FrameSpec, RegisterContext, StackId, Target};
use std::sync::Arc;

fn target_with_module() -> Arc<Target> {
    let mut unit = CompileUnit::new("src/main.rs");

    let mut main = Function::new("main", 0x1000..0x1100, FrameBase::Cfa);
    main.add_variable(
        FUNCTION_BLOCK,
        Variable::new("count", TypeInfo::primitive("i32", 4), ValueType::VariableLocal, VariableLocation::FrameOffset(-20)),
    );
    unit.add_function(main);
    unit.add_function(Function::new("helper", 0x2000..0x2100, FrameBase::Register(6)));
    unit.add_global(Variable::new(
        "TOTAL",
        TypeInfo::primitive("u64", 8),
        ValueType::VariableGlobal,
        VariableLocation::Address(0x4000),
    ));

    let module = ModuleBuilder::new("app")
        .load_bias(0x5555_0000)
        .code_range(0x1000..0x3000)
        .symbol(Symbol::new("main", 0x1000, 0x100))
        .symbol(Symbol::new("helper", 0x2000, 0x100))
        .symbol(Symbol::new("no_debug", 0x2800, 0x40))
        .compile_unit(unit)
        .build();

    let target = Target::new();
    target.add_module(Arc::new(module));
    target
}

fn specs() -> Vec<FrameSpec> {
    vec![
        FrameSpec::new(0x5555_2010, 0x7020, RegisterContext::with_pc_sp_fp(0x5555_2010, 0x7000, 0x7010)),
        FrameSpec::new(0x5555_1050, 0x7050, RegisterContext::with_pc_sp_fp(0x5555_1050, 0x7020, 0x7040)),
    ]
}

#[test]
fn test_stack_ids() {
    let target = target_with_module();
    let thread = target.create_thread(1, Some("main".to_string()));
    thread.set_frames(specs());

    let frame0 = thread.frame_at_index(0).unwrap();
    assert_eq!(frame0.stack_id(), StackId { tid: 1, cfa: 0x7020, scope: 0x5555_2000 });
    assert_eq!(frame0.lookup_pc(), 0x5555_2010);

    // 呼び出し元フレームは戻りアドレスの直前で検索する
    let frame1 = thread.frame_at_index(1).unwrap();
    assert_eq!(frame1.lookup_pc(), 0x5555_104f);
    assert_eq!(frame1.stack_id().scope, 0x5555_1000);
    assert_eq!(frame1.stack_id().to_string(), "tid=1 cfa=0x7050 scope=0x55551000");

    let sc = frame1.symbol_context(SymbolContextItem::FUNCTION);
    assert_eq!(sc.function.map(|f| f.name.clone()), Some("main".to_string()));
    assert!(sc.module.is_none());
}

#[test]
fn test_frames_rebuilt_with_same_identity() {
    let target = target_with_module();
    let thread = target.create_thread(1, None);
    thread.set_frames(specs());
    let before = thread.frame_at_index(1).unwrap();

    thread.clear_frames();
    assert_eq!(thread.frame_count(), 0);
    thread.set_frames(specs());

    let after = thread.frame_at_index(1).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(before.stack_id(), after.stack_id());

    let lookups = thread.identity_lookup_count();
    let found = thread.frame_with_stack_id(&before.stack_id()).unwrap();
    assert!(Arc::ptr_eq(&found, &after));
    assert_eq!(thread.identity_lookup_count(), lookups + 1);
}

#[test]
fn test_identity_tie_break_is_first_match() {
    let target = target_with_module();
    let thread = target.create_thread(1, None);
    let spec = FrameSpec::new(0x5555_2010, 0x7020, RegisterContext::with_pc_sp_fp(0x5555_2010, 0, 0));
    thread.set_frames(vec![spec.clone(), spec]);

    let id = thread.frame_at_index(1).unwrap().stack_id();
    assert_eq!(thread.frame_with_stack_id(&id).map(|f| f.index()), Some(0));
}

#[test]
fn test_scope_falls_back_to_symbol() {
    let target = target_with_module();
    let thread = target.create_thread(1, None);
    thread.set_frames(vec![FrameSpec::new(0x5555_2810, 0x7020, RegisterContext::with_pc_sp_fp(0x5555_2810, 0, 0))]);
    assert_eq!(thread.frame_at_index(0).unwrap().stack_id().scope, 0x5555_2800);

    // どのモジュールにも属さないpcはpc自身がスコープになる
    thread.set_frames(vec![FrameSpec::new(0x10, 0x7020, RegisterContext::with_pc_sp_fp(0x10, 0, 0))]);
    assert_eq!(thread.frame_at_index(0).unwrap().stack_id().scope, 0x10);
}

#[test]
fn test_frame_base_and_variables() {
    let target = target_with_module();
    let thread = target.create_thread(1, None);
    thread.set_frames(specs());

    // helper の frame base は rbp
    let frame0 = thread.frame_at_index(0).unwrap();
    assert_eq!(frame0.frame_base(), Some(0x7010));
    // main の frame base は CFA
    let frame1 = thread.frame_at_index(1).unwrap();
    assert_eq!(frame1.frame_base(), Some(0x7050));

    let names: Vec<_> = frame1.variable_list().iter().map(|v| v.name.clone()).collect();
    assert_eq!(names, vec!["count", "TOTAL"]);
    assert_eq!(frame1.frame_block().map(|b| b.id()), Some(FUNCTION_BLOCK));
}

#[test]
fn test_only_innermost_registers_are_writable() {
    let target = target_with_module();
    let thread = target.create_thread(1, None);
    thread.set_frames(specs());

    let frame0 = thread.frame_at_index(0).unwrap();
    assert!(frame0.registers().set_pc(0x5555_2020).is_ok());
    assert_eq!(frame0.pc(), 0x5555_2020);

    let frame1 = thread.frame_at_index(1).unwrap();
    assert!(frame1.registers().set_pc(0x5555_1060).is_err());
    assert_eq!(frame1.pc(), 0x5555_1050);
}

#[test]
fn test_frame_links() {
    let target = target_with_module();
    let thread = target.create_thread(7, None);
    thread.set_frames(specs());
    let frame = thread.frame_at_index(0).unwrap();

    assert_eq!(frame.thread().map(|t| t.tid()), Some(7));
    assert!(frame.target().is_some());

    drop(target.remove_thread(7));
    drop(thread);
    assert!(frame.thread().is_none());
    assert!(frame.target().is_none());
}
