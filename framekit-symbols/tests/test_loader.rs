//! DWARFローダーとモジュール構築のテスト
//!
//! テストバイナリ自身を読み込んで確認します。

use framekit_symbols::{DwarfLoader, Module, SymbolContextItem, ValueType};
use std::sync::Arc;

#[inline(never)]
fn marker_function(input: u64) -> u64 {
    let doubled = input * 2;
    std::hint::black_box(doubled)
}

fn load_self() -> Arc<Module> {
    let exe = std::env::current_exe().expect("current_exe");
    Arc::new(Module::load(&exe).expect("Failed to load test binary"))
}

#[test]
fn test_load_current_exe() {
    assert_eq!(marker_function(21), 42);

    let module = load_self();
    assert!(!module.symbols().is_empty(), "Should have symbols");
    assert!(!module.code_range().is_empty(), "Should have a code range");
    assert!(!module.compile_units().is_empty(), "Should have compile units");
    assert!(!module.line_table().is_empty(), "Should have line entries");
}

#[test]
fn test_function_and_variables() {
    let module = load_self();

    let function = module
        .find_function("marker_function")
        .expect("marker_function should be described in DWARF");
    assert!(!function.range.is_empty());

    let vars = function.all_variables();
    let input = vars.iter().find(|v| v.name == "input").expect("argument input");
    assert_eq!(input.scope, ValueType::VariableArgument);
    assert!(vars.iter().any(|v| v.name == "doubled" && v.scope == ValueType::VariableLocal));

    // 関数の先頭アドレスから同じ関数が引ける
    let sc = module.resolve_file_address(function.range.start, SymbolContextItem::EVERYTHING);
    assert_eq!(sc.function.map(|f| f.name.clone()), Some("marker_function".to_string()));
    assert!(sc.block.is_some());
    assert!(sc.comp_unit.is_some());
}

#[test]
fn test_loader_reports_kind() {
    let exe = std::env::current_exe().expect("current_exe");
    let loader = DwarfLoader::load(&exe).expect("load");
    let range = loader.code_range();
    assert!(range.start < range.end);
    // PIEかどうかはビルド設定次第なので、モジュールの値と一致することだけ確認する
    let module = loader.build_module().expect("build");
    assert_eq!(module.is_pie(), loader.is_pie());
}
