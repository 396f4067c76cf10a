//! テスト用のターゲット
//!
//! `leaf`（フレーム0）を `main`（フレーム1）が呼び出して停止した状態を、
//! メモリ上のモジュールとスタックで再現します。

#![allow(dead_code)]

use framekit_symbols::{
    CompileUnit, FieldInfo, FrameBase, Function, InlineInfo, LineEntry, MemoryMap, ModuleBuilder, Symbol, TypeInfo,
    ValueType, Variable, VariableLocation, FUNCTION_BLOCK,
};
use framekit_target::{FrameSpec, RegisterContext, Target, Thread};
use std::sync::Arc;

pub const BIAS: u64 = 0x5555_0000;
pub const TID: i32 = 1;

pub const LEAF_PC: u64 = BIAS + 0x2010;
pub const MAIN_PC: u64 = BIAS + 0x1050;
pub const LEAF_CFA: u64 = 0x7020;
pub const MAIN_CFA: u64 = 0x7100;

pub fn point_type() -> TypeInfo {
    TypeInfo::Struct {
        name: "Point".to_string(),
        size: 8,
        fields: vec![
            FieldInfo {
                name: "x".to_string(),
                offset: 0,
                type_info: TypeInfo::primitive("i32", 4),
            },
            FieldInfo {
                name: "y".to_string(),
                offset: 4,
                type_info: TypeInfo::primitive("i32", 4),
            },
        ],
    }
}

fn local(name: &str, type_info: TypeInfo, offset: i64) -> Variable {
    Variable::new(name, type_info, ValueType::VariableLocal, VariableLocation::FrameOffset(offset))
}

fn i32_type() -> TypeInfo {
    TypeInfo::primitive("i32", 4)
}

/// main: 0x1000..0x1100
///
/// - 0x1040..0x1080 のブロックに `inner`
/// - 0x1080..0x10a0 にインライン展開された `helper_inline`（`tmp`）
/// - 0x10c0..0x10e0 のブロックに `later`
fn main_function() -> Function {
    let mut main = Function::new("main", 0x1000..0x1100, FrameBase::Cfa);
    main.add_variable(
        FUNCTION_BLOCK,
        Variable::new("argc", i32_type(), ValueType::VariableArgument, VariableLocation::FrameOffset(-20)),
    );
    main.add_variable(FUNCTION_BLOCK, local("point", point_type(), -32));
    main.add_variable(FUNCTION_BLOCK, local("ptr", TypeInfo::pointer_to(point_type()), -40));
    main.add_variable(
        FUNCTION_BLOCK,
        local(
            "values",
            TypeInfo::Array {
                element_type: Some(Box::new(i32_type())),
                length: Some(4),
            },
            -64,
        ),
    );

    let lexical = main.add_block(FUNCTION_BLOCK, vec![0x1040..0x1080], None);
    main.add_variable(lexical, local("inner", i32_type(), -68));

    let inlined = main.add_block(
        FUNCTION_BLOCK,
        vec![0x1080..0x10a0],
        Some(InlineInfo {
            name: "helper_inline".to_string(),
            call_file: Some("src/main.rs".to_string()),
            call_line: Some(14),
        }),
    );
    main.add_variable(inlined, local("tmp", i32_type(), -72));

    let later = main.add_block(FUNCTION_BLOCK, vec![0x10c0..0x10e0], None);
    main.add_variable(later, local("later", i32_type(), -76));
    main
}

/// leaf: 0x2000..0x2100, frame base は rbp
fn leaf_function() -> Function {
    let mut leaf = Function::new("leaf", 0x2000..0x2100, FrameBase::Register(6));
    leaf.add_variable(
        FUNCTION_BLOCK,
        Variable::new("n", TypeInfo::primitive("u64", 8), ValueType::VariableArgument, VariableLocation::Register(5)),
    );
    leaf.add_variable(FUNCTION_BLOCK, local("total", TypeInfo::primitive("u64", 8), -8));
    leaf.add_variable(
        FUNCTION_BLOCK,
        Variable::new("gone", i32_type(), ValueType::VariableLocal, VariableLocation::OptimizedOut),
    );
    leaf
}

pub fn target() -> Arc<Target> {
    let mut unit = CompileUnit::new("src/main.rs");
    unit.add_function(main_function());
    unit.add_function(leaf_function());
    unit.add_global(Variable::new(
        "COUNTER",
        TypeInfo::primitive("u64", 8),
        ValueType::VariableGlobal,
        VariableLocation::Address(0x4000),
    ));
    unit.add_global(Variable::new(
        "LIMIT",
        TypeInfo::primitive("u32", 4),
        ValueType::VariableStatic,
        VariableLocation::Address(0x4008),
    ));

    let module = ModuleBuilder::new("app")
        .load_bias(BIAS)
        .code_range(0x1000..0x3000)
        .symbol(Symbol::new("main", 0x1000, 0x100))
        .symbol(Symbol::new("leaf", 0x2000, 0x100))
        .symbol(Symbol::new("stub", 0x2800, 0x10))
        .line(LineEntry {
            address: 0x1000,
            size: 0x50,
            file: "src/main.rs".to_string(),
            line: 10,
            column: Some(5),
        })
        .line(LineEntry {
            address: 0x1050,
            size: 0xb0,
            file: "src/main.rs".to_string(),
            line: 12,
            column: None,
        })
        .line(LineEntry {
            address: 0x2000,
            size: 0x100,
            file: "src/leaf.rs".to_string(),
            line: 30,
            column: Some(9),
        })
        .compile_unit(unit)
        .build();

    let target = Target::new();
    target.add_module(Arc::new(module));
    target.set_memory(Arc::new(memory()));
    target
}

fn memory() -> MemoryMap {
    let mut mem = MemoryMap::new();
    mem.insert(0x7000, vec![0; 0x200]);

    // leaf: total = rbp - 8
    mem.write_u64(0x7008, 99);

    // main: frame base = CFA
    mem.write(0x70ec, &2i32.to_le_bytes());
    mem.write(0x70e0, &3i32.to_le_bytes());
    mem.write(0x70e4, &(-4i32).to_le_bytes());
    mem.write_u64(0x70d8, 0x70e0);
    for (i, v) in [1i32, 2, 3, 4].iter().enumerate() {
        mem.write(0x70c0 + 4 * i as u64, &v.to_le_bytes());
    }
    mem.write(0x70bc, &5i32.to_le_bytes());
    mem.write(0x70b8, &6i32.to_le_bytes());

    // COUNTER, LIMIT
    let mut globals = 1000u64.to_le_bytes().to_vec();
    globals.extend_from_slice(&50u32.to_le_bytes());
    globals.extend_from_slice(&[0; 4]);
    mem.insert(BIAS + 0x4000, globals);

    // leaf のコード（nop）
    mem.insert(BIAS + 0x2000, vec![0x90; 0x100]);
    mem
}

/// 停止時のフレーム（leaf, main）
pub fn specs() -> Vec<FrameSpec> {
    vec![
        FrameSpec::new(
            LEAF_PC,
            LEAF_CFA,
            RegisterContext::with_pc_sp_fp(LEAF_PC, 0x7000, 0x7010).with("rdi", 7),
        ),
        FrameSpec::new(MAIN_PC, MAIN_CFA, RegisterContext::with_pc_sp_fp(MAIN_PC, LEAF_CFA, 0x70f0)),
    ]
}

/// 停止したスレッド "thread-1" を持つターゲット
pub fn stopped() -> (Arc<Target>, Arc<Thread>) {
    let target = target();
    let thread = target.create_thread(TID, Some("thread-1".to_string()));
    thread.set_frames(specs());
    (target, thread)
}

/// 停止と再開を1回ずつ行い、フレームを作り直す
pub fn restop(thread: &Arc<Thread>) {
    thread.clear_frames();
    thread.set_frames(specs());
}
