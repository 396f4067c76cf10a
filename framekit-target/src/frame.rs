//! スタックフレーム

use crate::{RegisterContext, Target, Thread, ThreadId};
use framekit_symbols::{BlockRef, FrameBase, SymbolContext, SymbolContextItem, Variable, ValueType};
use std::fmt;
use std::sync::{Arc, Weak};

/// フレームの同一性
///
/// スレッドとスタック上の論理的な位置（CFAと関数の開始アドレス）で決まります。
/// スレッドが停止するたびにフレームは作り直されますが、同じ位置のフレームは
/// 同じ StackId を持ちます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackId {
    pub tid: ThreadId,
    /// Canonical Frame Address
    pub cfa: u64,
    /// フレームのpcを含む関数（またはシンボル）の開始アドレス
    pub scope: u64,
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid={} cfa=0x{:x} scope=0x{:x}", self.tid, self.cfa, self.scope)
    }
}

/// 停止時に観測したフレームの内容
#[derive(Debug, Clone)]
pub struct FrameSpec {
    pub pc: u64,
    pub cfa: u64,
    pub registers: RegisterContext,
}

impl FrameSpec {
    pub fn new(pc: u64, cfa: u64, registers: RegisterContext) -> Self {
        Self { pc, cfa, registers }
    }
}

/// スタックフレーム
///
/// スレッドが所有し、再開すると破棄されます。
#[derive(Debug)]
pub struct StackFrame {
    index: u32,
    stack_id: StackId,
    pc: u64,
    cfa: u64,
    registers: RegisterContext,
    thread: Weak<Thread>,
    /// フレーム作成時に解決したシンボルコンテキスト
    sc: SymbolContext,
}

impl StackFrame {
    pub(crate) fn new(index: u32, spec: FrameSpec, thread: &Arc<Thread>, target: Option<&Arc<Target>>) -> Self {
        let registers = if index == 0 {
            spec.registers
        } else {
            spec.registers.read_only()
        };

        let lookup_pc = lookup_pc(index, spec.pc);
        let sc = target
            .map(|t| t.resolve_load_address(lookup_pc, SymbolContextItem::EVERYTHING))
            .unwrap_or_default();

        let scope = scope_address(&sc).unwrap_or(lookup_pc);

        Self {
            index,
            stack_id: StackId {
                tid: thread.tid(),
                cfa: spec.cfa,
                scope,
            },
            pc: spec.pc,
            cfa: spec.cfa,
            registers,
            thread: Arc::downgrade(thread),
            sc,
        }
    }

    /// スタック上の番号（0が最も内側）
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn stack_id(&self) -> StackId {
        self.stack_id
    }

    /// 登録時のpc（書き換え後の値は registers() から読む）
    pub fn pc(&self) -> u64 {
        self.registers.pc().unwrap_or(self.pc)
    }

    pub fn registers(&self) -> &RegisterContext {
        &self.registers
    }

    /// シンボル検索に使うpc（呼び出し元フレームでは戻り先の直前）
    pub fn lookup_pc(&self) -> u64 {
        lookup_pc(self.index, self.pc)
    }

    /// 要求された要素だけを持つシンボルコンテキスト
    pub fn symbol_context(&self, scope: SymbolContextItem) -> SymbolContext {
        self.sc.filtered(scope)
    }

    /// pcを含む最も内側のブロック
    pub fn current_block(&self) -> Option<BlockRef> {
        self.sc.block.clone()
    }

    /// フレームの変数を定義するブロック
    ///
    /// pcがインライン関数の中にあればそのブロック、なければ関数本体のブロックです。
    pub fn frame_block(&self) -> Option<BlockRef> {
        self.current_block()
            .and_then(|b| b.containing_inlined_block())
            .or_else(|| self.sc.function.clone().map(BlockRef::function_block))
    }

    /// DW_AT_frame_base の値
    pub fn frame_base(&self) -> Option<u64> {
        match self.sc.function.as_ref()?.frame_base {
            FrameBase::Cfa => Some(self.cfa),
            FrameBase::Register(regnum) => self.registers.read_dwarf(regnum),
            FrameBase::Unknown => None,
        }
    }

    /// フレームから見える変数
    ///
    /// 関数内のすべてのブロックの変数に続けて、コンパイルユニットのグローバル・静的変数を返します。
    pub fn variable_list(&self) -> Vec<Arc<Variable>> {
        let mut vars = self
            .sc
            .function
            .as_ref()
            .map(|f| f.all_variables())
            .unwrap_or_default();

        if let Some(unit) = &self.sc.comp_unit {
            vars.extend(
                unit.globals
                    .iter()
                    .filter(|v| matches!(v.scope, ValueType::VariableGlobal | ValueType::VariableStatic))
                    .cloned(),
            );
        }
        vars
    }

    pub fn thread(&self) -> Option<Arc<Thread>> {
        self.thread.upgrade()
    }

    pub fn target(&self) -> Option<Arc<Target>> {
        self.thread()?.target()
    }
}

fn lookup_pc(index: u32, pc: u64) -> u64 {
    if index == 0 {
        pc
    } else {
        pc.saturating_sub(1)
    }
}

/// フレームの関数（なければシンボル）の開始ロードアドレス
fn scope_address(sc: &SymbolContext) -> Option<u64> {
    let module = sc.module.as_ref()?;
    let start = sc
        .function
        .as_ref()
        .map(|f| f.range.start)
        .or_else(|| sc.symbol.as_ref().map(|s| s.address))?;
    Some(module.load_address(start))
}
