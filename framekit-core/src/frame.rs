//! スタックフレームのハンドル
//!
//! `Frame` はスタックフレームへの弱参照と、その同一性（`StackId`）を持ちます。
//! スレッドが停止し直してフレームが作り直されても、同じ同一性のフレームを探し直して追従します。
//!
//! 各操作はフレームを解決できなければ空の値（無効なアドレス、空の値、空のリスト、`false`、`None`）を返し、
//! 解決できればターゲットのAPIロックを取って処理します。

use crate::address::Address;
use crate::disasm;
use crate::errors::NO_VALUE;
use crate::execution_context::ExecutionContext;
use crate::expr_eval;
use crate::thread::ThreadRef;
use crate::value::{Value, ValueList};
use framekit_symbols::{
    BlockRef, CompileUnit, Function, LineEntry, Module, Symbol, SymbolContext, SymbolContextItem, ValueType,
    Variable,
};
use framekit_target::{StackFrame, StackId, Target, Thread, REGISTER_SETS};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// APIの呼び出しを記録するログのターゲット
pub const API_LOG: &str = "framekit::api";
/// 式評価の結果を記録するログのターゲット
pub const EXPR_LOG: &str = "framekit::expr";

/// 無効なアドレス
pub const INVALID_ADDRESS: u64 = u64::MAX;
/// 無効なフレーム番号
pub const INVALID_FRAME_ID: u32 = u32::MAX;

#[derive(Debug, Default)]
struct HandleState {
    frame: Weak<StackFrame>,
    thread: Weak<Thread>,
    stack_id: Option<StackId>,
}

/// スタックフレームのハンドル
///
/// 複製したハンドルは同じ状態を共有します。
/// 等価性は部分的で、解決できないハンドルは自分自身とも等しくありません。
#[derive(Debug, Clone, Default)]
pub struct Frame {
    state: Arc<Mutex<HandleState>>,
}

impl Frame {
    /// 空のハンドル
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stack_frame(frame: Option<&Arc<StackFrame>>) -> Self {
        let handle = Self::new();
        handle.store(frame);
        handle
    }

    /// 作成時に記録したフレームの同一性
    pub fn stack_id(&self) -> Option<StackId> {
        self.state.lock().stack_id
    }

    fn store(&self, frame: Option<&Arc<StackFrame>>) {
        let mut state = self.state.lock();
        match frame {
            Some(frame) => {
                state.frame = Arc::downgrade(frame);
                state.thread = frame.thread().as_ref().map(Arc::downgrade).unwrap_or_default();
                state.stack_id = Some(frame.stack_id());
            }
            None => *state = HandleState::default(),
        }
    }

    /// ハンドルをフレームに解決する
    ///
    /// 保持しているフレームが、スレッドの同じ番号の現在のフレームと同じオブジェクトならそれを返します。
    /// そうでなければ同一性でフレームを探し直し、見つかったフレームを保持し直します。
    /// スレッドが終了していれば常に None です。
    pub fn stack_frame(&self) -> Option<Arc<StackFrame>> {
        loop {
            let (frame, thread_ref, stack_id) = {
                let state = self.state.lock();
                (state.frame.clone(), state.thread.clone(), state.stack_id)
            };

            let thread = thread_ref.upgrade()?;
            if let Some(frame) = frame.upgrade() {
                let current = thread.frame_at_index(frame.index());
                if current.is_some_and(|current| Arc::ptr_eq(&current, &frame)) {
                    return Some(frame);
                }
            }

            let stack_id = stack_id?;
            let target = thread.target();
            let _lock = target.as_ref().map(|t| t.api_lock());
            let found = thread.frame_with_stack_id(&stack_id);

            // 探している間に参照先が置き換えられていたら、新しい状態で解決し直す
            let mut state = self.state.lock();
            if state.stack_id != Some(stack_id) || !Weak::ptr_eq(&state.thread, &thread_ref) {
                tracing::trace!(target: API_LOG, %stack_id, "handle rebound during lookup");
                continue;
            }
            let found = found?;
            state.frame = Arc::downgrade(&found);
            return Some(found);
        }
    }

    /// ハンドルの参照先を置き換える
    ///
    /// `None` の場合は `clear` と同じく、このハンドルだけを空にする。
    pub fn set_stack_frame(&mut self, frame: Option<&Arc<StackFrame>>) {
        match frame {
            Some(frame) => self.store(Some(frame)),
            None => self.state = Arc::default(),
        }
        tracing::debug!(
            target: API_LOG,
            frame = %self.log_id(),
            "Frame::set_stack_frame"
        );
    }

    /// このハンドルだけを空にする（複製したハンドルには影響しない）
    pub fn clear(&mut self) {
        self.state = Arc::default();
        tracing::debug!(target: API_LOG, "Frame::clear");
    }

    fn log_id(&self) -> String {
        self.stack_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "null".to_string())
    }

    /// フレームを解決し、APIロックを取って実行コンテキストを処理する
    fn with_context<R>(&self, f: impl FnOnce(&ExecutionContext) -> Option<R>) -> Option<R> {
        let target = self.state.lock().thread.upgrade()?.target()?;
        let _lock = target.api_lock();

        let exe_ctx = ExecutionContext::from_frame(self.stack_frame());
        f(&exe_ctx)
    }

    fn with_frame<R>(&self, f: impl FnOnce(&Arc<StackFrame>, &Arc<Target>) -> R) -> Option<R> {
        self.with_context(|exe_ctx| {
            let (frame, target) = exe_ctx.frame_and_target()?;
            Some(f(frame, target))
        })
    }

    pub fn is_valid(&self) -> bool {
        let valid = self.with_frame(|_, _| true).unwrap_or(false);
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::is_valid => {}", valid);
        valid
    }

    /// 指定した要素のシンボルコンテキスト
    pub fn symbol_context(&self, scope: SymbolContextItem) -> SymbolContext {
        let sc = self
            .with_frame(|frame, _| frame.symbol_context(scope))
            .unwrap_or_default();
        tracing::debug!(
            target: API_LOG,
            frame = %self.log_id(),
            scope = scope.bits(),
            empty = sc.is_empty(),
            "Frame::symbol_context"
        );
        sc
    }

    pub fn module(&self) -> Option<Arc<Module>> {
        let module = self.symbol_context(SymbolContextItem::MODULE).module;
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::module => {:?}", module.as_ref().map(|m| m.name()));
        module
    }

    pub fn compile_unit(&self) -> Option<Arc<CompileUnit>> {
        let unit = self.symbol_context(SymbolContextItem::COMP_UNIT).comp_unit;
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::compile_unit => {:?}", unit.as_ref().map(|u| &u.name));
        unit
    }

    pub fn function(&self) -> Option<Arc<Function>> {
        let function = self.symbol_context(SymbolContextItem::FUNCTION).function;
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::function => {:?}", function.as_ref().map(|f| &f.name));
        function
    }

    pub fn symbol(&self) -> Option<Symbol> {
        let symbol = self.symbol_context(SymbolContextItem::SYMBOL).symbol;
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::symbol => {:?}", symbol.as_ref().map(|s| &s.name));
        symbol
    }

    /// pcを含む最も内側のブロック
    pub fn block(&self) -> Option<BlockRef> {
        let block = self.symbol_context(SymbolContextItem::BLOCK).block;
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::block => {:?}", block.as_ref().map(|b| b.id()));
        block
    }

    /// フレームの変数を定義するブロック（インライン関数ならそのブロック）
    pub fn frame_block(&self) -> Option<BlockRef> {
        let block = self.with_frame(|frame, _| frame.frame_block()).flatten();
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::frame_block => {:?}", block.as_ref().map(|b| b.id()));
        block
    }

    pub fn line_entry(&self) -> Option<LineEntry> {
        let entry = self.symbol_context(SymbolContextItem::LINE_ENTRY).line_entry;
        tracing::debug!(
            target: API_LOG,
            frame = %self.log_id(),
            "Frame::line_entry => {:?}",
            entry.as_ref().map(|e| format!("{}:{}", e.file, e.line))
        );
        entry
    }

    /// スタック上の番号
    pub fn frame_id(&self) -> u32 {
        let id = self.with_frame(|frame, _| frame.index()).unwrap_or(INVALID_FRAME_ID);
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::frame_id => {}", id);
        id
    }

    pub fn pc(&self) -> u64 {
        let pc = self.with_frame(|frame, _| frame.pc()).unwrap_or(INVALID_ADDRESS);
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::pc => 0x{:x}", pc);
        pc
    }

    /// pcを書き換える（フレーム0でのみ成功する）
    pub fn set_pc(&self, new_pc: u64) -> bool {
        let ok = self
            .with_frame(|frame, _| match frame.registers().set_pc(new_pc) {
                Ok(()) => true,
                Err(e) => {
                    tracing::debug!(target: API_LOG, "set_pc failed: {}", e);
                    false
                }
            })
            .unwrap_or(false);
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::set_pc(0x{:x}) => {}", new_pc, ok);
        ok
    }

    pub fn sp(&self) -> u64 {
        let sp = self
            .with_frame(|frame, _| frame.registers().sp())
            .flatten()
            .unwrap_or(INVALID_ADDRESS);
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::sp => 0x{:x}", sp);
        sp
    }

    pub fn fp(&self) -> u64 {
        let fp = self
            .with_frame(|frame, _| frame.registers().fp())
            .flatten()
            .unwrap_or(INVALID_ADDRESS);
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::fp => 0x{:x}", fp);
        fp
    }

    /// pcのアドレスとその所属
    pub fn pc_address(&self) -> Address {
        let addr = self
            .with_frame(|frame, target| Address::resolve(target, frame.pc()))
            .unwrap_or_default();
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::pc_address => {}", addr);
        addr
    }

    /// 変数パス（`a.b`, `p->x`, `arr[1]`）の値
    ///
    /// `.` をポインタに、`->` をポインタ以外に使った場合はエラーを持つ無効な値を返します。
    pub fn value_for_variable_path(&self, path: &str) -> Value {
        let value = self
            .with_frame(|frame, target| {
                expr_eval::value_for_variable_path(frame, target, path).unwrap_or_else(Value::from_error)
            })
            .unwrap_or_default();
        tracing::debug!(target: API_LOG, frame = %self.log_id(), path, "Frame::value_for_variable_path => {:?}", value);
        value
    }

    /// 名前で変数を探す
    ///
    /// pcを含むブロックから外側へ、インライン関数の境界までを探します。
    pub fn find_variable(&self, name: &str) -> Value {
        let value = self
            .with_frame(|frame, target| {
                if name.is_empty() {
                    return Value::empty();
                }
                let Some(block) = frame.current_block() else {
                    return Value::empty();
                };
                let mut vars = Vec::new();
                block.append_variables(true, true, &mut vars);
                vars.iter()
                    .find(|v| v.name == name)
                    .map(|v| Value::from_variable(frame, target, v))
                    .unwrap_or_default()
            })
            .unwrap_or_default();
        tracing::debug!(target: API_LOG, frame = %self.log_id(), name, "Frame::find_variable => {:?}", value);
        value
    }

    /// 名前と種類で値を探す
    pub fn find_value(&self, name: &str, value_type: ValueType) -> Value {
        let value = self
            .with_frame(|frame, target| {
                if name.is_empty() {
                    return Value::empty();
                }
                match value_type {
                    t if t.is_variable() => find_variable_value(frame, target, name, t),
                    ValueType::Register => register_value(frame, target, name),
                    ValueType::RegisterSet => REGISTER_SETS
                        .iter()
                        .position(|set| set.matches(name))
                        .map(|set| register_set_value(frame, target, set))
                        .unwrap_or_default(),
                    ValueType::ConstResult => target
                        .persistent_result(name)
                        .map(|result| {
                            Value::from_data(
                                result.name,
                                result.type_info,
                                ValueType::ConstResult,
                                None,
                                result.data,
                                target.memory(),
                                target.settings().max_children,
                            )
                        })
                        .unwrap_or_default(),
                    _ => Value::empty(),
                }
            })
            .unwrap_or_default();
        tracing::debug!(
            target: API_LOG,
            frame = %self.log_id(),
            name,
            value_type = %value_type,
            "Frame::find_value => {:?}",
            value
        );
        value
    }

    /// 両方が解決でき、同一性が等しいか
    pub fn is_equal(&self, other: &Frame) -> bool {
        let equal = match (self.stack_frame(), other.stack_frame()) {
            (Some(a), Some(b)) => a.stack_id() == b.stack_id(),
            _ => false,
        };
        tracing::debug!(
            target: API_LOG,
            frame = %self.log_id(),
            other = %other.log_id(),
            "Frame::is_equal => {}",
            equal
        );
        equal
    }

    /// フレームのスレッド
    pub fn thread(&self) -> ThreadRef {
        let thread = self
            .with_context(|exe_ctx| Some(ThreadRef::new(exe_ctx.thread())))
            .unwrap_or_default();
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::thread => {:?}", thread.thread_id());
        thread
    }

    /// 関数を逆アセンブルする
    pub fn disassemble(&self) -> Option<String> {
        let text = self
            .with_frame(|frame, target| match disasm::disassemble_frame(frame, target) {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::debug!(target: API_LOG, "disassemble failed: {}", e);
                    None
                }
            })
            .flatten();
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::disassemble => {}", text.is_some());
        text
    }

    /// 種類で絞り込んだフレームの変数
    ///
    /// `statics` はグローバル変数も含みます。`in_scope_only` の場合、pcが宣言ブロックの外にある変数を除きます。
    pub fn variables(&self, arguments: bool, locals: bool, statics: bool, in_scope_only: bool) -> ValueList {
        let list = self
            .with_frame(|frame, target| {
                frame
                    .variable_list()
                    .iter()
                    .filter(|v| match v.scope {
                        ValueType::VariableArgument => arguments,
                        ValueType::VariableLocal => locals,
                        ValueType::VariableGlobal | ValueType::VariableStatic => statics,
                        _ => false,
                    })
                    .filter(|v| !in_scope_only || is_in_scope(frame, v))
                    .map(|v| Value::from_variable(frame, target, v))
                    .collect::<ValueList>()
            })
            .unwrap_or_default();
        tracing::debug!(
            target: API_LOG,
            frame = %self.log_id(),
            arguments,
            locals,
            statics,
            in_scope_only,
            "Frame::variables => {} values",
            list.len()
        );
        list
    }

    /// レジスタセットごとの値
    pub fn registers(&self) -> ValueList {
        let list = self
            .with_frame(|frame, target| {
                (0..REGISTER_SETS.len())
                    .filter(|&set| !frame.registers().registers_in_set(set).is_empty())
                    .map(|set| register_set_value(frame, target, set))
                    .collect::<ValueList>()
            })
            .unwrap_or_default();
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::registers => {} sets", list.len());
        list
    }

    /// `frame #<番号>: <pc> <モジュール>`<関数> + <オフセット> at <ファイル>:<行>`
    pub fn description(&self) -> String {
        let desc = self
            .with_frame(|frame, _| describe(frame))
            .unwrap_or_else(|| NO_VALUE.to_string());
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::description => {}", desc);
        desc
    }

    /// 式を評価する
    ///
    /// 成功した結果は `$N` として保存され、その名前の値が返ります。
    /// 失敗した場合はエラーを持つ無効な値を返します。
    pub fn evaluate_expression(&self, expr: &str) -> Value {
        let value = self
            .with_frame(|frame, target| match expr_eval::evaluate_expression(frame, target, expr) {
                Ok(value) => value,
                Err(e) => Value::from_error(e),
            })
            .unwrap_or_default();

        tracing::debug!(
            target: EXPR_LOG,
            expr,
            result = ?value.value(),
            summary = ?value.summary(),
            error = ?value.error(),
            "expression evaluated"
        );
        tracing::debug!(target: API_LOG, frame = %self.log_id(), expr, "Frame::evaluate_expression => {:?}", value);
        value
    }

    /// pcがインライン展開された関数の中にあるか
    pub fn is_inlined(&self) -> bool {
        let inlined = self
            .with_frame(|frame, _| {
                frame
                    .current_block()
                    .and_then(|b| b.containing_inlined_block())
                    .is_some()
            })
            .unwrap_or(false);
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::is_inlined => {}", inlined);
        inlined
    }

    /// 関数名（インライン関数名、関数名、シンボル名の順に探す）
    pub fn function_name(&self) -> Option<String> {
        let name = self.with_frame(|frame, _| function_name(frame)).flatten();
        tracing::debug!(target: API_LOG, frame = %self.log_id(), "Frame::function_name => {:?}", name);
        name
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}

/// 変数がpcの位置から見えるか（グローバル・静的変数は常に見える）
fn is_in_scope(frame: &StackFrame, var: &Variable) -> bool {
    if matches!(var.scope, ValueType::VariableGlobal | ValueType::VariableStatic) {
        return true;
    }
    match (frame.current_block(), var.declared_in) {
        (_, None) => true,
        (Some(block), Some(declared_in)) => block.function().is_within(block.id(), declared_in),
        (None, Some(_)) => false,
    }
}

/// 現在のブロックから見える変数のうち、名前と種類が一致するもの
fn find_variable_value(frame: &StackFrame, target: &Target, name: &str, value_type: ValueType) -> Value {
    let mut vars: Vec<Arc<Variable>> = Vec::new();
    if let Some(block) = frame.current_block() {
        block.append_variables(true, true, &mut vars);
    }
    if matches!(value_type, ValueType::VariableGlobal | ValueType::VariableStatic) {
        for var in frame.variable_list() {
            if !vars.iter().any(|v| Arc::ptr_eq(v, &var)) {
                vars.push(var);
            }
        }
    }

    vars.iter()
        .filter(|v| is_in_scope(frame, v))
        .find(|v| v.scope == value_type && v.name == name)
        .map(|v| Value::from_variable(frame, target, v))
        .unwrap_or_default()
}

fn register_value(frame: &StackFrame, target: &Target, name: &str) -> Value {
    let registers = frame.registers();
    let Some(info) = registers.find_register(name) else {
        return Value::empty();
    };
    match registers.read_by_name(info.name) {
        Some(raw) => Value::register(info.name, info.size as u64, raw, target.memory()),
        None => Value::empty(),
    }
}

fn register_set_value(frame: &StackFrame, target: &Target, set: usize) -> Value {
    let memory = target.memory();
    let children = frame
        .registers()
        .registers_in_set(set)
        .into_iter()
        .map(|(info, raw)| Value::register(info.name, info.size as u64, raw, Arc::clone(&memory)))
        .collect();
    Value::register_set(REGISTER_SETS[set].name, children, memory)
}

fn function_name(frame: &StackFrame) -> Option<String> {
    let sc = frame.symbol_context(SymbolContextItem::FUNCTION | SymbolContextItem::BLOCK | SymbolContextItem::SYMBOL);

    if let Some(inlined) = sc.block.as_ref().and_then(|b| b.containing_inlined_block()) {
        if let Some(info) = inlined.inlined_info() {
            return Some(info.name.clone());
        }
    }
    if let Some(function) = &sc.function {
        return Some(function.name.clone());
    }
    sc.symbol.map(|s| s.display_name().to_string())
}

fn describe(frame: &StackFrame) -> String {
    let sc = frame.symbol_context(SymbolContextItem::EVERYTHING);
    let pc = frame.pc();
    let mut desc = format!("frame #{}: 0x{:016x}", frame.index(), pc);

    if let Some(module) = &sc.module {
        desc.push_str(&format!(" {}`", module.name()));
        let file_pc = pc.wrapping_sub(module.load_bias());
        let start = sc
            .function
            .as_ref()
            .map(|f| f.range.start)
            .or_else(|| sc.symbol.as_ref().map(|s| s.address));

        match (function_name(frame), start) {
            (Some(name), Some(start)) => desc.push_str(&format!("{} + {}", name, file_pc.wrapping_sub(start))),
            _ => desc.push_str("???"),
        }
    }

    if let Some(entry) = &sc.line_entry {
        desc.push_str(&format!(" at {}:{}", entry.file, entry.line));
        if let Some(column) = entry.column {
            desc.push_str(&format!(":{}", column));
        }
    }
    desc
}
