//! モジュール（ロードされた実行ファイル・共有ライブラリ）

use crate::{
    BlockRef, Function, LineEntry, LineTable, Symbol, SymbolContext, SymbolContextItem,
    SymbolResolver, Variable,
};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// コンパイルユニット
#[derive(Debug, Clone, Default)]
pub struct CompileUnit {
    /// ソースファイル名
    pub name: String,
    pub ranges: Vec<Range<u64>>,
    pub functions: Vec<Arc<Function>>,
    /// ファイルスコープの変数（グローバル・静的）
    pub globals: Vec<Arc<Variable>>,
}

impl CompileUnit {
    /// 空のコンパイルユニットを作成する
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// 関数を追加する
    pub fn add_function(&mut self, function: Function) -> Arc<Function> {
        let function = Arc::new(function);
        self.functions.push(Arc::clone(&function));
        function
    }

    /// ファイルスコープの変数を追加する
    pub fn add_global(&mut self, variable: Variable) {
        self.globals.push(Arc::new(variable));
    }

    /// アドレスがこのユニットに含まれるか
    pub fn contains(&self, addr: u64) -> bool {
        if self.ranges.is_empty() {
            return self.functions.iter().any(|f| f.contains(addr));
        }
        self.ranges.iter().any(|r| r.contains(&addr))
    }

    /// アドレスを含む関数を探す
    pub fn function_at(&self, addr: u64) -> Option<Arc<Function>> {
        self.functions.iter().find(|f| f.contains(addr)).cloned()
    }
}

/// モジュール
#[derive(Debug)]
pub struct Module {
    name: String,
    path: Option<PathBuf>,
    /// ロードアドレス = ファイル内アドレス + load_bias
    load_bias: AtomicU64,
    /// コード領域（ファイル内アドレス）
    code_range: Range<u64>,
    is_pie: bool,
    symbols: SymbolResolver,
    compile_units: Vec<Arc<CompileUnit>>,
    line_table: LineTable,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn load_bias(&self) -> u64 {
        self.load_bias.load(Ordering::Acquire)
    }

    /// ロードバイアスを設定する（PIEの実行時ベースアドレス）
    pub fn set_load_bias(&self, bias: u64) {
        self.load_bias.store(bias, Ordering::Release);
    }

    /// PIE（Position Independent Executable）かどうか
    pub fn is_pie(&self) -> bool {
        self.is_pie
    }

    pub fn code_range(&self) -> Range<u64> {
        self.code_range.clone()
    }

    pub fn symbols(&self) -> &SymbolResolver {
        &self.symbols
    }

    pub fn compile_units(&self) -> &[Arc<CompileUnit>] {
        &self.compile_units
    }

    pub fn line_table(&self) -> &LineTable {
        &self.line_table
    }

    /// ロードアドレスをファイル内アドレスに変換する（モジュール外なら None）
    pub fn file_address(&self, load_addr: u64) -> Option<u64> {
        let file_addr = load_addr.checked_sub(self.load_bias())?;
        self.code_range.contains(&file_addr).then_some(file_addr)
    }

    /// ファイル内アドレスをロードアドレスに変換する
    pub fn load_address(&self, file_addr: u64) -> u64 {
        file_addr.wrapping_add(self.load_bias())
    }

    /// ファイル内アドレスを含むコンパイルユニット
    pub fn compile_unit_at(&self, file_addr: u64) -> Option<Arc<CompileUnit>> {
        self.compile_units.iter().find(|cu| cu.contains(file_addr)).cloned()
    }

    /// ファイル内アドレスを含む関数
    pub fn function_at(&self, file_addr: u64) -> Option<Arc<Function>> {
        self.compile_units
            .iter()
            .find_map(|cu| cu.function_at(file_addr))
    }

    /// 名前で関数を探す
    pub fn find_function(&self, name: &str) -> Option<Arc<Function>> {
        self.compile_units
            .iter()
            .flat_map(|cu| cu.functions.iter())
            .find(|f| f.name == name || f.mangled_name.as_deref() == Some(name))
            .cloned()
    }

    /// ファイル内アドレスのシンボルコンテキストを解決する
    pub fn resolve_file_address(self: &Arc<Self>, file_addr: u64, scope: SymbolContextItem) -> SymbolContext {
        let mut sc = SymbolContext::default();

        if scope.contains(SymbolContextItem::MODULE) {
            sc.module = Some(Arc::clone(self));
        }

        let needs_unit = SymbolContextItem::COMP_UNIT | SymbolContextItem::FUNCTION | SymbolContextItem::BLOCK;
        if scope.intersects(needs_unit) {
            let unit = self.compile_unit_at(file_addr);
            let function = unit
                .as_ref()
                .and_then(|cu| cu.function_at(file_addr))
                .or_else(|| self.function_at(file_addr));

            if scope.contains(SymbolContextItem::BLOCK) {
                sc.block = function
                    .clone()
                    .and_then(|f| BlockRef::deepest_at(f, file_addr));
            }
            if scope.contains(SymbolContextItem::FUNCTION) {
                sc.function = function;
            }
            if scope.contains(SymbolContextItem::COMP_UNIT) {
                sc.comp_unit = unit;
            }
        }

        if scope.contains(SymbolContextItem::LINE_ENTRY) {
            sc.line_entry = self.line_table.lookup(file_addr).cloned();
        }

        if scope.contains(SymbolContextItem::SYMBOL) {
            sc.symbol = self.symbols.reverse_resolve(file_addr);
        }

        sc
    }
}

/// モジュールを組み立てるビルダー
///
/// DWARFを持たないモジュールや、合成したモジュールの作成に使います。
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    name: String,
    path: Option<PathBuf>,
    load_bias: u64,
    is_pie: bool,
    code_range: Option<Range<u64>>,
    symbols: Vec<Symbol>,
    compile_units: Vec<CompileUnit>,
    lines: Vec<LineEntry>,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn load_bias(mut self, bias: u64) -> Self {
        self.load_bias = bias;
        self
    }

    pub fn pie(mut self, is_pie: bool) -> Self {
        self.is_pie = is_pie;
        self
    }

    /// コード領域を明示する（省略時はシンボルと関数の範囲から求める）
    pub fn code_range(mut self, range: Range<u64>) -> Self {
        self.code_range = Some(range);
        self
    }

    pub fn symbol(mut self, symbol: Symbol) -> Self {
        self.symbols.push(symbol);
        self
    }

    pub fn symbols(mut self, symbols: impl IntoIterator<Item = Symbol>) -> Self {
        self.symbols.extend(symbols);
        self
    }

    pub fn compile_unit(mut self, unit: CompileUnit) -> Self {
        self.compile_units.push(unit);
        self
    }

    pub fn line(mut self, entry: LineEntry) -> Self {
        self.lines.push(entry);
        self
    }

    pub fn lines(mut self, entries: impl IntoIterator<Item = LineEntry>) -> Self {
        self.lines.extend(entries);
        self
    }

    /// モジュールを作成する
    pub fn build(self) -> Module {
        let code_range = self.code_range.unwrap_or_else(|| {
            let symbol_ranges = self
                .symbols
                .iter()
                .map(|s| s.address..s.address.saturating_add(s.size.max(1)));
            let function_ranges = self
                .compile_units
                .iter()
                .flat_map(|cu| cu.functions.iter().map(|f| f.range.clone()));
            let unit_ranges = self.compile_units.iter().flat_map(|cu| cu.ranges.iter().cloned());

            symbol_ranges
                .chain(function_ranges)
                .chain(unit_ranges)
                .reduce(|a, b| a.start.min(b.start)..a.end.max(b.end))
                .unwrap_or(0..0)
        });

        Module {
            name: self.name,
            path: self.path,
            load_bias: AtomicU64::new(self.load_bias),
            code_range,
            is_pie: self.is_pie,
            symbols: SymbolResolver::from_symbols(self.symbols),
            compile_units: self.compile_units.into_iter().map(Arc::new).collect(),
            line_table: LineTable::new(self.lines),
        }
    }
}

/// ターゲットにロードされたモジュールの一覧
#[derive(Debug, Default, Clone)]
pub struct ModuleList {
    modules: Vec<Arc<Module>>,
}

impl ModuleList {
    pub fn new() -> Self {
        Self::default()
    }

    /// モジュールを追加する
    pub fn add(&mut self, module: Arc<Module>) {
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Module>> {
        self.modules.iter()
    }

    /// 名前でモジュールを探す
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    /// ロードアドレスを含むモジュール
    pub fn module_for_load_address(&self, load_addr: u64) -> Option<Arc<Module>> {
        self.modules
            .iter()
            .find(|m| m.file_address(load_addr).is_some())
            .cloned()
    }

    /// ロードアドレスのシンボルコンテキストを解決する
    pub fn resolve(&self, load_addr: u64, scope: SymbolContextItem) -> SymbolContext {
        let module = match self.module_for_load_address(load_addr) {
            Some(module) => module,
            None => return SymbolContext::default(),
        };
        match module.file_address(load_addr) {
            Some(file_addr) => module.resolve_file_address(file_addr, scope),
            None => SymbolContext::default(),
        }
    }

    /// すべてのモジュールからシンボルを検索する
    pub fn find_symbols(&self, pattern: &str) -> Vec<(Arc<Module>, Symbol)> {
        self.modules
            .iter()
            .flat_map(|m| {
                m.symbols()
                    .find_symbols(pattern)
                    .into_iter()
                    .map(move |s| (Arc::clone(m), s))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameBase, TypeInfo, ValueType, VariableLocation};

    fn sample_module(bias: u64) -> Arc<Module> {
        let mut unit = CompileUnit::new("src/main.rs");
        unit.add_function(Function::new("main", 0x1000..0x1040, FrameBase::Cfa));
        unit.add_global(Variable::new(
            "COUNTER",
            TypeInfo::primitive("u32", 4),
            ValueType::VariableGlobal,
            VariableLocation::Address(0x4000),
        ));

        Arc::new(
            ModuleBuilder::new("app")
                .load_bias(bias)
                .symbol(Symbol::new("main", 0x1000, 0x40))
                .compile_unit(unit)
                .line(LineEntry {
                    address: 0x1000,
                    size: 0x20,
                    file: "src/main.rs".to_string(),
                    line: 3,
                    column: Some(5),
                })
                .build(),
        )
    }

    #[test]
    fn test_code_range_from_contents() {
        let module = sample_module(0);
        assert_eq!(module.code_range(), 0x1000..0x1040);
    }

    #[test]
    fn test_address_translation() {
        let module = sample_module(0x5555_0000);
        assert_eq!(module.file_address(0x5555_1010), Some(0x1010));
        assert_eq!(module.file_address(0x1010), None);
        assert_eq!(module.load_address(0x1010), 0x5555_1010);

        module.set_load_bias(0);
        assert_eq!(module.file_address(0x1010), Some(0x1010));
    }

    #[test]
    fn test_resolve_scope() {
        let mut list = ModuleList::new();
        list.add(sample_module(0));

        let sc = list.resolve(0x1010, SymbolContextItem::EVERYTHING);
        assert_eq!(sc.module.as_ref().map(|m| m.name().to_string()), Some("app".to_string()));
        assert_eq!(sc.comp_unit.as_ref().map(|cu| cu.name.clone()), Some("src/main.rs".to_string()));
        assert_eq!(sc.function.as_ref().map(|f| f.name.clone()), Some("main".to_string()));
        assert_eq!(sc.block.as_ref().map(|b| b.id()), Some(0));
        assert_eq!(sc.line_entry.as_ref().map(|l| l.line), Some(3));
        assert_eq!(sc.symbol.as_ref().map(|s| s.name.clone()), Some("main".to_string()));

        let only_line = list.resolve(0x1010, SymbolContextItem::LINE_ENTRY);
        assert!(only_line.module.is_none());
        assert!(only_line.function.is_none());
        assert!(only_line.line_entry.is_some());

        assert!(list.resolve(0x9000, SymbolContextItem::EVERYTHING).is_empty());
    }

    #[test]
    fn test_find_symbols_across_modules() {
        let mut list = ModuleList::new();
        list.add(sample_module(0));
        let found = list.find_symbols("mai");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1.address, 0x1000);
        assert!(list.find_by_name("app").is_some());
    }
}
