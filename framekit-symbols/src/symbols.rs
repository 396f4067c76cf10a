//! シンボル解決機能

use std::collections::HashMap;
use object::{Object, ObjectSymbol, SymbolKind};

/// シンボル情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（可読な形式）
    pub demangled_name: String,
    /// ファイル内アドレス
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: impl Into<String>, address: u64, size: u64) -> Self {
        let name = name.into();
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
        }
    }

    /// 表示用の名前を取得（デマングル可能ならデマングル後、できなければマングル名）
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }

    /// アドレスがシンボルの範囲内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.address && addr < self.address.saturating_add(self.size)
    }
}

/// シンボル名をデマングルする
pub fn demangle_symbol(name: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }

    // 現時点ではRustのみサポート
    name.to_string()
}

/// objectファイルのシンボルテーブルから関数・データシンボルを読み取る
pub fn object_symbols(object_file: &object::File<'_>) -> Vec<Symbol> {
    object_file
        .symbols()
        .filter(|symbol| matches!(symbol.kind(), SymbolKind::Text | SymbolKind::Data))
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            Some(Symbol::new(name, symbol.address(), symbol.size()))
        })
        .collect()
}

/// シンボル解決
#[derive(Debug, Default)]
pub struct SymbolResolver {
    /// シンボル名 -> symbols_by_address のインデックス
    symbols_by_name: HashMap<String, usize>,
    /// アドレス順にソートされたシンボル
    symbols_by_address: Vec<Symbol>,
}

impl SymbolResolver {
    /// シンボルの一覧からシンボル解決を作成する
    pub fn from_symbols(mut symbols: Vec<Symbol>) -> Self {
        symbols.retain(|s| !s.name.is_empty());
        symbols.sort_by_key(|s| s.address);

        let symbols_by_name = symbols
            .iter()
            .enumerate()
            .map(|(idx, s)| (s.name.clone(), idx))
            .collect();

        Self {
            symbols_by_name,
            symbols_by_address: symbols,
        }
    }

    /// objectファイルのシンボルテーブルからシンボル解決を作成する
    pub fn from_object(object_file: &object::File<'_>) -> Self {
        Self::from_symbols(object_symbols(object_file))
    }

    /// シンボル名からアドレスを解決する
    pub fn resolve(&self, symbol: &str) -> Option<u64> {
        self.symbols_by_name
            .get(symbol)
            .map(|&idx| self.symbols_by_address[idx].address)
    }

    /// アドレスからシンボル名を解決する（最も近いシンボルを返す）
    pub fn reverse_resolve(&self, addr: u64) -> Option<Symbol> {
        match self.symbols_by_address.binary_search_by_key(&addr, |s| s.address) {
            Ok(idx) => Some(self.symbols_by_address[idx].clone()),
            Err(0) => None,
            Err(idx) => {
                let sym = &self.symbols_by_address[idx - 1];
                if sym.size == 0 || sym.contains(addr) {
                    // サイズ情報がない場合は単純に最も近いシンボルを返す
                    Some(sym.clone())
                } else {
                    None
                }
            }
        }
    }

    /// すべてのシンボルを取得する
    pub fn all_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols_by_address.iter()
    }

    /// シンボルの数
    pub fn len(&self) -> usize {
        self.symbols_by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols_by_address.is_empty()
    }

    /// パターンにマッチするシンボルを検索する
    /// マングル名とデマングル名の両方で検索する
    pub fn find_symbols(&self, pattern: &str) -> Vec<Symbol> {
        self.symbols_by_address
            .iter()
            .filter(|s| s.name.contains(pattern) || s.demangled_name.contains(pattern))
            .cloned()
            .collect()
    }
}
