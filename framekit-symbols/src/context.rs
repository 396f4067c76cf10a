//! シンボルコンテキスト
//!
//! アドレスに対応するモジュール、コンパイルユニット、関数、ブロック、
//! 行情報、シンボルをまとめたもの。

use crate::{BlockRef, CompileUnit, Function, LineEntry, Module, Symbol};
use std::ops::BitOr;
use std::sync::Arc;

/// 解決するシンボルコンテキストの要素（ビット集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolContextItem(u32);

impl SymbolContextItem {
    pub const NONE: Self = Self(0);
    pub const MODULE: Self = Self(1 << 0);
    pub const COMP_UNIT: Self = Self(1 << 1);
    pub const FUNCTION: Self = Self(1 << 2);
    pub const BLOCK: Self = Self(1 << 3);
    pub const LINE_ENTRY: Self = Self(1 << 4);
    pub const SYMBOL: Self = Self(1 << 5);
    pub const EVERYTHING: Self = Self(0x3f);

    /// ビット値から作成する（未定義のビットは無視）
    pub fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::EVERYTHING.0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// `other` のビットをすべて含むか
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// `other` のビットを1つでも含むか
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for SymbolContextItem {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// シンボルコンテキスト
///
/// 要求された要素だけが埋まります。
#[derive(Debug, Clone, Default)]
pub struct SymbolContext {
    pub module: Option<Arc<Module>>,
    pub comp_unit: Option<Arc<CompileUnit>>,
    pub function: Option<Arc<Function>>,
    pub block: Option<BlockRef>,
    pub symbol: Option<Symbol>,
    pub line_entry: Option<LineEntry>,
}

impl SymbolContext {
    /// 何も解決されていないか
    pub fn is_empty(&self) -> bool {
        self.module.is_none()
            && self.comp_unit.is_none()
            && self.function.is_none()
            && self.block.is_none()
            && self.symbol.is_none()
            && self.line_entry.is_none()
    }

    /// 指定された要素だけを残したコピーを返す
    pub fn filtered(&self, scope: SymbolContextItem) -> Self {
        let pick = |item: SymbolContextItem| scope.contains(item);
        Self {
            module: self.module.clone().filter(|_| pick(SymbolContextItem::MODULE)),
            comp_unit: self.comp_unit.clone().filter(|_| pick(SymbolContextItem::COMP_UNIT)),
            function: self.function.clone().filter(|_| pick(SymbolContextItem::FUNCTION)),
            block: self.block.clone().filter(|_| pick(SymbolContextItem::BLOCK)),
            symbol: self.symbol.clone().filter(|_| pick(SymbolContextItem::SYMBOL)),
            line_entry: self.line_entry.clone().filter(|_| pick(SymbolContextItem::LINE_ENTRY)),
        }
    }
}
