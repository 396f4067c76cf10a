//! ロードアドレスとその所属

use framekit_symbols::{Module, Symbol, SymbolContextItem};
use framekit_target::Target;
use std::fmt;
use std::sync::Arc;

/// ターゲット上のアドレス
///
/// 所属するモジュールとシンボルが分かればそれも持ちます。
#[derive(Debug, Clone, Default)]
pub struct Address {
    load_addr: Option<u64>,
    module: Option<Arc<Module>>,
    symbol: Option<Symbol>,
}

impl Address {
    /// 無効なアドレス
    pub fn invalid() -> Self {
        Self::default()
    }

    /// ロードアドレスを解決して作成する
    pub fn resolve(target: &Target, load_addr: u64) -> Self {
        let sc = target.resolve_load_address(load_addr, SymbolContextItem::MODULE | SymbolContextItem::SYMBOL);
        Self {
            load_addr: Some(load_addr),
            module: sc.module,
            symbol: sc.symbol,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.load_addr.is_some()
    }

    /// ロードアドレス（無効なら None）
    pub fn load_address(&self) -> Option<u64> {
        self.load_addr
    }

    /// モジュール内のファイルアドレス
    pub fn file_address(&self) -> Option<u64> {
        self.module.as_ref()?.file_address(self.load_addr?)
    }

    pub fn module(&self) -> Option<&Arc<Module>> {
        self.module.as_ref()
    }

    pub fn symbol(&self) -> Option<&Symbol> {
        self.symbol.as_ref()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(load_addr) = self.load_addr else {
            return f.write_str("<invalid address>");
        };
        write!(f, "0x{:016x}", load_addr)?;

        if let (Some(symbol), Some(file_addr)) = (&self.symbol, self.file_address()) {
            let module = self.module.as_ref().map(|m| m.name()).unwrap_or("?");
            write!(f, " {}`{}", module, symbol.display_name())?;
            let offset = file_addr.saturating_sub(symbol.address);
            if offset > 0 {
                write!(f, " + {}", offset)?;
            }
        }
        Ok(())
    }
}
