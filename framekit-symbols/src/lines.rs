//! ソース行情報

use std::fmt;

/// ソース行情報（行テーブルの1行）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
    /// 行の開始アドレス（ファイル内アドレス）
    pub address: u64,
    /// この行が占めるバイト数
    pub size: u64,
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

impl LineEntry {
    /// アドレスがこの行の範囲内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.address && addr < self.address.saturating_add(self.size)
    }
}

impl fmt::Display for LineEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)?;
        if let Some(column) = self.column {
            write!(f, ":{}", column)?;
        }
        Ok(())
    }
}

/// アドレス順の行テーブル
#[derive(Debug, Clone, Default)]
pub struct LineTable {
    entries: Vec<LineEntry>,
}

impl LineTable {
    /// 行の一覧から行テーブルを作成する
    pub fn new(mut entries: Vec<LineEntry>) -> Self {
        entries.sort_by_key(|e| e.address);
        Self { entries }
    }

    /// アドレスを含む行を検索する
    pub fn lookup(&self, addr: u64) -> Option<&LineEntry> {
        let idx = match self.entries.binary_search_by_key(&addr, |e| e.address) {
            Ok(idx) => idx,
            Err(0) => return None,
            Err(idx) => idx - 1,
        };
        let entry = &self.entries[idx];
        entry.contains(addr).then_some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LineEntry] {
        &self.entries
    }
}
