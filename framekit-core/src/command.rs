//! デバッガコマンド

use crate::parse::{parse_address, parse_frame_index};

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// バックトレース表示
    Backtrace,
    /// フレームを選択
    Frame(u32),
    /// 選択中のフレームの情報
    Info,
    /// レジスタ表示（セット名または省略）
    Registers(Option<String>),
    /// 引数とローカル変数表示
    Locals,
    /// グローバル・静的変数を含むすべての変数表示
    Vars,
    /// 式の評価
    Print(String),
    /// 変数パスの値
    Path(String),
    /// 逆アセンブル
    Disassemble,
    /// pcを書き換える
    SetPc(u64),
    /// 実行継続
    Continue,
    /// 実行中のプロセスを停止
    Interrupt,
    /// シンボル検索
    Find(String),
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let (name, rest) = match input.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (input, ""),
        };

        match name {
            "backtrace" | "bt" => Some(Command::Backtrace),
            "frame" | "f" => parse_frame_index(rest).ok().map(Command::Frame),
            "info" | "i" => Some(Command::Info),
            "registers" | "reg" => Some(Command::Registers((!rest.is_empty()).then(|| rest.to_string()))),
            "locals" | "l" => Some(Command::Locals),
            "vars" | "v" => Some(Command::Vars),
            "print" | "p" if !rest.is_empty() => Some(Command::Print(rest.to_string())),
            "path" if !rest.is_empty() => Some(Command::Path(rest.to_string())),
            "disassemble" | "disas" => Some(Command::Disassemble),
            "set-pc" => parse_address(rest).ok().map(Command::SetPc),
            "continue" | "c" => Some(Command::Continue),
            "interrupt" => Some(Command::Interrupt),
            "find" if !rest.is_empty() => Some(Command::Find(rest.to_string())),
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("continue"), Some(Command::Continue));
        assert_eq!(Command::parse("c"), Some(Command::Continue));
        assert_eq!(Command::parse("bt"), Some(Command::Backtrace));
        assert_eq!(Command::parse("  quit  "), Some(Command::Quit));
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("step"), None);
    }

    #[test]
    fn test_parse_arguments() {
        assert_eq!(Command::parse("frame 2"), Some(Command::Frame(2)));
        assert_eq!(Command::parse("frame"), None);
        assert_eq!(Command::parse("registers"), Some(Command::Registers(None)));
        assert_eq!(Command::parse("reg gpr"), Some(Command::Registers(Some("gpr".to_string()))));
        assert_eq!(Command::parse("p point.x + 1"), Some(Command::Print("point.x + 1".to_string())));
        assert_eq!(Command::parse("print"), None);
        assert_eq!(Command::parse("path list->head"), Some(Command::Path("list->head".to_string())));
        assert_eq!(Command::parse("set-pc 0x401000"), Some(Command::SetPc(0x401000)));
        assert_eq!(Command::parse("set-pc nowhere"), None);
        assert_eq!(Command::parse("find main"), Some(Command::Find("main".to_string())));
    }
}
