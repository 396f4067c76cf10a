//! パース関連のユーティリティ関数

use anyhow::Result;

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート
///
/// # Examples
/// ```
/// use framekit_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();
    parse_integer(s).ok_or_else(|| anyhow::anyhow!("Invalid address '{}'", s))
}

/// 整数リテラルをパースする（0x は16進数、それ以外は10進数）
pub fn parse_integer(s: &str) -> Option<u64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse::<u64>().ok(),
    }
}

/// フレーム番号をパースする
pub fn parse_frame_index(s: &str) -> Result<u32> {
    s.trim()
        .parse::<u32>()
        .map_err(|e| anyhow::anyhow!("Invalid frame index '{}': {}", s.trim(), e))
}
