//! 逆アセンブル機能
//!
//! フレームを含む関数（またはシンボル）のバイト列を逆アセンブルします。

use crate::Result;
use capstone::prelude::*;
use framekit_symbols::{MemoryReader, SymbolContextItem};
use framekit_target::{DisassemblySyntax, StackFrame, Target};
use std::fmt::Write as _;
use std::ops::Range;

/// 逆アセンブルした1命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: u64,
    pub bytes: Vec<u8>,
    pub mnemonic: String,
    pub operands: String,
}

/// バイト列を逆アセンブルする
///
/// # Arguments
/// * `code` - 命令のバイト列
/// * `base_addr` - 先頭のアドレス
/// * `syntax` - 出力する構文
pub fn disassemble_bytes(code: &[u8], base_addr: u64, syntax: DisassemblySyntax) -> Result<Vec<Instruction>> {
    let cs_syntax = match syntax {
        DisassemblySyntax::Intel => arch::x86::ArchSyntax::Intel,
        DisassemblySyntax::Att => arch::x86::ArchSyntax::Att,
    };
    let cs = Capstone::new()
        .x86()
        .mode(arch::x86::ArchMode::Mode64)
        .syntax(cs_syntax)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create Capstone: {}", e))?;

    let insns = cs
        .disasm_all(code, base_addr)
        .map_err(|e| anyhow::anyhow!("Failed to disassemble: {}", e))?;

    Ok(insns
        .as_ref()
        .iter()
        .map(|insn| Instruction {
            address: insn.address(),
            bytes: insn.bytes().to_vec(),
            mnemonic: insn.mnemonic().unwrap_or("").to_string(),
            operands: insn.op_str().unwrap_or("").to_string(),
        })
        .collect())
}

/// 逆アセンブルする範囲（ロードアドレス）と見出し
fn frame_range(frame: &StackFrame, target: &Target) -> (Range<u64>, String) {
    let sc = frame.symbol_context(SymbolContextItem::MODULE | SymbolContextItem::FUNCTION | SymbolContextItem::SYMBOL);

    if let Some(module) = &sc.module {
        let bias = module.load_bias();
        if let Some(function) = &sc.function {
            let range = function.range.start.wrapping_add(bias)..function.range.end.wrapping_add(bias);
            return (range, format!("{}`{}", module.name(), function.name));
        }
        if let Some(symbol) = sc.symbol.as_ref().filter(|s| s.size > 0) {
            let start = symbol.address.wrapping_add(bias);
            return (start..start + symbol.size, format!("{}`{}", module.name(), symbol.display_name()));
        }
    }

    let pc = frame.pc();
    let window = target.settings().disassembly_window as u64;
    (pc..pc.saturating_add(window), format!("0x{:x}", pc))
}

/// フレームの関数を逆アセンブルし、表示用の文字列を返す
///
/// 現在のpcの行には `->` を付けます。
pub fn disassemble_frame(frame: &StackFrame, target: &Target) -> Result<String> {
    let (range, title) = frame_range(frame, target);
    let size = range.end.saturating_sub(range.start) as usize;
    let code = target.memory().read(range.start, size)?;
    let insns = disassemble_bytes(&code, range.start, target.settings().disassembly_syntax)?;

    let pc = frame.pc();
    let mut out = format!("{}:\n", title);
    for insn in &insns {
        let marker = if insn.address == pc { "->" } else { "  " };
        let _ = writeln!(out, "{} 0x{:016x}: {:<8} {}", marker, insn.address, insn.mnemonic, insn.operands);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // mov rax, 1; ret
    const CODE: &[u8] = &[0x48, 0xc7, 0xc0, 0x01, 0x00, 0x00, 0x00, 0xc3];

    #[test]
    fn test_disassemble_intel() {
        let insns = disassemble_bytes(CODE, 0x1000, DisassemblySyntax::Intel).unwrap();
        assert_eq!(insns.len(), 2);
        assert_eq!(insns[0].mnemonic, "mov");
        assert_eq!(insns[0].operands, "rax, 1");
        assert_eq!(insns[1].address, 0x1007);
        assert_eq!(insns[1].mnemonic, "ret");
    }

    #[test]
    fn test_disassemble_att() {
        let insns = disassemble_bytes(CODE, 0x1000, DisassemblySyntax::Att).unwrap();
        assert!(insns[0].operands.contains("%rax"));
    }
}
