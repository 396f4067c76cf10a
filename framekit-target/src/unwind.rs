//! フレームポインタによるスタックのアンワインド
//!
//! `rbp` チェーンをたどります。各フレームで `[fp]` が呼び出し元の `rbp`、
//! `[fp + 8]` が戻りアドレス、`fp + 16` がCFAです。

use crate::{FrameSpec, RegisterContext};
use framekit_symbols::MemoryReader;

const WORD: u64 = 8;

/// フレーム0のレジスタから呼び出し元へ順にフレームを求める
///
/// 読み取りに失敗した時点、またはフレームポインタが単調増加しなくなった時点で止まります。
pub fn unwind_frame_pointers(memory: &dyn MemoryReader, registers: RegisterContext, max_frames: usize) -> Vec<FrameSpec> {
    let mut frames = Vec::new();
    if max_frames == 0 {
        return frames;
    }

    let (Some(pc), Some(mut fp)) = (registers.pc(), registers.fp()) else {
        return frames;
    };

    frames.push(FrameSpec::new(pc, fp.wrapping_add(2 * WORD), registers));

    while frames.len() < max_frames && fp != 0 {
        let return_address = match memory.read_u64(fp + WORD) {
            Ok(addr) => addr,
            Err(e) => {
                tracing::trace!(fp = format_args!("{:#x}", fp), "stopped unwinding: {}", e);
                break;
            }
        };
        let caller_fp = match memory.read_u64(fp) {
            Ok(value) => value,
            Err(e) => {
                tracing::trace!(fp = format_args!("{:#x}", fp), "stopped unwinding: {}", e);
                break;
            }
        };

        if return_address == 0 {
            break;
        }

        let caller_sp = fp + 2 * WORD;
        // 呼び出し元の rbp が不明な最外フレームでも、戻りアドレスのフレームは記録する
        let cfa = if caller_fp > fp {
            caller_fp + 2 * WORD
        } else {
            caller_sp
        };
        let caller = RegisterContext::with_pc_sp_fp(return_address, caller_sp, caller_fp);
        frames.push(FrameSpec::new(return_address, cfa, caller));

        if caller_fp <= fp {
            break;
        }
        fp = caller_fp;
    }

    tracing::debug!(frames = frames.len(), "unwound stack");
    frames
}
