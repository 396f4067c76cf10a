//! framekit 実行ターゲット
//!
//! このクレートは、デバッグ対象の実行状態のモデルを提供します。
//! ターゲット（APIロック、スレッド、モジュール、メモリ）、スレッドとスタックフレーム、
//! レジスタ、フレームポインタによるアンワインド、ptraceによるプロセス制御を扱います。

pub mod frame;
pub mod memory;
pub mod process;
pub mod registers;
pub mod target;
pub mod thread;
pub mod unwind;

pub use frame::{FrameSpec, StackFrame, StackId};
pub use memory::{Memory, MemoryMapping};
pub use process::{Process, StopReason};
pub use registers::{RegisterContext, RegisterInfo, RegisterSetInfo, REGISTERS, REGISTER_SETS};
pub use target::{DisassemblySyntax, PersistentVariable, Target, TargetSettings};
pub use thread::{Thread, ThreadId};
pub use unwind::unwind_frame_pointers;

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
