//! framekit デバッガのコア機能
//!
//! このクレートは、スタックフレームを扱う公開APIを提供します。
//! `Frame` ハンドルはフレームが作り直されても同一性で追従し、
//! 解決できない場合は各操作が空の値を返します。

pub mod address;
pub mod command;
pub mod debugger;
pub mod disasm;
pub mod errors;
pub mod execution_context;
pub mod expr_eval;
pub mod frame;
pub mod parse;
pub mod thread;
pub mod value;

pub use address::Address;
pub use command::Command;
pub use debugger::Debugger;
pub use errors::{EvalError, NO_VALUE};
pub use execution_context::ExecutionContext;
pub use frame::{Frame, API_LOG, EXPR_LOG, INVALID_ADDRESS, INVALID_FRAME_ID};
pub use thread::ThreadRef;
pub use value::{Value, ValueList};

// 他のクレートから使用するために再エクスポート
pub use framekit_symbols::{Symbol, SymbolContext, SymbolContextItem, ValueType};
pub use framekit_target::{DisassemblySyntax, StackId, StopReason, TargetSettings};

/// デバッガの結果型
pub type Result<T> = anyhow::Result<T>;
