//! framekit シンボル情報
//!
//! このクレートは、ELFファイルとDWARFデバッグ情報からモジュールを構築します。
//! シンボル名の解決、アドレスからソース行・関数・ブロックへの変換、
//! 変数と型の情報を提供します。

pub mod context;
pub mod function;
pub mod lines;
pub mod loader;
pub mod memory;
pub mod module;
pub mod symbols;
pub mod type_info;
pub mod variables;

pub use context::{SymbolContext, SymbolContextItem};
pub use function::{Block, BlockId, BlockRef, FrameBase, Function, InlineInfo, FUNCTION_BLOCK};
pub use lines::{LineEntry, LineTable};
pub use loader::DwarfLoader;
pub use memory::{MemoryMap, MemoryReader, NoMemory};
pub use module::{CompileUnit, Module, ModuleBuilder, ModuleList};
pub use symbols::{demangle_symbol, object_symbols, Symbol, SymbolResolver};
pub use type_info::{FieldInfo, TypeInfo, TypeInfoExtractor, VariantInfo, POINTER_SIZE};
pub use variables::{location_from_attr, ValueType, Variable, VariableLocation};

/// シンボル情報の結果型
pub type Result<T> = anyhow::Result<T>;
