//! 変数パスと式の評価エラー

use thiserror::Error;

/// フレームに接続されていない場合の説明
pub const NO_VALUE: &str = "No value";

/// 変数パス・式の評価エラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("use of undeclared identifier '{0}'")]
    UndeclaredIdentifier(String),

    #[error("no register named '{0}'")]
    UnknownRegister(String),

    #[error("no result variable named '{0}'")]
    UnknownResult(String),

    #[error("'{0}' is not a variable path")]
    NotAVariablePath(String),

    #[error("\"{base}\" is a pointer and . was used to access \"{field}\"; did you mean \"{base}->{field}\"?")]
    PointerMemberAccess { base: String, field: String },

    #[error("\"{base}\" is not a pointer and -> was used to access \"{field}\"; did you mean \"{base}.{field}\"?")]
    NotAPointer { base: String, field: String },

    #[error("no member named '{field}' in '{type_name}'")]
    NoMember { field: String, type_name: String },

    #[error("index {index} is out of bounds for '{type_name}'")]
    IndexOutOfBounds { index: u64, type_name: String },

    #[error("'{0}' cannot be subscripted")]
    NotIndexable(String),

    #[error("cannot dereference '{0}'")]
    NotDereferenceable(String),

    #[error("cannot take the address of '{0}'")]
    NoAddress(String),

    #[error("{name}: {reason}")]
    Unavailable { name: String, reason: String },
}
