//! 変数情報とロケーション

use crate::function::BlockId;
use crate::TypeInfo;
use gimli::Reader;
use std::fmt;

/// 値の種類（変数のスコープ、レジスタ、式の結果）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Invalid,
    /// グローバル変数
    VariableGlobal,
    /// 静的変数
    VariableStatic,
    /// 関数の引数
    VariableArgument,
    /// ローカル変数
    VariableLocal,
    /// フレームのレジスタ値
    Register,
    /// レジスタセット
    RegisterSet,
    /// 式評価の結果（$0, $1, ...）
    ConstResult,
}

impl ValueType {
    /// 変数のスコープを表す種類か
    pub fn is_variable(self) -> bool {
        matches!(
            self,
            ValueType::VariableGlobal
                | ValueType::VariableStatic
                | ValueType::VariableArgument
                | ValueType::VariableLocal
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Invalid => "invalid",
            ValueType::VariableGlobal => "global",
            ValueType::VariableStatic => "static",
            ValueType::VariableArgument => "argument",
            ValueType::VariableLocal => "local",
            ValueType::Register => "register",
            ValueType::RegisterSet => "register-set",
            ValueType::ConstResult => "result",
        };
        f.write_str(s)
    }
}

/// 変数のロケーション
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableLocation {
    /// フレームベースからのオフセット
    FrameOffset(i64),
    /// レジスタ（DWARFレジスタ番号）
    Register(u16),
    /// 静的アドレス（ファイル内アドレス）
    Address(u64),
    /// 最適化により削除された
    OptimizedOut,
    /// 不明
    Unknown,
}

/// 変数情報
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub type_info: TypeInfo,
    pub scope: ValueType,
    pub location: VariableLocation,
    /// 変数が宣言されたブロック（グローバル・静的変数は None）
    pub declared_in: Option<BlockId>,
}

impl Variable {
    /// 変数を作成する
    pub fn new(name: impl Into<String>, type_info: TypeInfo, scope: ValueType, location: VariableLocation) -> Self {
        Self {
            name: name.into(),
            type_info,
            scope,
            location,
            declared_in: None,
        }
    }

    /// 型名
    pub fn type_name(&self) -> String {
        self.type_info.name()
    }
}

/// DW_AT_location からロケーションを求める（単一オペレーションの式のみ）
pub fn location_from_attr<R: Reader>(attr: Option<gimli::AttributeValue<R>>) -> VariableLocation {
    let attr = match attr {
        Some(attr) => attr,
        None => return VariableLocation::OptimizedOut,
    };

    let mut data = match attr {
        gimli::AttributeValue::Exprloc(expr) => expr.0,
        // ロケーションリストは評価しない
        _ => return VariableLocation::Unknown,
    };

    let op = match data.read_u8() {
        Ok(op) => op,
        Err(_) => return VariableLocation::Unknown,
    };

    match op {
        // DW_OP_fbreg: フレームベースからのオフセット
        op if op == gimli::constants::DW_OP_fbreg.0 => match data.read_sleb128() {
            Ok(offset) => VariableLocation::FrameOffset(offset),
            Err(_) => VariableLocation::Unknown,
        },
        // DW_OP_addr: 静的アドレス
        op if op == gimli::constants::DW_OP_addr.0 => match data.read_u64() {
            Ok(addr) => VariableLocation::Address(addr),
            Err(_) => VariableLocation::Unknown,
        },
        // DW_OP_regN: レジスタ
        op if (gimli::constants::DW_OP_reg0.0..=gimli::constants::DW_OP_reg31.0).contains(&op) => {
            VariableLocation::Register((op - gimli::constants::DW_OP_reg0.0) as u16)
        }
        _ => VariableLocation::Unknown,
    }
}
