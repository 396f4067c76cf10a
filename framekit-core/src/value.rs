//! 値と値のリスト
//!
//! 変数、レジスタ、式の結果を型情報つきで表します。
//! フレームに接続されていない場合は空の値になり、評価に失敗した場合はエラーを持つ値になります。

use crate::errors::NO_VALUE;
use framekit_symbols::{
    MemoryReader, SymbolContextItem, TypeInfo, ValueType, Variable, VariableLocation, POINTER_SIZE,
};
use framekit_target::{StackFrame, Target};
use std::fmt;
use std::sync::Arc;

/// &str の文字列を読み取る長さの上限
const MAX_STR_LEN: u64 = 1024;

/// メモリから一度に読み取る値の大きさの上限
const MAX_VALUE_SIZE: u64 = 16 * 1024 * 1024;

/// 値
#[derive(Clone, Default)]
pub struct Value {
    inner: Option<Arc<ValueObject>>,
    error: Option<String>,
}

struct ValueObject {
    name: String,
    type_info: TypeInfo,
    value_type: ValueType,
    /// ターゲット上のロードアドレス（レジスタや定数の結果は None）
    address: Option<u64>,
    contents: Contents,
    memory: Arc<dyn MemoryReader>,
    max_children: usize,
}

enum Contents {
    Data(Vec<u8>),
    /// レジスタセット
    Children(Vec<Value>),
    /// 読み取れなかった値（理由）
    Unavailable(String),
}

impl Value {
    /// 空の値
    pub fn empty() -> Self {
        Self::default()
    }

    /// エラーだけを持つ値
    pub fn from_error(error: impl fmt::Display) -> Self {
        Self {
            inner: None,
            error: Some(error.to_string()),
        }
    }

    fn from_object(object: ValueObject) -> Self {
        Self {
            inner: Some(Arc::new(object)),
            error: None,
        }
    }

    /// バイト列から値を作成する
    pub fn from_data(
        name: impl Into<String>,
        type_info: TypeInfo,
        value_type: ValueType,
        address: Option<u64>,
        data: Vec<u8>,
        memory: Arc<dyn MemoryReader>,
        max_children: usize,
    ) -> Self {
        Self::from_object(ValueObject {
            name: name.into(),
            type_info,
            value_type,
            address,
            contents: Contents::Data(data),
            memory,
            max_children,
        })
    }

    /// メモリから読み取って値を作成する
    ///
    /// 読み取りに失敗した場合は、理由を持つ読み取り不能な値になります。
    pub fn load(
        name: impl Into<String>,
        type_info: TypeInfo,
        value_type: ValueType,
        address: u64,
        memory: Arc<dyn MemoryReader>,
        max_children: usize,
    ) -> Self {
        let size = type_info.size();
        let contents = if size > MAX_VALUE_SIZE {
            Contents::Unavailable(format!("value of {} bytes is too large to read", size))
        } else {
            match memory.read(address, size as usize) {
                Ok(data) => Contents::Data(data),
                Err(e) => Contents::Unavailable(e.to_string()),
            }
        };
        Self::from_object(ValueObject {
            name: name.into(),
            type_info,
            value_type,
            address: Some(address),
            contents,
            memory,
            max_children,
        })
    }

    /// 読み取れない値（最適化で消えた変数など）
    pub fn unavailable(
        name: impl Into<String>,
        type_info: TypeInfo,
        value_type: ValueType,
        reason: impl Into<String>,
        memory: Arc<dyn MemoryReader>,
    ) -> Self {
        Self::from_object(ValueObject {
            name: name.into(),
            type_info,
            value_type,
            address: None,
            contents: Contents::Unavailable(reason.into()),
            memory,
            max_children: 0,
        })
    }

    /// レジスタの値
    pub fn register(name: impl Into<String>, size: u64, raw: u64, memory: Arc<dyn MemoryReader>) -> Self {
        let data = raw.to_le_bytes()[..size.min(8) as usize].to_vec();
        Self::from_data(
            name,
            TypeInfo::primitive(&format!("u{}", size * 8), size),
            ValueType::Register,
            None,
            data,
            memory,
            0,
        )
    }

    /// レジスタセットの値
    pub fn register_set(name: impl Into<String>, registers: Vec<Value>, memory: Arc<dyn MemoryReader>) -> Self {
        let max_children = registers.len();
        Self::from_object(ValueObject {
            name: name.into(),
            type_info: TypeInfo::Unknown,
            value_type: ValueType::RegisterSet,
            address: None,
            contents: Contents::Children(registers),
            memory,
            max_children,
        })
    }

    /// フレームの変数の値
    ///
    /// 変数のロケーションに従ってメモリまたはレジスタから読み取ります。
    pub fn from_variable(frame: &StackFrame, target: &Target, var: &Variable) -> Self {
        let memory = target.memory();
        let max_children = target.settings().max_children;

        match &var.location {
            VariableLocation::FrameOffset(offset) => match frame.frame_base() {
                Some(base) => Value::load(
                    var.name.clone(),
                    var.type_info.clone(),
                    var.scope,
                    base.wrapping_add_signed(*offset),
                    memory,
                    max_children,
                ),
                None => Value::unavailable(
                    var.name.clone(),
                    var.type_info.clone(),
                    var.scope,
                    "frame base unavailable",
                    memory,
                ),
            },
            VariableLocation::Register(regnum) => match frame.registers().read_dwarf(*regnum) {
                Some(raw) => {
                    let size = (var.type_info.size() as usize).min(8);
                    Value::from_data(
                        var.name.clone(),
                        var.type_info.clone(),
                        var.scope,
                        None,
                        raw.to_le_bytes()[..size].to_vec(),
                        memory,
                        max_children,
                    )
                }
                None => Value::unavailable(
                    var.name.clone(),
                    var.type_info.clone(),
                    var.scope,
                    format!("register {} unavailable in this frame", regnum),
                    memory,
                ),
            },
            VariableLocation::Address(file_addr) => {
                let load_addr = frame
                    .symbol_context(SymbolContextItem::MODULE)
                    .module
                    .map(|m| m.load_address(*file_addr))
                    .unwrap_or(*file_addr);
                Value::load(
                    var.name.clone(),
                    var.type_info.clone(),
                    var.scope,
                    load_addr,
                    memory,
                    max_children,
                )
            }
            VariableLocation::OptimizedOut => Value::unavailable(
                var.name.clone(),
                var.type_info.clone(),
                var.scope,
                "optimized out",
                memory,
            ),
            VariableLocation::Unknown => Value::unavailable(
                var.name.clone(),
                var.type_info.clone(),
                var.scope,
                "location unavailable",
                memory,
            ),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.as_ref().map(|v| v.name.as_str())
    }

    pub fn type_info(&self) -> Option<&TypeInfo> {
        self.inner.as_ref().map(|v| &v.type_info)
    }

    pub fn type_name(&self) -> Option<String> {
        let inner = self.inner.as_ref()?;
        match inner.contents {
            Contents::Children(_) => None,
            _ => Some(inner.type_info.name()),
        }
    }

    pub fn value_type(&self) -> ValueType {
        self.inner
            .as_ref()
            .map(|v| v.value_type)
            .unwrap_or(ValueType::Invalid)
    }

    /// ターゲット上のアドレス
    pub fn address(&self) -> Option<u64> {
        self.inner.as_ref()?.address
    }

    /// 値のバイト列
    pub fn data(&self) -> Option<&[u8]> {
        match &self.inner.as_ref()?.contents {
            Contents::Data(data) => Some(data),
            _ => None,
        }
    }

    /// エラーの説明（評価の失敗、または読み取れない値）
    pub fn error(&self) -> Option<&str> {
        if let Some(error) = &self.error {
            return Some(error);
        }
        match &self.inner.as_ref()?.contents {
            Contents::Unavailable(reason) => Some(reason),
            _ => None,
        }
    }

    /// 符号なし整数として読む（8バイト以下のスカラーのみ）
    pub fn as_u64(&self) -> Option<u64> {
        let inner = self.inner.as_ref()?;
        let is_scalar = matches!(
            inner.type_info,
            TypeInfo::Primitive { .. } | TypeInfo::Pointer { .. } | TypeInfo::Reference { .. } | TypeInfo::Enum { .. }
        );
        if !is_scalar {
            return None;
        }
        let data = self.data()?;
        if data.is_empty() || data.len() > 8 {
            return None;
        }
        let mut bytes = [0u8; 8];
        bytes[..data.len()].copy_from_slice(data);
        Some(u64::from_le_bytes(bytes))
    }

    /// 符号つき整数として読む（符号拡張する）
    pub fn as_i64(&self) -> Option<i64> {
        let raw = self.as_u64()?;
        let bits = self.data()?.len() * 8;
        if bits == 64 {
            return Some(raw as i64);
        }
        let shift = 64 - bits;
        Some(((raw << shift) as i64) >> shift)
    }

    /// スカラー値の文字列
    pub fn value(&self) -> Option<String> {
        let inner = self.inner.as_ref()?;
        if inner.value_type == ValueType::Register {
            return self.as_u64().map(|v| format!("0x{:016x}", v));
        }

        match &inner.type_info {
            TypeInfo::Primitive { name, .. } => self.format_primitive(name),
            TypeInfo::Pointer { .. } | TypeInfo::Reference { .. } => {
                self.as_u64().map(|v| format!("0x{:016x}", v))
            }
            TypeInfo::Enum { variants, .. } => {
                let raw = self.as_u64()?;
                let variant = variants.iter().find(|v| v.discriminant == Some(raw));
                Some(match variant {
                    Some(v) => v.name.clone(),
                    None => raw.to_string(),
                })
            }
            _ => None,
        }
    }

    fn format_primitive(&self, name: &str) -> Option<String> {
        let data = self.data()?;
        let raw = self.as_u64();

        Some(match name {
            "bool" => (data.first()? != &0).to_string(),
            "char" => {
                let c = char::from_u32(raw? as u32)?;
                format!("'{}'", c)
            }
            "f32" => f32::from_bits(raw? as u32).to_string(),
            "f64" => f64::from_bits(raw?).to_string(),
            "()" => "()".to_string(),
            _ if name.starts_with('i') => self.as_i64()?.to_string(),
            _ => match raw {
                Some(v) => v.to_string(),
                None => format!("{:02x?}", data),
            },
        })
    }

    /// 集約値の要約（構造体・配列・&str）
    pub fn summary(&self) -> Option<String> {
        let inner = self.inner.as_ref()?;
        if !matches!(inner.contents, Contents::Data(_)) {
            return None;
        }

        match &inner.type_info {
            TypeInfo::Struct { name, .. } if name == "&str" => self.format_str(),
            TypeInfo::Struct { .. } | TypeInfo::Union { .. } => {
                let fields: Vec<String> = (0..self.num_children())
                    .map(|i| self.child_at_index(i))
                    .map(|child| {
                        format!(
                            "{}: {}",
                            child.name().unwrap_or("?"),
                            child.display_value().unwrap_or_else(|| "?".to_string())
                        )
                    })
                    .collect();
                Some(format!("{{{}}}", fields.join(", ")))
            }
            TypeInfo::Array { length, .. } => {
                let shown = self.num_children();
                let mut elements: Vec<String> = (0..shown)
                    .map(|i| {
                        self.child_at_index(i)
                            .display_value()
                            .unwrap_or_else(|| "?".to_string())
                    })
                    .collect();
                if length.is_some_and(|len| len as usize > shown) {
                    elements.push("...".to_string());
                }
                Some(format!("[{}]", elements.join(", ")))
            }
            _ => None,
        }
    }

    /// value() か summary() のどちらか
    fn display_value(&self) -> Option<String> {
        self.value().or_else(|| self.summary())
    }

    /// &str の中身を読み取る
    fn format_str(&self) -> Option<String> {
        let ptr = self.child_member_with_name("data_ptr").as_u64()?;
        let len = self.child_member_with_name("length").as_u64()?;
        let inner = self.inner.as_ref()?;

        let bytes = inner.memory.read(ptr, len.min(MAX_STR_LEN) as usize).ok()?;
        let s = String::from_utf8_lossy(&bytes);
        if len > MAX_STR_LEN {
            Some(format!("\"{}...\"", s))
        } else {
            Some(format!("\"{}\"", s))
        }
    }

    /// 子要素の数
    pub fn num_children(&self) -> usize {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return 0,
        };
        if let Contents::Children(children) = &inner.contents {
            return children.len();
        }
        if !matches!(inner.contents, Contents::Data(_)) {
            return 0;
        }

        match &inner.type_info {
            TypeInfo::Struct { fields, .. } => fields.len(),
            TypeInfo::Union { members, .. } => members.len(),
            TypeInfo::Array { length, .. } => (length.unwrap_or(0) as usize).min(inner.max_children),
            TypeInfo::Pointer { pointee_type: Some(_), .. }
            | TypeInfo::Reference { referent_type: Some(_), .. } => 1,
            _ => 0,
        }
    }

    /// 番号で子要素を取得する（範囲外なら空の値）
    pub fn child_at_index(&self, index: usize) -> Value {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return Value::empty(),
        };
        if index >= self.num_children() {
            return Value::empty();
        }

        match (&inner.contents, &inner.type_info) {
            (Contents::Children(children), _) => children[index].clone(),
            (Contents::Data(data), TypeInfo::Struct { fields, .. }) => {
                let field = &fields[index];
                self.slice_child(data, field.name.clone(), field.type_info.clone(), field.offset)
            }
            (Contents::Data(data), TypeInfo::Union { members, .. }) => {
                let member = &members[index];
                self.slice_child(data, member.name.clone(), member.type_info.clone(), member.offset)
            }
            (Contents::Data(_), TypeInfo::Array { .. }) => self.element_at(index as u64),
            (Contents::Data(_), TypeInfo::Pointer { .. } | TypeInfo::Reference { .. }) => self.dereference(),
            _ => Value::empty(),
        }
    }

    /// 配列の要素、またはポインタの指す先から数えた要素
    ///
    /// 子要素数の上限や配列長の検査は行いません。
    pub fn element_at(&self, index: u64) -> Value {
        let Some(inner) = &self.inner else {
            return Value::empty();
        };
        let name = format!("[{}]", index);

        match (&inner.contents, &inner.type_info) {
            (Contents::Data(data), TypeInfo::Array {
                element_type: Some(element_type),
                ..
            }) => {
                let offset = element_type.size().wrapping_mul(index);
                self.slice_child(data, name, (**element_type).clone(), offset)
            }
            (Contents::Data(_), TypeInfo::Pointer {
                pointee_type: Some(pointee),
                ..
            }) => match self.as_u64() {
                Some(addr) => Value::load(
                    name,
                    (**pointee).clone(),
                    inner.value_type,
                    addr.wrapping_add(pointee.size().wrapping_mul(index)),
                    Arc::clone(&inner.memory),
                    inner.max_children,
                ),
                None => Value::empty(),
            },
            _ => Value::empty(),
        }
    }

    fn slice_child(&self, data: &[u8], name: String, type_info: TypeInfo, offset: u64) -> Value {
        let Some(inner) = &self.inner else {
            return Value::empty();
        };
        let range = usize::try_from(offset).ok().and_then(|start| {
            let end = usize::try_from(type_info.size()).ok()?.checked_add(start)?;
            Some(start..end)
        });
        let address = inner.address.map(|a| a.wrapping_add(offset));

        match range.and_then(|range| data.get(range)) {
            Some(bytes) => Value::from_data(
                name,
                type_info,
                inner.value_type,
                address,
                bytes.to_vec(),
                Arc::clone(&inner.memory),
                inner.max_children,
            ),
            None => Value::unavailable(
                name,
                type_info,
                inner.value_type,
                format!("member at offset {} lies outside the value", offset),
                Arc::clone(&inner.memory),
            ),
        }
    }

    /// 名前で子要素を取得する（なければ空の値）
    pub fn child_member_with_name(&self, name: &str) -> Value {
        (0..self.num_children())
            .map(|i| self.child_at_index(i))
            .find(|child| child.name() == Some(name))
            .unwrap_or_default()
    }

    /// ポインタ・参照の指す先
    pub fn dereference(&self) -> Value {
        let Some(inner) = &self.inner else {
            return Value::empty();
        };
        let pointee = match inner.type_info.pointee() {
            Some(pointee) => pointee.clone(),
            None => return Value::from_error(format!("cannot dereference '{}'", inner.name)),
        };
        let addr = match self.as_u64() {
            Some(addr) => addr,
            None => return Value::from_error(self.error().unwrap_or("pointer value unavailable")),
        };

        Value::load(
            format!("*{}", inner.name),
            pointee,
            inner.value_type,
            addr,
            Arc::clone(&inner.memory),
            inner.max_children,
        )
    }

    /// この値を指すポインタ
    pub fn address_of(&self) -> Value {
        let Some(inner) = &self.inner else {
            return Value::empty();
        };
        match inner.address {
            Some(addr) => Value::from_data(
                format!("&{}", inner.name),
                TypeInfo::pointer_to(inner.type_info.clone()),
                inner.value_type,
                None,
                addr.to_le_bytes()[..POINTER_SIZE as usize].to_vec(),
                Arc::clone(&inner.memory),
                inner.max_children,
            ),
            None => Value::from_error(format!("cannot take the address of '{}'", inner.name)),
        }
    }

    /// 名前と種類を付け替えたコピー
    pub fn renamed(&self, name: impl Into<String>, value_type: ValueType) -> Value {
        let Some(inner) = &self.inner else {
            return self.clone();
        };
        let contents = match &inner.contents {
            Contents::Data(data) => Contents::Data(data.clone()),
            Contents::Children(children) => Contents::Children(children.clone()),
            Contents::Unavailable(reason) => Contents::Unavailable(reason.clone()),
        };
        Value::from_object(ValueObject {
            name: name.into(),
            type_info: inner.type_info.clone(),
            value_type,
            address: inner.address,
            contents,
            memory: Arc::clone(&inner.memory),
            max_children: inner.max_children,
        })
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("name", &self.name())
            .field("type", &self.type_name())
            .field("value_type", &self.value_type())
            .field("value", &self.display_value())
            .field("error", &self.error())
            .finish()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = match &self.inner {
            Some(inner) => inner,
            None => return f.write_str(self.error.as_deref().unwrap_or(NO_VALUE)),
        };

        if let Contents::Children(children) = &inner.contents {
            writeln!(f, "{}:", inner.name)?;
            for child in children {
                writeln!(f, "  {}", child)?;
            }
            return Ok(());
        }

        match (self.value(), self.summary(), self.error()) {
            (_, _, Some(error)) => write!(f, "({}) {} = <{}>", inner.type_info.name(), inner.name, error),
            (Some(value), Some(summary), None) => {
                write!(f, "({}) {} = {} {}", inner.type_info.name(), inner.name, value, summary)
            }
            (Some(value), None, None) | (None, Some(value), None) => {
                write!(f, "({}) {} = {}", inner.type_info.name(), inner.name, value)
            }
            (None, None, None) => write!(f, "({}) {}", inner.type_info.name(), inner.name),
        }
    }
}

/// 値のリスト
#[derive(Debug, Clone, Default)]
pub struct ValueList {
    values: Vec<Value>,
}

impl ValueList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 番号で値を取得する（範囲外なら空の値）
    pub fn get(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// 名前で値を探す（なければ空の値）
    pub fn find_by_name(&self, name: &str) -> Value {
        self.values
            .iter()
            .find(|v| v.name() == Some(name))
            .cloned()
            .unwrap_or_default()
    }
}

impl FromIterator<Value> for ValueList {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a ValueList {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framekit_symbols::{FieldInfo, MemoryMap, NoMemory, VariantInfo};

    fn no_memory() -> Arc<dyn MemoryReader> {
        Arc::new(NoMemory)
    }

    fn point() -> TypeInfo {
        TypeInfo::Struct {
            name: "Point".to_string(),
            size: 8,
            fields: vec![
                FieldInfo {
                    name: "x".to_string(),
                    offset: 0,
                    type_info: TypeInfo::primitive("i32", 4),
                },
                FieldInfo {
                    name: "y".to_string(),
                    offset: 4,
                    type_info: TypeInfo::primitive("i32", 4),
                },
            ],
        }
    }

    #[test]
    fn test_empty_value() {
        let v = Value::empty();
        assert!(!v.is_valid());
        assert_eq!(v.value_type(), ValueType::Invalid);
        assert_eq!(v.num_children(), 0);
        assert!(!v.child_at_index(0).is_valid());
        assert_eq!(v.to_string(), "No value");
    }

    #[test]
    fn test_error_value() {
        let v = Value::from_error("use of undeclared identifier 'nope'");
        assert!(!v.is_valid());
        assert_eq!(v.error(), Some("use of undeclared identifier 'nope'"));
    }

    #[test]
    fn test_primitive_formatting() {
        let make = |name: &str, data: Vec<u8>| {
            let size = data.len() as u64;
            Value::from_data("v", TypeInfo::primitive(name, size), ValueType::VariableLocal, None, data, no_memory(), 8)
        };

        assert_eq!(make("i32", (-5i32).to_le_bytes().to_vec()).value(), Some("-5".to_string()));
        assert_eq!(make("u8", vec![200]).value(), Some("200".to_string()));
        assert_eq!(make("bool", vec![1]).value(), Some("true".to_string()));
        assert_eq!(make("char", ('x' as u32).to_le_bytes().to_vec()).value(), Some("'x'".to_string()));
        assert_eq!(make("f64", 1.5f64.to_le_bytes().to_vec()).value(), Some("1.5".to_string()));
        assert_eq!(make("i8", vec![0xff]).as_i64(), Some(-1));
    }

    #[test]
    fn test_struct_children() {
        let mut data = 3i32.to_le_bytes().to_vec();
        data.extend_from_slice(&(-4i32).to_le_bytes());
        let v = Value::from_data("p", point(), ValueType::VariableLocal, Some(0x1000), data, no_memory(), 8);

        assert_eq!(v.num_children(), 2);
        let y = v.child_member_with_name("y");
        assert_eq!(y.value(), Some("-4".to_string()));
        assert_eq!(y.address(), Some(0x1004));
        assert!(!v.child_member_with_name("z").is_valid());
        assert_eq!(v.summary(), Some("{x: 3, y: -4}".to_string()));
        assert_eq!(v.to_string(), "(Point) p = {x: 3, y: -4}");
    }

    #[test]
    fn test_array_respects_max_children() {
        let array = TypeInfo::Array {
            element_type: Some(Box::new(TypeInfo::primitive("u8", 1))),
            length: Some(4),
        };
        let v = Value::from_data("a", array, ValueType::VariableLocal, None, vec![1, 2, 3, 4], no_memory(), 2);
        assert_eq!(v.num_children(), 2);
        assert_eq!(v.summary(), Some("[1, 2, ...]".to_string()));
    }

    #[test]
    fn test_oversized_types_are_unavailable() {
        let huge = TypeInfo::Array {
            element_type: Some(Box::new(TypeInfo::primitive("u64", 8))),
            length: Some(u64::MAX),
        };
        assert_eq!(huge.size(), u64::MAX);

        let v = Value::load("h", huge, ValueType::VariableLocal, 0x1000, no_memory(), 8);
        assert!(v.is_valid());
        assert!(v.data().is_none());
        assert!(v.error().is_some_and(|e| e.contains("too large")));

        // DWARFが壊れていてメンバーのオフセットが値の外を指す場合
        let broken = TypeInfo::Struct {
            name: "Broken".to_string(),
            size: 4,
            fields: vec![FieldInfo {
                name: "far".to_string(),
                offset: u64::MAX - 1,
                type_info: TypeInfo::primitive("i32", 4),
            }],
        };
        let v = Value::from_data("b", broken, ValueType::VariableLocal, Some(0x2000), vec![0; 4], no_memory(), 8);
        let far = v.child_member_with_name("far");
        assert!(far.is_valid());
        assert!(far.data().is_none());
        assert!(far.error().is_some_and(|e| e.contains("outside the value")));
    }

    #[test]
    fn test_enum_value() {
        let color = TypeInfo::Enum {
            name: "Color".to_string(),
            size: 1,
            variants: vec![
                VariantInfo {
                    name: "Red".to_string(),
                    discriminant: Some(0),
                },
                VariantInfo {
                    name: "Blue".to_string(),
                    discriminant: Some(1),
                },
            ],
        };
        let v = Value::from_data("c", color, ValueType::VariableLocal, None, vec![1], no_memory(), 8);
        assert_eq!(v.value(), Some("Blue".to_string()));
    }

    #[test]
    fn test_pointer_dereference_and_address_of() {
        let mut mem = MemoryMap::new();
        mem.insert(0x2000, 7i32.to_le_bytes().to_vec());
        let memory: Arc<dyn MemoryReader> = Arc::new(mem);

        let ptr = Value::from_data(
            "ptr",
            TypeInfo::pointer_to(TypeInfo::primitive("i32", 4)),
            ValueType::VariableLocal,
            Some(0x1000),
            0x2000u64.to_le_bytes().to_vec(),
            Arc::clone(&memory),
            8,
        );
        assert_eq!(ptr.value(), Some("0x0000000000002000".to_string()));
        assert_eq!(ptr.num_children(), 1);

        let target = ptr.dereference();
        assert_eq!(target.name(), Some("*ptr"));
        assert_eq!(target.value(), Some("7".to_string()));
        assert_eq!(target.address(), Some(0x2000));

        let back = target.address_of();
        assert_eq!(back.as_u64(), Some(0x2000));
        assert_eq!(back.type_name(), Some("*i32".to_string()));
    }

    #[test]
    fn test_unreadable_memory() {
        let v = Value::load("x", TypeInfo::primitive("i32", 4), ValueType::VariableLocal, 0x10, no_memory(), 8);
        assert!(v.is_valid());
        assert!(v.value().is_none());
        assert!(v.error().is_some());
    }

    #[test]
    fn test_str_summary() {
        let mut mem = MemoryMap::new();
        mem.insert(0x3000, b"hello".to_vec());
        let str_type = TypeInfo::Struct {
            name: "&str".to_string(),
            size: 16,
            fields: vec![
                FieldInfo {
                    name: "data_ptr".to_string(),
                    offset: 0,
                    type_info: TypeInfo::pointer_to(TypeInfo::primitive("u8", 1)),
                },
                FieldInfo {
                    name: "length".to_string(),
                    offset: 8,
                    type_info: TypeInfo::primitive("usize", 8),
                },
            ],
        };
        let mut data = 0x3000u64.to_le_bytes().to_vec();
        data.extend_from_slice(&5u64.to_le_bytes());
        let v = Value::from_data("s", str_type, ValueType::VariableLocal, None, data, Arc::new(mem), 8);
        assert_eq!(v.summary(), Some("\"hello\"".to_string()));
    }

    #[test]
    fn test_register_set() {
        let regs = vec![
            Value::register("rip", 8, 0x1000, no_memory()),
            Value::register("rsp", 8, 0x7000, no_memory()),
        ];
        let set = Value::register_set("General Purpose Registers", regs, no_memory());
        assert_eq!(set.value_type(), ValueType::RegisterSet);
        assert_eq!(set.num_children(), 2);
        assert_eq!(set.child_member_with_name("rsp").as_u64(), Some(0x7000));
        assert_eq!(set.child_at_index(0).value(), Some("0x0000000000001000".to_string()));
    }

    #[test]
    fn test_value_list() {
        let list: ValueList = vec![Value::register("rax", 8, 1, no_memory())].into_iter().collect();
        assert_eq!(list.len(), 1);
        assert!(list.find_by_name("rax").is_valid());
        assert!(!list.find_by_name("rbx").is_valid());
        assert!(!list.get(5).is_valid());
    }
}
