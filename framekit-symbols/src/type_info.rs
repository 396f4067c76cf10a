//! DWARF型情報の抽出
//!
//! DWARF DIEから型情報（構造体フィールド、配列長、列挙子等）を抽出します。

use crate::Result;
use gimli::Reader;

/// ポインタ・参照の既定サイズ（x86_64）
pub const POINTER_SIZE: u64 = 8;

/// 型の再帰展開の上限（自己参照構造体対策）
const MAX_TYPE_DEPTH: usize = 6;

/// 型情報
#[derive(Debug, Clone, PartialEq)]
pub enum TypeInfo {
    /// 基本型
    Primitive {
        name: String,
        size: u64,
    },
    /// ポインタ型
    Pointer {
        pointee_type: Option<Box<TypeInfo>>,
        size: u64,
    },
    /// 参照型
    Reference {
        referent_type: Option<Box<TypeInfo>>,
        size: u64,
    },
    /// 配列型
    Array {
        element_type: Option<Box<TypeInfo>>,
        length: Option<u64>,
    },
    /// 構造体型
    Struct {
        name: String,
        size: u64,
        fields: Vec<FieldInfo>,
    },
    /// 列挙型
    Enum {
        name: String,
        size: u64,
        variants: Vec<VariantInfo>,
    },
    /// Union型
    Union {
        name: String,
        size: u64,
        members: Vec<FieldInfo>,
    },
    /// 不明な型
    Unknown,
}

/// フィールド情報
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// フィールド名
    pub name: String,
    /// オフセット（バイト）
    pub offset: u64,
    /// 型情報
    pub type_info: TypeInfo,
}

/// 列挙子情報
#[derive(Debug, Clone, PartialEq)]
pub struct VariantInfo {
    /// 列挙子名
    pub name: String,
    /// Discriminant値
    pub discriminant: Option<u64>,
}

impl TypeInfo {
    /// 基本型を作成する
    pub fn primitive(name: &str, size: u64) -> Self {
        TypeInfo::Primitive {
            name: name.to_string(),
            size,
        }
    }

    /// ポインタ型を作成する
    pub fn pointer_to(pointee: TypeInfo) -> Self {
        TypeInfo::Pointer {
            pointee_type: Some(Box::new(pointee)),
            size: POINTER_SIZE,
        }
    }

    /// 型のサイズ（バイト数）
    pub fn size(&self) -> u64 {
        match self {
            TypeInfo::Primitive { size, .. } => *size,
            TypeInfo::Pointer { size, .. } => *size,
            TypeInfo::Reference { size, .. } => *size,
            TypeInfo::Struct { size, .. } => *size,
            TypeInfo::Enum { size, .. } => *size,
            TypeInfo::Union { size, .. } => *size,
            TypeInfo::Array { element_type, length } => match (element_type, length) {
                (Some(elem), Some(len)) => elem.size().saturating_mul(*len),
                _ => 0,
            },
            TypeInfo::Unknown => 0,
        }
    }

    /// 表示用の型名
    pub fn name(&self) -> String {
        match self {
            TypeInfo::Primitive { name, .. } => name.clone(),
            TypeInfo::Pointer { pointee_type, .. } => match pointee_type {
                Some(t) => format!("*{}", t.name()),
                None => "*void".to_string(),
            },
            TypeInfo::Reference { referent_type, .. } => match referent_type {
                Some(t) => format!("&{}", t.name()),
                None => "&?".to_string(),
            },
            TypeInfo::Struct { name, .. } => name.clone(),
            TypeInfo::Enum { name, .. } => name.clone(),
            TypeInfo::Array { element_type, length } => {
                let elem = element_type
                    .as_ref()
                    .map(|t| t.name())
                    .unwrap_or_else(|| "?".to_string());
                match length {
                    Some(len) => format!("[{}; {}]", elem, len),
                    None => format!("[{}]", elem),
                }
            }
            TypeInfo::Union { name, .. } => name.clone(),
            TypeInfo::Unknown => "?".to_string(),
        }
    }

    /// ポインタまたは参照の場合、指す先の型を返す
    pub fn pointee(&self) -> Option<&TypeInfo> {
        match self {
            TypeInfo::Pointer { pointee_type, .. } => pointee_type.as_deref(),
            TypeInfo::Reference { referent_type, .. } => referent_type.as_deref(),
            _ => None,
        }
    }

    /// ポインタ型かどうか（参照を含む）
    pub fn is_pointer_like(&self) -> bool {
        matches!(self, TypeInfo::Pointer { .. } | TypeInfo::Reference { .. })
    }

    /// 名前でフィールドを検索する
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        match self {
            TypeInfo::Struct { fields, .. } => fields.iter().find(|f| f.name == name),
            TypeInfo::Union { members, .. } => members.iter().find(|f| f.name == name),
            _ => None,
        }
    }
}

/// 型情報抽出器
pub struct TypeInfoExtractor<'a, R: Reader> {
    dwarf: &'a gimli::Dwarf<R>,
}

impl<'a, R: Reader<Offset = usize>> TypeInfoExtractor<'a, R> {
    /// 新しい型情報抽出器を作成する
    pub fn new(dwarf: &'a gimli::Dwarf<R>) -> Self {
        Self { dwarf }
    }

    /// 型DIEから型情報を抽出する
    pub fn extract_type_info(
        &self,
        unit: &gimli::Unit<R>,
        type_offset: gimli::UnitOffset<R::Offset>,
    ) -> Result<TypeInfo> {
        self.extract_at(unit, type_offset, 0)
    }

    fn extract_at(
        &self,
        unit: &gimli::Unit<R>,
        type_offset: gimli::UnitOffset<R::Offset>,
        depth: usize,
    ) -> Result<TypeInfo> {
        if depth > MAX_TYPE_DEPTH {
            return Ok(TypeInfo::Unknown);
        }

        let mut entries = unit.entries_at_offset(type_offset)?;
        match entries.next_dfs()? {
            Some((_, entry)) => self.extract_from_entry(unit, entry, depth),
            None => Ok(TypeInfo::Unknown),
        }
    }

    /// DIEエントリから型情報を抽出する
    fn extract_from_entry(
        &self,
        unit: &gimli::Unit<R>,
        entry: &gimli::DebuggingInformationEntry<R>,
        depth: usize,
    ) -> Result<TypeInfo> {
        match entry.tag() {
            gimli::DW_TAG_base_type => Ok(self.extract_base_type(unit, entry)),
            gimli::DW_TAG_pointer_type => Ok(TypeInfo::Pointer {
                pointee_type: self.referenced_type(unit, entry, depth),
                size: self.get_byte_size(entry).unwrap_or(POINTER_SIZE),
            }),
            gimli::DW_TAG_reference_type | gimli::DW_TAG_rvalue_reference_type => {
                Ok(TypeInfo::Reference {
                    referent_type: self.referenced_type(unit, entry, depth),
                    size: self.get_byte_size(entry).unwrap_or(POINTER_SIZE),
                })
            }
            gimli::DW_TAG_array_type => self.extract_array_type(unit, entry, depth),
            gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type => {
                Ok(TypeInfo::Struct {
                    name: self.get_name(unit, entry).unwrap_or_else(|| "<anonymous>".to_string()),
                    size: self.get_byte_size(entry).unwrap_or(0),
                    fields: self.extract_fields(unit, entry, depth)?,
                })
            }
            gimli::DW_TAG_union_type => Ok(TypeInfo::Union {
                name: self.get_name(unit, entry).unwrap_or_else(|| "<anonymous>".to_string()),
                size: self.get_byte_size(entry).unwrap_or(0),
                members: self.extract_fields(unit, entry, depth)?,
            }),
            gimli::DW_TAG_enumeration_type => Ok(TypeInfo::Enum {
                name: self.get_name(unit, entry).unwrap_or_else(|| "<anonymous>".to_string()),
                size: self.get_byte_size(entry).unwrap_or(0),
                variants: self.extract_enumerators(unit, entry)?,
            }),
            // typedef / const / volatile は参照先の型をそのまま使う
            gimli::DW_TAG_typedef | gimli::DW_TAG_const_type | gimli::DW_TAG_volatile_type => {
                Ok(self
                    .referenced_type(unit, entry, depth)
                    .map(|t| *t)
                    .unwrap_or(TypeInfo::Unknown))
            }
            _ => Ok(TypeInfo::Unknown),
        }
    }

    /// 基本型を抽出する
    fn extract_base_type(
        &self,
        unit: &gimli::Unit<R>,
        entry: &gimli::DebuggingInformationEntry<R>,
    ) -> TypeInfo {
        let size = self.get_byte_size(entry).unwrap_or(0);
        let name = self
            .get_name(unit, entry)
            .unwrap_or_else(|| infer_base_type_name(entry, size).to_string());
        TypeInfo::Primitive { name, size }
    }

    /// DW_AT_type が指す型を抽出する
    fn referenced_type(
        &self,
        unit: &gimli::Unit<R>,
        entry: &gimli::DebuggingInformationEntry<R>,
        depth: usize,
    ) -> Option<Box<TypeInfo>> {
        let type_offset = self.get_type(entry)?;
        self.extract_at(unit, type_offset, depth + 1).ok().map(Box::new)
    }

    /// 配列型を抽出する
    fn extract_array_type(
        &self,
        unit: &gimli::Unit<R>,
        entry: &gimli::DebuggingInformationEntry<R>,
        depth: usize,
    ) -> Result<TypeInfo> {
        let element_type = self.referenced_type(unit, entry, depth);

        // 配列長は子の DW_TAG_subrange_type から取得する
        let mut length = None;
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let sub = child.entry();
            if sub.tag() != gimli::DW_TAG_subrange_type {
                continue;
            }
            if let Some(count) = sub.attr_value(gimli::DW_AT_count)?.and_then(|a| a.udata_value()) {
                length = Some(count);
            } else if let Some(upper) = sub
                .attr_value(gimli::DW_AT_upper_bound)?
                .and_then(|a| a.udata_value())
            {
                length = Some(upper + 1);
            }
            break;
        }

        Ok(TypeInfo::Array {
            element_type,
            length,
        })
    }

    /// フィールドを抽出する
    fn extract_fields(
        &self,
        unit: &gimli::Unit<R>,
        parent_entry: &gimli::DebuggingInformationEntry<R>,
        depth: usize,
    ) -> Result<Vec<FieldInfo>> {
        let mut fields = Vec::new();
        let mut tree = unit.entries_tree(Some(parent_entry.offset()))?;
        let root = tree.root()?;

        let mut children = root.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            if entry.tag() != gimli::DW_TAG_member {
                continue;
            }

            let name = self.get_name(unit, entry).unwrap_or_else(|| "<unnamed>".to_string());
            let offset = entry
                .attr_value(gimli::DW_AT_data_member_location)?
                .and_then(|a| a.udata_value())
                .unwrap_or(0);
            let type_info = self
                .referenced_type(unit, entry, depth)
                .map(|t| *t)
                .unwrap_or(TypeInfo::Unknown);

            fields.push(FieldInfo {
                name,
                offset,
                type_info,
            });
        }

        Ok(fields)
    }

    /// C形式の列挙子を抽出する
    fn extract_enumerators(
        &self,
        unit: &gimli::Unit<R>,
        parent_entry: &gimli::DebuggingInformationEntry<R>,
    ) -> Result<Vec<VariantInfo>> {
        let mut variants = Vec::new();
        let mut tree = unit.entries_tree(Some(parent_entry.offset()))?;
        let root = tree.root()?;

        let mut children = root.children();
        while let Some(child) = children.next()? {
            let entry = child.entry();
            if entry.tag() != gimli::DW_TAG_enumerator {
                continue;
            }
            let discriminant = entry
                .attr_value(gimli::DW_AT_const_value)?
                .and_then(|a| a.udata_value().or_else(|| a.sdata_value().map(|v| v as u64)));
            variants.push(VariantInfo {
                name: self.get_name(unit, entry).unwrap_or_else(|| "<unnamed>".to_string()),
                discriminant,
            });
        }

        Ok(variants)
    }

    /// 名前を取得する（.debug_str 参照も解決する）
    fn get_name(
        &self,
        unit: &gimli::Unit<R>,
        entry: &gimli::DebuggingInformationEntry<R>,
    ) -> Option<String> {
        let attr = entry.attr_value(gimli::DW_AT_name).ok()??;
        let name = self.dwarf.attr_string(unit, attr).ok()?;
        name.to_string_lossy().ok().map(|s| s.into_owned())
    }

    /// バイトサイズを取得する
    fn get_byte_size(&self, entry: &gimli::DebuggingInformationEntry<R>) -> Option<u64> {
        entry.attr_value(gimli::DW_AT_byte_size).ok()??.udata_value()
    }

    /// 型参照を取得する
    fn get_type(
        &self,
        entry: &gimli::DebuggingInformationEntry<R>,
    ) -> Option<gimli::UnitOffset<R::Offset>> {
        match entry.attr_value(gimli::DW_AT_type).ok()?? {
            gimli::AttributeValue::UnitRef(offset) => Some(offset),
            _ => None,
        }
    }
}

/// 名前を持たない基本型の名前をエンコーディングから推測する
fn infer_base_type_name<R: Reader>(entry: &gimli::DebuggingInformationEntry<R>, size: u64) -> &'static str {
    let encoding = match entry.attr_value(gimli::DW_AT_encoding) {
        Ok(Some(gimli::AttributeValue::Encoding(enc))) => enc,
        _ => return "<unknown>",
    };

    match encoding {
        gimli::DW_ATE_signed => match size {
            1 => "i8",
            2 => "i16",
            4 => "i32",
            8 => "i64",
            _ => "int",
        },
        gimli::DW_ATE_unsigned => match size {
            1 => "u8",
            2 => "u16",
            4 => "u32",
            8 => "u64",
            _ => "uint",
        },
        gimli::DW_ATE_float => match size {
            4 => "f32",
            8 => "f64",
            _ => "float",
        },
        gimli::DW_ATE_boolean => "bool",
        gimli::DW_ATE_UTF => "char",
        _ => "<unknown>",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn test_array_size_and_name() {
        let arr = TypeInfo::Array {
            element_type: Some(Box::new(TypeInfo::primitive("u16", 2))),
            length: Some(5),
        };
        assert_eq!(arr.size(), 10);
        assert_eq!(arr.name(), "[u16; 5]");

        let huge = TypeInfo::Array {
            element_type: Some(Box::new(TypeInfo::primitive("u64", 8))),
            length: Some(u64::MAX / 2),
        };
        assert_eq!(huge.size(), u64::MAX);
    }

    #[test]
    fn test_pointer_name_and_pointee() {
        let ptr = TypeInfo::pointer_to(point());
        assert_eq!(ptr.name(), "*Point");
        assert_eq!(ptr.size(), POINTER_SIZE);
        assert!(ptr.is_pointer_like());
        assert_eq!(ptr.pointee().map(|t| t.name()), Some("Point".to_string()));
    }

    #[test]
    fn test_field_lookup() {
        let p = point();
        assert_eq!(p.field("y").map(|f| f.offset), Some(4));
        assert!(p.field("z").is_none());
        assert!(TypeInfo::primitive("i32", 4).field("x").is_none());
    }
}
