//! ELFとDWARFの読み込み機能
//!
//! ELFファイルからシンボルテーブル、関数とブロック、変数、型、行テーブルを読み取り、
//! [`Module`] を構築します。

use crate::function::{BlockId, FUNCTION_BLOCK};
use crate::symbols::object_symbols;
use crate::variables::location_from_attr;
use crate::{
    CompileUnit, FrameBase, Function, InlineInfo, LineEntry, Module, ModuleBuilder, Result,
    TypeInfo, TypeInfoExtractor, ValueType, Variable, VariableLocation,
};
use object::{Object, ObjectKind, ObjectSection, SectionKind};
use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};

type Slice = gimli::EndianSlice<'static, gimli::RunTimeEndian>;

/// abstract_origin / specification をたどる深さの上限
const MAX_ORIGIN_DEPTH: usize = 4;

/// DWARFローダー
pub struct DwarfLoader {
    path: PathBuf,
    /// オブジェクトファイル
    object_file: object::File<'static>,
    /// DWARFコンテキスト
    dwarf: gimli::Dwarf<Slice>,
    endian: gimli::RunTimeEndian,
}

impl DwarfLoader {
    /// ELFファイルからDWARF情報を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let file_data = fs::read(path)
            .map_err(|e| anyhow::anyhow!("Failed to read file {:?}: {}", path, e))?;

        // モジュールはプロセスの終了まで保持されるため、'staticライフタイムで扱う
        let file_data: &'static [u8] = Box::leak(file_data.into_boxed_slice());

        let object_file = object::File::parse(file_data)
            .map_err(|e| anyhow::anyhow!("Failed to parse ELF file {:?}: {}", path, e))?;

        let endian = if object_file.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let dwarf = load_dwarf(&object_file, endian)?;

        Ok(Self {
            path: path.to_path_buf(),
            object_file,
            dwarf,
            endian,
        })
    }

    /// DWARFコンテキストへの参照を取得
    pub fn dwarf(&self) -> &gimli::Dwarf<Slice> {
        &self.dwarf
    }

    /// オブジェクトファイルへの参照を取得
    pub fn object_file(&self) -> &object::File<'static> {
        &self.object_file
    }

    /// PIE（Position Independent Executable）かどうかを判定する
    ///
    /// PIE実行ファイルの場合、シンボルアドレスはオフセットであり、
    /// 実行時ベースアドレスを加算する必要があります。
    pub fn is_pie(&self) -> bool {
        // ET_DYN = PIE実行ファイルまたは共有ライブラリ
        matches!(self.object_file.kind(), ObjectKind::Dynamic)
    }

    /// 実行可能セクションをまとめたアドレス範囲
    pub fn code_range(&self) -> Range<u64> {
        self.object_file
            .sections()
            .filter(|s| s.kind() == SectionKind::Text && s.size() > 0)
            .map(|s| s.address()..s.address() + s.size())
            .reduce(|a, b| a.start.min(b.start)..a.end.max(b.end))
            .unwrap_or(0..0)
    }

    /// モジュールを構築する
    pub fn build_module(&self) -> Result<Module> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());

        let compile_units = self.compile_units()?;
        let lines = self.line_entries()?;
        let symbols = object_symbols(&self.object_file);

        tracing::debug!(
            module = %name,
            symbols = symbols.len(),
            compile_units = compile_units.len(),
            lines = lines.len(),
            "loaded module"
        );

        let builder = ModuleBuilder::new(name)
            .path(self.path.clone())
            .pie(self.is_pie())
            .code_range(self.code_range())
            .symbols(symbols)
            .lines(lines);

        Ok(compile_units
            .into_iter()
            .fold(builder, |b, cu| b.compile_unit(cu))
            .build())
    }

    /// すべてのコンパイルユニットを読み取る
    fn compile_units(&self) -> Result<Vec<CompileUnit>> {
        let mut units = Vec::new();

        let mut iter = self.dwarf.units();
        while let Some(header) = iter.next()? {
            let unit = self.dwarf.unit(header)?;
            let parser = UnitParser::new(&self.dwarf, &unit);
            units.push(parser.parse()?);
        }

        Ok(units)
    }

    /// addr2lineで行テーブルを作成する
    fn line_entries(&self) -> Result<Vec<LineEntry>> {
        let code = self.code_range();
        if code.is_empty() {
            return Ok(Vec::new());
        }

        let context = addr2line::Context::from_dwarf(load_dwarf(&self.object_file, self.endian)?)
            .map_err(|e| anyhow::anyhow!("Failed to build line context: {}", e))?;

        let rows = context
            .find_location_range(code.start, code.end)
            .map_err(|e| anyhow::anyhow!("Failed to read line table: {}", e))?;

        let entries = rows
            .filter_map(|(address, size, location)| {
                Some(LineEntry {
                    address,
                    size,
                    file: location.file?.to_string(),
                    line: location.line?,
                    column: location.column,
                })
            })
            .collect();

        Ok(entries)
    }
}

impl Module {
    /// ELFファイルからモジュールを読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Module> {
        DwarfLoader::load(path)?.build_module()
    }
}

/// DWARFセクションを読み込む
fn load_dwarf(object_file: &object::File<'static>, endian: gimli::RunTimeEndian) -> Result<gimli::Dwarf<Slice>> {
    let load_section = |id: gimli::SectionId| -> Result<Slice> {
        let data = object_file
            .section_by_name(id.name())
            .and_then(|section| section.data().ok())
            .unwrap_or(&[]);
        Ok(gimli::EndianSlice::new(data, endian))
    };

    gimli::Dwarf::load(load_section).map_err(|e| anyhow::anyhow!("Failed to load DWARF sections: {}", e))
}

/// 1つのコンパイルユニットの解析
struct UnitParser<'a> {
    dwarf: &'a gimli::Dwarf<Slice>,
    unit: &'a gimli::Unit<Slice>,
    types: TypeInfoExtractor<'a, Slice>,
}

impl<'a> UnitParser<'a> {
    fn new(dwarf: &'a gimli::Dwarf<Slice>, unit: &'a gimli::Unit<Slice>) -> Self {
        Self {
            dwarf,
            unit,
            types: TypeInfoExtractor::new(dwarf),
        }
    }

    fn parse(&self) -> Result<CompileUnit> {
        let name = self
            .unit
            .name
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut cu = CompileUnit::new(name);

        let mut ranges = self.dwarf.unit_ranges(self.unit)?;
        while let Some(range) = ranges.next()? {
            if range.begin != 0 && range.begin < range.end {
                cu.ranges.push(range.begin..range.end);
            }
        }

        let mut tree = self.unit.entries_tree(None)?;
        let root = tree.root()?;
        self.parse_scope(root, &mut cu)?;

        Ok(cu)
    }

    /// 名前空間や型の中を含めて、関数とファイルスコープの変数を探す
    fn parse_scope(&self, node: gimli::EntriesTreeNode<'_, '_, '_, Slice>, cu: &mut CompileUnit) -> Result<()> {
        let mut children = node.children();
        while let Some(child) = children.next()? {
            let entry = child.entry().clone();
            match entry.tag() {
                gimli::DW_TAG_subprogram => {
                    if let Some(function) = self.parse_function(child)? {
                        cu.add_function(function);
                    }
                }
                gimli::DW_TAG_variable => {
                    if let Some(variable) = self.parse_global(&entry)? {
                        cu.add_global(variable);
                    }
                }
                gimli::DW_TAG_namespace
                | gimli::DW_TAG_structure_type
                | gimli::DW_TAG_class_type
                | gimli::DW_TAG_union_type => self.parse_scope(child, cu)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// 関数を解析する（アドレス範囲を持たない宣言は None）
    fn parse_function(&self, node: gimli::EntriesTreeNode<'_, '_, '_, Slice>) -> Result<Option<Function>> {
        let entry = node.entry().clone();
        let ranges = self.die_ranges(&entry)?;
        let range = match ranges.iter().cloned().reduce(|a, b| a.start.min(b.start)..a.end.max(b.end)) {
            Some(range) => range,
            None => return Ok(None),
        };

        let name = self
            .die_name(&entry, gimli::DW_AT_name)
            .unwrap_or_else(|| format!("0x{:x}", range.start));
        let mut function = Function::new(name, range, self.frame_base(&entry)?);
        function.mangled_name = self.die_name(&entry, gimli::DW_AT_linkage_name);

        self.parse_block(node, &mut function, FUNCTION_BLOCK)?;
        Ok(Some(function))
    }

    /// ブロックの子（変数、レキシカルブロック、インライン展開）を解析する
    fn parse_block(
        &self,
        node: gimli::EntriesTreeNode<'_, '_, '_, Slice>,
        function: &mut Function,
        block: BlockId,
    ) -> Result<()> {
        let mut children = node.children();
        while let Some(child) = children.next()? {
            let entry = child.entry().clone();
            match entry.tag() {
                gimli::DW_TAG_formal_parameter => {
                    if let Some(variable) = self.parse_variable(&entry, ValueType::VariableArgument)? {
                        function.add_variable(block, variable);
                    }
                }
                gimli::DW_TAG_variable => {
                    if let Some(variable) = self.parse_variable(&entry, ValueType::VariableLocal)? {
                        function.add_variable(block, variable);
                    }
                }
                gimli::DW_TAG_lexical_block => {
                    let ranges = self.die_ranges(&entry)?;
                    // 範囲を持たないブロックの変数は外側のブロックに属させる
                    let id = if ranges.is_empty() {
                        block
                    } else {
                        function.add_block(block, ranges, None)
                    };
                    self.parse_block(child, function, id)?;
                }
                gimli::DW_TAG_inlined_subroutine => {
                    let ranges = self.die_ranges(&entry)?;
                    if ranges.is_empty() {
                        continue;
                    }
                    let info = InlineInfo {
                        name: self
                            .die_name(&entry, gimli::DW_AT_name)
                            .unwrap_or_else(|| "<inlined>".to_string()),
                        call_file: self.call_file(&entry)?,
                        call_line: entry
                            .attr_value(gimli::DW_AT_call_line)?
                            .and_then(|a| a.udata_value())
                            .map(|l| l as u32),
                    };
                    let id = function.add_block(block, ranges, Some(info));
                    self.parse_block(child, function, id)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// ファイルスコープの変数を解析する
    fn parse_global(&self, entry: &gimli::DebuggingInformationEntry<'_, '_, Slice>) -> Result<Option<Variable>> {
        let external = matches!(
            entry.attr_value(gimli::DW_AT_external)?,
            Some(gimli::AttributeValue::Flag(true))
        );
        let scope = if external {
            ValueType::VariableGlobal
        } else {
            ValueType::VariableStatic
        };

        match self.parse_variable(entry, scope)? {
            Some(v) if matches!(v.location, VariableLocation::Address(_)) => Ok(Some(v)),
            _ => Ok(None),
        }
    }

    /// 変数・引数を解析する
    fn parse_variable(
        &self,
        entry: &gimli::DebuggingInformationEntry<'_, '_, Slice>,
        scope: ValueType,
    ) -> Result<Option<Variable>> {
        let name = match self.die_name(entry, gimli::DW_AT_name) {
            Some(name) => name,
            None => return Ok(None),
        };

        let type_info = match self.die_type(entry, 0) {
            Some(offset) => self.types.extract_type_info(self.unit, offset).unwrap_or(TypeInfo::Unknown),
            None => TypeInfo::Unknown,
        };

        let location = location_from_attr(entry.attr_value(gimli::DW_AT_location)?);

        Ok(Some(Variable::new(name, type_info, scope, location)))
    }

    /// DIEのアドレス範囲（0番地から始まる範囲は除去されたコードとして無視する）
    fn die_ranges(&self, entry: &gimli::DebuggingInformationEntry<'_, '_, Slice>) -> Result<Vec<Range<u64>>> {
        let mut out = Vec::new();
        let mut ranges = self.dwarf.die_ranges(self.unit, entry)?;
        while let Some(range) = ranges.next()? {
            if range.begin != 0 && range.begin < range.end {
                out.push(range.begin..range.end);
            }
        }
        Ok(out)
    }

    /// 文字列属性を取得する（abstract_origin / specification もたどる）
    fn die_name(&self, entry: &gimli::DebuggingInformationEntry<'_, '_, Slice>, attr: gimli::DwAt) -> Option<String> {
        self.die_name_at_depth(entry, attr, 0)
    }

    fn die_name_at_depth(
        &self,
        entry: &gimli::DebuggingInformationEntry<'_, '_, Slice>,
        attr: gimli::DwAt,
        depth: usize,
    ) -> Option<String> {
        if let Some(value) = entry.attr_value(attr).ok().flatten() {
            let s = self.dwarf.attr_string(self.unit, value).ok()?;
            return Some(s.to_string_lossy().into_owned());
        }
        if depth >= MAX_ORIGIN_DEPTH {
            return None;
        }
        let origin = self.origin(entry)?;
        let origin_entry = self.unit.entry(origin).ok()?;
        self.die_name_at_depth(&origin_entry, attr, depth + 1)
    }

    /// DW_AT_type を取得する（abstract_origin もたどる）
    fn die_type(
        &self,
        entry: &gimli::DebuggingInformationEntry<'_, '_, Slice>,
        depth: usize,
    ) -> Option<gimli::UnitOffset> {
        if let Some(gimli::AttributeValue::UnitRef(offset)) = entry.attr_value(gimli::DW_AT_type).ok().flatten() {
            return Some(offset);
        }
        if depth >= MAX_ORIGIN_DEPTH {
            return None;
        }
        let origin = self.origin(entry)?;
        let origin_entry = self.unit.entry(origin).ok()?;
        self.die_type(&origin_entry, depth + 1)
    }

    /// 同じユニット内の abstract_origin / specification
    fn origin(&self, entry: &gimli::DebuggingInformationEntry<'_, '_, Slice>) -> Option<gimli::UnitOffset> {
        for attr in [gimli::DW_AT_abstract_origin, gimli::DW_AT_specification] {
            if let Some(gimli::AttributeValue::UnitRef(offset)) = entry.attr_value(attr).ok().flatten() {
                return Some(offset);
            }
        }
        None
    }

    /// DW_AT_frame_base を解釈する
    fn frame_base(&self, entry: &gimli::DebuggingInformationEntry<'_, '_, Slice>) -> Result<FrameBase> {
        let expr = match entry.attr_value(gimli::DW_AT_frame_base)? {
            Some(gimli::AttributeValue::Exprloc(expr)) => expr,
            _ => return Ok(FrameBase::Unknown),
        };

        let op = expr.0.slice().first().copied();
        Ok(match op {
            Some(op) if op == gimli::constants::DW_OP_call_frame_cfa.0 => FrameBase::Cfa,
            Some(op) if (gimli::constants::DW_OP_reg0.0..=gimli::constants::DW_OP_reg31.0).contains(&op) => {
                FrameBase::Register((op - gimli::constants::DW_OP_reg0.0) as u16)
            }
            _ => FrameBase::Unknown,
        })
    }

    /// DW_AT_call_file のファイル名
    fn call_file(&self, entry: &gimli::DebuggingInformationEntry<'_, '_, Slice>) -> Result<Option<String>> {
        let index = match entry.attr_value(gimli::DW_AT_call_file)? {
            Some(gimli::AttributeValue::FileIndex(index)) => index,
            Some(other) => match other.udata_value() {
                Some(index) => index,
                None => return Ok(None),
            },
            None => return Ok(None),
        };

        let program = match &self.unit.line_program {
            Some(program) => program,
            None => return Ok(None),
        };
        let file = match program.header().file(index) {
            Some(file) => file,
            None => return Ok(None),
        };
        let name = self.dwarf.attr_string(self.unit, file.path_name())?;
        Ok(Some(name.to_string_lossy().into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file() {
        assert!(DwarfLoader::load("/nonexistent/framekit/binary").is_err());
    }
}
