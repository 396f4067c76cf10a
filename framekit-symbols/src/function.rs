//! 関数とブロック（レキシカルブロック・インライン展開）

use crate::Variable;
use std::ops::Range;
use std::sync::Arc;

/// 関数内のブロック番号（0 は関数本体）
pub type BlockId = usize;

/// 関数本体のブロック番号
pub const FUNCTION_BLOCK: BlockId = 0;

/// フレームベースの求め方（DW_AT_frame_base）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBase {
    /// DW_OP_call_frame_cfa
    Cfa,
    /// DW_OP_regN
    Register(u16),
    Unknown,
}

/// インライン展開された関数の情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineInfo {
    /// インライン展開された関数名
    pub name: String,
    /// 呼び出し元のファイル
    pub call_file: Option<String>,
    /// 呼び出し元の行
    pub call_line: Option<u32>,
}

/// ブロック
#[derive(Debug, Clone)]
pub struct Block {
    pub parent: Option<BlockId>,
    pub children: Vec<BlockId>,
    /// ブロックが占めるアドレス範囲（ファイル内アドレス）
    pub ranges: Vec<Range<u64>>,
    /// インライン展開された関数ならその情報
    pub inlined: Option<InlineInfo>,
    /// このブロックで宣言された変数
    pub variables: Vec<Arc<Variable>>,
}

impl Block {
    /// アドレスがブロックの範囲内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        self.ranges.iter().any(|r| r.contains(&addr))
    }
}

/// 関数
#[derive(Debug, Clone)]
pub struct Function {
    /// 表示用の関数名
    pub name: String,
    /// リンケージ名（マングル名）
    pub mangled_name: Option<String>,
    /// 関数のアドレス範囲（ファイル内アドレス）
    pub range: Range<u64>,
    pub frame_base: FrameBase,
    /// blocks[0] は関数本体
    blocks: Vec<Block>,
}

impl Function {
    /// 関数本体のブロックだけを持つ関数を作成する
    pub fn new(name: impl Into<String>, range: Range<u64>, frame_base: FrameBase) -> Self {
        let body = Block {
            parent: None,
            children: Vec::new(),
            ranges: vec![range.clone()],
            inlined: None,
            variables: Vec::new(),
        };
        Self {
            name: name.into(),
            mangled_name: None,
            range,
            frame_base,
            blocks: vec![body],
        }
    }

    /// 子ブロックを追加する
    pub fn add_block(&mut self, parent: BlockId, ranges: Vec<Range<u64>>, inlined: Option<InlineInfo>) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(Block {
            parent: Some(parent),
            children: Vec::new(),
            ranges,
            inlined,
            variables: Vec::new(),
        });
        self.blocks[parent].children.push(id);
        id
    }

    /// ブロックに変数を追加する
    pub fn add_variable(&mut self, block: BlockId, mut variable: Variable) {
        variable.declared_in = Some(block);
        self.blocks[block].variables.push(Arc::new(variable));
    }

    /// ブロックを取得する
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// アドレスが関数の範囲内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        self.range.contains(&addr)
    }

    /// アドレスを含む最も内側のブロックを探す
    pub fn deepest_block_at(&self, addr: u64) -> Option<BlockId> {
        if !self.blocks[FUNCTION_BLOCK].contains(addr) {
            return None;
        }

        let mut current = FUNCTION_BLOCK;
        'descend: loop {
            for &child in &self.blocks[current].children {
                if self.blocks[child].contains(addr) {
                    current = child;
                    continue 'descend;
                }
            }
            return Some(current);
        }
    }

    /// `block` が `ancestor` 自身またはその内側にあるか
    pub fn is_within(&self, block: BlockId, ancestor: BlockId) -> bool {
        let mut current = Some(block);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.blocks.get(id).and_then(|b| b.parent);
        }
        false
    }

    /// 関数内のすべての変数（ネストしたブロックを含む、宣言順）
    pub fn all_variables(&self) -> Vec<Arc<Variable>> {
        let mut out = Vec::new();
        self.collect_variables(FUNCTION_BLOCK, &mut out);
        out
    }

    fn collect_variables(&self, id: BlockId, out: &mut Vec<Arc<Variable>>) {
        let block = &self.blocks[id];
        out.extend(block.variables.iter().cloned());
        for &child in &block.children {
            self.collect_variables(child, out);
        }
    }
}

/// 関数内の特定のブロックへの参照
#[derive(Debug, Clone)]
pub struct BlockRef {
    function: Arc<Function>,
    id: BlockId,
}

impl BlockRef {
    /// ブロック参照を作成する（存在しないブロックなら None）
    pub fn new(function: Arc<Function>, id: BlockId) -> Option<Self> {
        function.block(id)?;
        Some(Self { function, id })
    }

    /// 関数本体のブロック
    pub fn function_block(function: Arc<Function>) -> Self {
        Self {
            function,
            id: FUNCTION_BLOCK,
        }
    }

    /// アドレスを含む最も内側のブロック
    pub fn deepest_at(function: Arc<Function>, addr: u64) -> Option<Self> {
        let id = function.deepest_block_at(addr)?;
        Some(Self { function, id })
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn function(&self) -> &Arc<Function> {
        &self.function
    }

    fn block(&self) -> &Block {
        &self.function.blocks[self.id]
    }

    pub fn ranges(&self) -> &[Range<u64>] {
        &self.block().ranges
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.block().contains(addr)
    }

    /// インライン展開の情報（このブロック自身がインライン関数の場合のみ）
    pub fn inlined_info(&self) -> Option<&InlineInfo> {
        self.block().inlined.as_ref()
    }

    /// 親ブロック
    pub fn parent(&self) -> Option<Self> {
        let parent = self.block().parent?;
        Some(Self {
            function: Arc::clone(&self.function),
            id: parent,
        })
    }

    /// 自身または祖先のうち、最も内側のインライン関数ブロック
    pub fn containing_inlined_block(&self) -> Option<Self> {
        let mut current = Some(self.clone());
        while let Some(block) = current {
            if block.inlined_info().is_some() {
                return Some(block);
            }
            current = block.parent();
        }
        None
    }

    /// このブロックで宣言された変数
    pub fn variables(&self) -> &[Arc<Variable>] {
        &self.block().variables
    }

    /// 変数を集める
    ///
    /// 自身の変数を先に、続いて親ブロックの変数を追加します。
    /// `stop_if_inlined` が真の場合、インライン関数ブロックに到達したらそこで止めます。
    pub fn append_variables(&self, get_parent: bool, stop_if_inlined: bool, out: &mut Vec<Arc<Variable>>) {
        out.extend(self.variables().iter().cloned());

        if !get_parent {
            return;
        }
        if stop_if_inlined && self.inlined_info().is_some() {
            return;
        }
        if let Some(parent) = self.parent() {
            parent.append_variables(get_parent, stop_if_inlined, out);
        }
    }
}

impl PartialEq for BlockRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.function, &other.function) && self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{TypeInfo, ValueType, VariableLocation};

    fn local(name: &str) -> Variable {
        Variable::new(
            name,
            TypeInfo::primitive("i32", 4),
            ValueType::VariableLocal,
            VariableLocation::FrameOffset(-4),
        )
    }

    /// main (0x1000..0x1100)
    ///   lexical block (0x1010..0x1080)
    ///     inlined helper (0x1020..0x1040)
    fn sample() -> Arc<Function> {
        let mut func = Function::new("main", 0x1000..0x1100, FrameBase::Cfa);
        func.add_variable(FUNCTION_BLOCK, local("outer"));
        let lexical = func.add_block(FUNCTION_BLOCK, vec![0x1010..0x1080], None);
        func.add_variable(lexical, local("inner"));
        let inlined = func.add_block(
            lexical,
            vec![0x1020..0x1040],
            Some(InlineInfo {
                name: "helper".to_string(),
                call_file: Some("src/main.rs".to_string()),
                call_line: Some(12),
            }),
        );
        func.add_variable(inlined, local("arg"));
        Arc::new(func)
    }

    #[test]
    fn test_deepest_block() {
        let func = sample();
        assert_eq!(func.deepest_block_at(0x1005), Some(0));
        assert_eq!(func.deepest_block_at(0x1015), Some(1));
        assert_eq!(func.deepest_block_at(0x1030), Some(2));
        assert_eq!(func.deepest_block_at(0x2000), None);
        assert!(func.is_within(2, 0));
        assert!(!func.is_within(0, 1));
    }

    #[test]
    fn test_containing_inlined_block() {
        let func = sample();
        let block = BlockRef::deepest_at(Arc::clone(&func), 0x1030).unwrap();
        let inlined = block.containing_inlined_block().unwrap();
        assert_eq!(inlined.inlined_info().map(|i| i.name.as_str()), Some("helper"));

        let outer = BlockRef::deepest_at(func, 0x1015).unwrap();
        assert!(outer.containing_inlined_block().is_none());
    }

    #[test]
    fn test_append_variables_stops_at_inlined() {
        let func = sample();
        let block = BlockRef::deepest_at(Arc::clone(&func), 0x1030).unwrap();

        let mut stopped = Vec::new();
        block.append_variables(true, true, &mut stopped);
        let names: Vec<_> = stopped.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["arg"]);

        let mut all = Vec::new();
        block.append_variables(true, false, &mut all);
        let names: Vec<_> = all.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["arg", "inner", "outer"]);
    }

    #[test]
    fn test_all_variables_records_declaring_block() {
        let func = sample();
        let vars = func.all_variables();
        assert_eq!(vars.len(), 3);
        assert_eq!(vars[2].declared_in, Some(2));
    }
}
