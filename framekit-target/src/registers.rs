//! レジスタアクセス機能
//!
//! x86_64 のレジスタ配置と、フレームごとのレジスタ値を扱います。

use crate::Result;
use nix::unistd::Pid;
use parking_lot::Mutex;

/// レジスタの説明
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub name: &'static str,
    /// 別名（pc, sp, fp, flags）
    pub alt_name: Option<&'static str>,
    /// DWARFレジスタ番号
    pub dwarf: Option<u16>,
    /// バイト数
    pub size: usize,
    /// 所属するレジスタセット
    pub set: usize,
}

impl RegisterInfo {
    /// 名前または別名が一致するか（大文字小文字を区別しない）
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
            || self.alt_name.is_some_and(|alt| alt.eq_ignore_ascii_case(name))
    }
}

/// レジスタセットの説明
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterSetInfo {
    pub name: &'static str,
    pub short_name: &'static str,
}

impl RegisterSetInfo {
    pub fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name) || self.short_name.eq_ignore_ascii_case(name)
    }
}

pub const GPR_SET: usize = 0;
pub const SEGMENT_SET: usize = 1;

pub static REGISTER_SETS: &[RegisterSetInfo] = &[
    RegisterSetInfo {
        name: "General Purpose Registers",
        short_name: "gpr",
    },
    RegisterSetInfo {
        name: "Segment Registers",
        short_name: "seg",
    },
];

const fn gpr(name: &'static str, alt_name: Option<&'static str>, dwarf: Option<u16>) -> RegisterInfo {
    RegisterInfo {
        name,
        alt_name,
        dwarf,
        size: 8,
        set: GPR_SET,
    }
}

const fn seg(name: &'static str, dwarf: Option<u16>) -> RegisterInfo {
    RegisterInfo {
        name,
        alt_name: None,
        dwarf,
        size: 8,
        set: SEGMENT_SET,
    }
}

/// x86_64 のレジスタ一覧（インデックスが RegisterContext の格納位置）
pub static REGISTERS: &[RegisterInfo] = &[
    gpr("rax", None, Some(0)),
    gpr("rbx", None, Some(3)),
    gpr("rcx", None, Some(2)),
    gpr("rdx", None, Some(1)),
    gpr("rdi", None, Some(5)),
    gpr("rsi", None, Some(4)),
    gpr("rbp", Some("fp"), Some(6)),
    gpr("rsp", Some("sp"), Some(7)),
    gpr("r8", None, Some(8)),
    gpr("r9", None, Some(9)),
    gpr("r10", None, Some(10)),
    gpr("r11", None, Some(11)),
    gpr("r12", None, Some(12)),
    gpr("r13", None, Some(13)),
    gpr("r14", None, Some(14)),
    gpr("r15", None, Some(15)),
    gpr("rip", Some("pc"), Some(16)),
    gpr("rflags", Some("flags"), Some(49)),
    seg("cs", Some(51)),
    seg("ss", Some(52)),
    seg("ds", Some(53)),
    seg("es", Some(50)),
    seg("fs", Some(54)),
    seg("gs", Some(55)),
    seg("fs_base", Some(58)),
    seg("gs_base", Some(59)),
];

const RBP: usize = 6;
const RSP: usize = 7;
const RIP: usize = 16;

/// 名前または別名でレジスタを探す
pub fn find_register_index(name: &str) -> Option<usize> {
    REGISTERS.iter().position(|r| r.matches(name))
}

/// 名前または短縮名でレジスタセットを探す
pub fn find_register_set_index(name: &str) -> Option<usize> {
    REGISTER_SETS.iter().position(|s| s.matches(name))
}

/// フレームのレジスタ値
///
/// 呼び出し元フレームでは復元できたレジスタだけが値を持ちます。
/// 書き込みはフレーム0のコンテキストにだけ許されます。
#[derive(Debug)]
pub struct RegisterContext {
    values: Mutex<Vec<Option<u64>>>,
    writable: bool,
    /// 値をptraceでスレッドに書き戻す場合のスレッド
    pid: Option<Pid>,
}

impl Clone for RegisterContext {
    fn clone(&self) -> Self {
        Self {
            values: Mutex::new(self.values.lock().clone()),
            writable: self.writable,
            pid: self.pid,
        }
    }
}

impl Default for RegisterContext {
    fn default() -> Self {
        Self::empty()
    }
}

impl RegisterContext {
    /// どのレジスタも値を持たないコンテキスト
    pub fn empty() -> Self {
        Self {
            values: Mutex::new(vec![None; REGISTERS.len()]),
            writable: true,
            pid: None,
        }
    }

    /// pc / sp / fp だけを持つコンテキスト
    pub fn with_pc_sp_fp(pc: u64, sp: u64, fp: u64) -> Self {
        let ctx = Self::empty();
        {
            let mut values = ctx.values.lock();
            values[RIP] = Some(pc);
            values[RSP] = Some(sp);
            values[RBP] = Some(fp);
        }
        ctx
    }

    /// 名前を指定して値を設定したコピーを返す（未知の名前は無視する）
    pub fn with(self, name: &str, value: u64) -> Self {
        if let Some(index) = find_register_index(name) {
            self.values.lock()[index] = Some(value);
        }
        self
    }

    /// ptraceで読み取ったレジスタから作成する
    pub fn from_user_regs(regs: &nix::libc::user_regs_struct) -> Self {
        let values = vec![
            regs.rax,
            regs.rbx,
            regs.rcx,
            regs.rdx,
            regs.rdi,
            regs.rsi,
            regs.rbp,
            regs.rsp,
            regs.r8,
            regs.r9,
            regs.r10,
            regs.r11,
            regs.r12,
            regs.r13,
            regs.r14,
            regs.r15,
            regs.rip,
            regs.eflags,
            regs.cs,
            regs.ss,
            regs.ds,
            regs.es,
            regs.fs,
            regs.gs,
            regs.fs_base,
            regs.gs_base,
        ];

        Self {
            values: Mutex::new(values.into_iter().map(Some).collect()),
            writable: true,
            pid: None,
        }
    }

    /// 停止中のスレッドからレジスタを読み取る
    ///
    /// 書き込みはptrace経由でスレッドに反映されます。
    pub fn from_ptrace(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        let regs = nix::sys::ptrace::getregs(pid)?;
        let mut ctx = Self::from_user_regs(&regs);
        ctx.pid = Some(pid);
        Ok(ctx)
    }

    /// 読み取り専用にする（呼び出し元フレーム用）
    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self.pid = None;
        self
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// インデックスでレジスタ値を読み取る
    pub fn read(&self, index: usize) -> Option<u64> {
        self.values.lock().get(index).copied().flatten()
    }

    /// 名前または別名でレジスタ値を読み取る
    pub fn read_by_name(&self, name: &str) -> Option<u64> {
        self.read(find_register_index(name)?)
    }

    /// DWARFレジスタ番号でレジスタ値を読み取る
    pub fn read_dwarf(&self, regnum: u16) -> Option<u64> {
        let index = REGISTERS.iter().position(|r| r.dwarf == Some(regnum))?;
        self.read(index)
    }

    /// レジスタの説明を探す
    pub fn find_register(&self, name: &str) -> Option<&'static RegisterInfo> {
        find_register_index(name).map(|i| &REGISTERS[i])
    }

    /// レジスタセットの説明を探す
    pub fn find_set(&self, name: &str) -> Option<&'static RegisterSetInfo> {
        find_register_set_index(name).map(|i| &REGISTER_SETS[i])
    }

    /// レジスタセットに属し、値を持つレジスタ
    pub fn registers_in_set(&self, set: usize) -> Vec<(&'static RegisterInfo, u64)> {
        let values = self.values.lock();
        REGISTERS
            .iter()
            .zip(values.iter())
            .filter(|(info, _)| info.set == set)
            .filter_map(|(info, value)| value.map(|v| (info, v)))
            .collect()
    }

    pub fn pc(&self) -> Option<u64> {
        self.read(RIP)
    }

    pub fn sp(&self) -> Option<u64> {
        self.read(RSP)
    }

    pub fn fp(&self) -> Option<u64> {
        self.read(RBP)
    }

    /// プログラムカウンタを書き換える
    ///
    /// スレッドに接続されている場合はptraceで書き戻します。
    pub fn set_pc(&self, pc: u64) -> Result<()> {
        if !self.writable {
            return Err(anyhow::anyhow!("Registers of this frame are read-only"));
        }

        if let Some(pid) = self.pid {
            let mut regs = nix::sys::ptrace::getregs(pid)?;
            regs.rip = pc;
            nix::sys::ptrace::setregs(pid, regs)?;
            tracing::debug!(pid = pid.as_raw(), pc = format_args!("{:#x}", pc), "wrote pc through ptrace");
        }

        self.values.lock()[RIP] = Some(pc);
        Ok(())
    }
}
