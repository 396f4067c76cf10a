//! 実行ターゲット
//!
//! スレッド、モジュール、メモリ、式の結果を所有し、API全体で共有するロックを提供します。

use crate::{Thread, ThreadId};
use framekit_symbols::{
    MemoryReader, Module, ModuleList, NoMemory, SymbolContext, SymbolContextItem, TypeInfo,
};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock, RwLockReadGuard};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// 逆アセンブルの構文
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisassemblySyntax {
    #[default]
    Intel,
    Att,
}

impl FromStr for DisassemblySyntax {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "intel" => Ok(Self::Intel),
            "att" | "at&t" => Ok(Self::Att),
            other => Err(anyhow::anyhow!("Unknown disassembly syntax '{}'", other)),
        }
    }
}

impl fmt::Display for DisassemblySyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intel => f.write_str("intel"),
            Self::Att => f.write_str("att"),
        }
    }
}

/// ターゲットの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSettings {
    pub disassembly_syntax: DisassemblySyntax,
    /// アンワインドするフレーム数の上限
    pub max_frames: usize,
    /// 関数が不明な場合に逆アセンブルするバイト数
    pub disassembly_window: usize,
    /// 値の子要素を表示する上限
    pub max_children: usize,
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            disassembly_syntax: DisassemblySyntax::Intel,
            max_frames: 256,
            disassembly_window: 32,
            max_children: 64,
        }
    }
}

/// 式評価の結果として保存された値（$0, $1, ...）
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentVariable {
    pub name: String,
    pub type_info: TypeInfo,
    pub data: Vec<u8>,
}

/// 実行ターゲット
pub struct Target {
    /// APIロック（同じスレッドからの再取得を許す）
    api_lock: ReentrantMutex<()>,
    threads: Mutex<Vec<Arc<Thread>>>,
    modules: RwLock<ModuleList>,
    memory: RwLock<Arc<dyn MemoryReader>>,
    settings: RwLock<TargetSettings>,
    persistent: Mutex<Vec<PersistentVariable>>,
    stop_id: AtomicU32,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("threads", &self.threads.lock().len())
            .field("modules", &self.modules.read().len())
            .field("stop_id", &self.stop_id())
            .finish()
    }
}

impl Target {
    pub fn new() -> Arc<Self> {
        Self::with_settings(TargetSettings::default())
    }

    pub fn with_settings(settings: TargetSettings) -> Arc<Self> {
        Arc::new(Self {
            api_lock: ReentrantMutex::new(()),
            threads: Mutex::new(Vec::new()),
            modules: RwLock::new(ModuleList::new()),
            memory: RwLock::new(Arc::new(NoMemory)),
            settings: RwLock::new(settings),
            persistent: Mutex::new(Vec::new()),
            stop_id: AtomicU32::new(0),
        })
    }

    /// APIロックを取得する
    ///
    /// ガードが破棄されるまで保持されます。
    pub fn api_lock(&self) -> ReentrantMutexGuard<'_, ()> {
        self.api_lock.lock()
    }

    /// スレッドを作成して登録する（同じIDのスレッドは置き換える）
    pub fn create_thread(self: &Arc<Self>, tid: ThreadId, name: Option<String>) -> Arc<Thread> {
        let thread = Arc::new(Thread::new(tid, name, Arc::downgrade(self)));
        let mut threads = self.threads.lock();
        threads.retain(|t| t.tid() != tid);
        threads.push(Arc::clone(&thread));
        tracing::debug!(tid, "created thread");
        thread
    }

    /// スレッドを登録から外す（スレッドの終了）
    pub fn remove_thread(&self, tid: ThreadId) -> Option<Arc<Thread>> {
        let mut threads = self.threads.lock();
        let pos = threads.iter().position(|t| t.tid() == tid)?;
        tracing::debug!(tid, "removed thread");
        Some(threads.remove(pos))
    }

    pub fn thread(&self, tid: ThreadId) -> Option<Arc<Thread>> {
        self.threads.lock().iter().find(|t| t.tid() == tid).cloned()
    }

    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.threads.lock().clone()
    }

    /// モジュールを追加する
    pub fn add_module(&self, module: Arc<Module>) {
        tracing::debug!(module = module.name(), bias = format_args!("{:#x}", module.load_bias()), "added module");
        self.modules.write().add(module);
    }

    pub fn modules(&self) -> RwLockReadGuard<'_, ModuleList> {
        self.modules.read()
    }

    /// ロードアドレスのシンボルコンテキスト
    pub fn resolve_load_address(&self, load_addr: u64, scope: SymbolContextItem) -> SymbolContext {
        self.modules.read().resolve(load_addr, scope)
    }

    pub fn memory(&self) -> Arc<dyn MemoryReader> {
        Arc::clone(&self.memory.read())
    }

    pub fn set_memory(&self, memory: Arc<dyn MemoryReader>) {
        *self.memory.write() = memory;
    }

    pub fn settings(&self) -> TargetSettings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: TargetSettings) {
        *self.settings.write() = settings;
    }

    /// 式の結果を保存し、付けた名前（$N）を返す
    pub fn add_persistent_result(&self, type_info: TypeInfo, data: Vec<u8>) -> PersistentVariable {
        let mut persistent = self.persistent.lock();
        let var = PersistentVariable {
            name: format!("${}", persistent.len()),
            type_info,
            data,
        };
        persistent.push(var.clone());
        var
    }

    /// 名前で保存済みの結果を探す
    pub fn persistent_result(&self, name: &str) -> Option<PersistentVariable> {
        self.persistent.lock().iter().find(|v| v.name == name).cloned()
    }

    /// 停止の回数
    pub fn stop_id(&self) -> u32 {
        self.stop_id.load(Ordering::Acquire)
    }

    /// 停止を記録する
    pub fn bump_stop_id(&self) -> u32 {
        self.stop_id.fetch_add(1, Ordering::AcqRel) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_lock_is_reentrant() {
        let target = Target::new();
        let _outer = target.api_lock();
        let _inner = target.api_lock();
    }

    #[test]
    fn test_threads() {
        let target = Target::new();
        let thread = target.create_thread(1, Some("main".to_string()));
        assert_eq!(thread.target().map(|t| Arc::ptr_eq(&t, &target)), Some(true));
        assert!(target.thread(1).is_some());

        let replaced = target.create_thread(1, None);
        assert_eq!(target.threads().len(), 1);
        assert!(Arc::ptr_eq(&target.thread(1).unwrap(), &replaced));

        assert!(target.remove_thread(1).is_some());
        assert!(target.thread(1).is_none());
        assert!(target.remove_thread(1).is_none());
    }

    #[test]
    fn test_persistent_results() {
        let target = Target::new();
        let first = target.add_persistent_result(TypeInfo::primitive("i32", 4), vec![1, 0, 0, 0]);
        let second = target.add_persistent_result(TypeInfo::primitive("i32", 4), vec![2, 0, 0, 0]);
        assert_eq!(first.name, "$0");
        assert_eq!(second.name, "$1");
        assert_eq!(target.persistent_result("$1").map(|v| v.data), Some(vec![2, 0, 0, 0]));
        assert!(target.persistent_result("$2").is_none());
    }

    #[test]
    fn test_settings() {
        let target = Target::new();
        assert_eq!(target.settings().disassembly_syntax, DisassemblySyntax::Intel);
        target.set_settings(TargetSettings {
            disassembly_syntax: "att".parse().unwrap(),
            ..TargetSettings::default()
        });
        assert_eq!(target.settings().disassembly_syntax, DisassemblySyntax::Att);
        assert!("arm".parse::<DisassemblySyntax>().is_err());
    }

    #[test]
    fn test_stop_id() {
        let target = Target::new();
        assert_eq!(target.stop_id(), 0);
        assert_eq!(target.bump_stop_id(), 1);
        assert_eq!(target.stop_id(), 1);
    }
}
