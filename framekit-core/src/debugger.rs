//! デバッガのメインロジック

use crate::thread::ThreadRef;
use crate::Result;
use framekit_symbols::{Module, Symbol};
use framekit_target::{Process, StopReason, Target, TargetSettings, ThreadId};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// デバッガ
///
/// ターゲットと、アタッチしている場合はそのプロセスを所有します。
#[derive(Debug)]
pub struct Debugger {
    target: Arc<Target>,
    /// デバッグ対象プロセス
    process: Option<Process>,
    /// 読み込んだ実行ファイル
    binary: Option<PathBuf>,
}

impl Debugger {
    /// 新しいデバッガを作成する
    pub fn new() -> Self {
        Self::with_settings(TargetSettings::default())
    }

    pub fn with_settings(settings: TargetSettings) -> Self {
        Self {
            target: Target::with_settings(settings),
            process: None,
            binary: None,
        }
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    pub fn process(&self) -> Option<&Process> {
        self.process.as_ref()
    }

    fn require_process(&self) -> Result<&Process> {
        self.process
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Not attached to a process"))
    }

    /// 既存のプロセスにアタッチし、停止状態のフレームを取り込む
    pub fn attach(&mut self, pid: i32) -> Result<ThreadRef> {
        let process = Process::attach(pid)?;
        self.target.set_memory(Arc::new(process.memory()));
        self.process = Some(process);
        self.apply_load_bias()?;

        let thread = self.require_process()?.capture(&self.target)?;
        Ok(ThreadRef::new(Some(&thread)))
    }

    /// ELFバイナリからモジュールを読み込む
    pub fn load_binary<P: AsRef<Path>>(&mut self, path: P) -> Result<Arc<Module>> {
        let path = path.as_ref();
        let module = Arc::new(Module::load(path)?);
        self.binary = Some(path.to_path_buf());
        self.target.add_module(Arc::clone(&module));
        self.apply_load_bias()?;
        Ok(module)
    }

    /// PIEモジュールに実行時のベースアドレスを設定する
    fn apply_load_bias(&self) -> Result<()> {
        let Some(process) = &self.process else {
            return Ok(());
        };
        let memory = process.memory();

        for module in self.target.modules().iter().filter(|m| m.is_pie()) {
            let bias = memory.base_address(module.path().or(self.binary.as_deref()))?;
            module.set_load_bias(bias);
            tracing::debug!(module = module.name(), bias = format_args!("{:#x}", bias), "applied load bias");
        }
        Ok(())
    }

    /// 実行中のプロセスを停止させ、フレームを取り込む
    pub fn interrupt(&self) -> Result<StopReason> {
        let process = self.require_process()?;
        let reason = process.interrupt()?;
        if !matches!(reason, StopReason::Exited(_)) {
            process.capture(&self.target)?;
        }
        Ok(reason)
    }

    /// プロセスを実行継続する（すべてのスレッドのフレームは破棄される）
    pub fn resume(&self) -> Result<()> {
        let process = self.require_process()?;
        {
            let _lock = self.target.api_lock();
            for thread in self.target.threads() {
                thread.clear_frames();
            }
        }
        process.resume()
    }

    pub fn threads(&self) -> Vec<ThreadRef> {
        self.target
            .threads()
            .iter()
            .map(|t| ThreadRef::new(Some(t)))
            .collect()
    }

    pub fn thread(&self, tid: ThreadId) -> ThreadRef {
        ThreadRef::new(self.target.thread(tid).as_ref())
    }

    /// 最初のスレッド（アタッチしたメインスレッド）
    pub fn selected_thread(&self) -> ThreadRef {
        ThreadRef::new(self.target.threads().first())
    }

    /// パターンにマッチするシンボルを検索する
    pub fn find_symbols(&self, pattern: &str) -> Vec<(Arc<Module>, Symbol)> {
        self.target.modules().find_symbols(pattern)
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}
