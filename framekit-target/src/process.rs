//! プロセス制御機能

use crate::unwind::unwind_frame_pointers;
use crate::{Memory, RegisterContext, Result, Target, Thread};
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// 停止イベントの種類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// SIGTRAP
    Trap,
    /// シグナル受信
    Signal(Signal),
    /// プロセス終了
    Exited(i32),
    /// その他の停止
    Other,
}

impl From<WaitStatus> for StopReason {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => StopReason::Trap,
            WaitStatus::Stopped(_, signal) => StopReason::Signal(signal),
            WaitStatus::Exited(_, code) => StopReason::Exited(code),
            WaitStatus::Signaled(_, signal, _) => StopReason::Signal(signal),
            _ => StopReason::Other,
        }
    }
}

/// デバッグ対象のプロセス
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    running: AtomicBool,
}

impl Process {
    /// 既存のプロセスにアタッチし、停止するまで待つ
    pub fn attach(pid: i32) -> Result<Self> {
        let pid = Pid::from_raw(pid);
        nix::sys::ptrace::attach(pid)?;
        let status = waitpid(pid, None)?;
        tracing::debug!(pid = pid.as_raw(), ?status, "attached");

        Ok(Self {
            pid,
            running: AtomicBool::new(false),
        })
    }

    /// プロセスIDを取得する
    pub fn pid(&self) -> i32 {
        self.pid.as_raw()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// プロセスのメモリ
    pub fn memory(&self) -> Memory {
        Memory::new(self.pid())
    }

    /// /proc/pid/comm のプロセス名
    pub fn name(&self) -> Option<String> {
        std::fs::read_to_string(format!("/proc/{}/comm", self.pid))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// プロセスを実行継続する
    pub fn resume(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        nix::sys::ptrace::cont(self.pid, None)?;
        self.running.store(true, Ordering::Release);
        tracing::debug!(pid = self.pid(), "resumed");
        Ok(())
    }

    /// 実行中のプロセスを停止させ、停止を待つ
    pub fn interrupt(&self) -> Result<StopReason> {
        if !self.is_running() {
            return Ok(StopReason::Other);
        }
        nix::sys::signal::kill(self.pid, Signal::SIGSTOP)?;
        let reason = StopReason::from(waitpid(self.pid, None)?);
        self.running.store(false, Ordering::Release);
        tracing::debug!(pid = self.pid(), ?reason, "interrupted");
        Ok(reason)
    }

    /// 停止中のメインスレッドの状態をターゲットに反映する
    ///
    /// レジスタを読み取り、スタックをアンワインドして、スレッドのフレームを作り直します。
    pub fn capture(&self, target: &Arc<Target>) -> Result<Arc<Thread>> {
        if self.is_running() {
            return Err(anyhow::anyhow!("Process {} is running", self.pid));
        }

        let registers = RegisterContext::from_ptrace(self.pid())?;
        let memory = self.memory();
        let specs = unwind_frame_pointers(&memory, registers, target.settings().max_frames);

        let thread = match target.thread(self.pid()) {
            Some(thread) => thread,
            None => target.create_thread(self.pid(), self.name()),
        };

        let _lock = target.api_lock();
        thread.set_frames(specs);
        target.bump_stop_id();
        Ok(thread)
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.interrupt();
        }
        let _ = nix::sys::ptrace::detach(self.pid, None);
    }
}
