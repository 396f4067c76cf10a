//! 実行コンテキスト
//!
//! 解決済みのフレームから、そのスレッドとターゲットをまとめて取り出します。

use framekit_target::{StackFrame, Target, Thread};
use std::sync::Arc;

/// フレーム・スレッド・ターゲットの組
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    target: Option<Arc<Target>>,
    thread: Option<Arc<Thread>>,
    frame: Option<Arc<StackFrame>>,
}

impl ExecutionContext {
    pub fn from_frame(frame: Option<Arc<StackFrame>>) -> Self {
        let thread = frame.as_ref().and_then(|f| f.thread());
        let target = thread.as_ref().and_then(|t| t.target());
        Self { target, thread, frame }
    }

    pub fn thread(&self) -> Option<&Arc<Thread>> {
        self.thread.as_ref()
    }

    /// フレームとターゲットが両方ある場合だけ返す
    pub fn frame_and_target(&self) -> Option<(&Arc<StackFrame>, &Arc<Target>)> {
        Some((self.frame.as_ref()?, self.target.as_ref()?))
    }
}
