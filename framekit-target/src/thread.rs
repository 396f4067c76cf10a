//! スレッド管理機能

use crate::{FrameSpec, StackFrame, StackId, Target};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// スレッドID
pub type ThreadId = i32;

/// デバッグ対象のスレッド
///
/// 停止中はスタックフレームの一覧を持ちます。フレームは停止のたびに作り直されます。
#[derive(Debug)]
pub struct Thread {
    tid: ThreadId,
    name: Option<String>,
    target: Weak<Target>,
    frames: Mutex<Vec<Arc<StackFrame>>>,
    /// frame_with_stack_id が呼ばれた回数
    identity_lookups: AtomicUsize,
}

impl Thread {
    pub(crate) fn new(tid: ThreadId, name: Option<String>, target: Weak<Target>) -> Self {
        Self {
            tid,
            name,
            target,
            frames: Mutex::new(Vec::new()),
            identity_lookups: AtomicUsize::new(0),
        }
    }

    /// スレッドIDを取得する
    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn target(&self) -> Option<Arc<Target>> {
        self.target.upgrade()
    }

    /// 現在のフレーム数
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// 番号でフレームを取得する
    pub fn frame_at_index(&self, index: u32) -> Option<Arc<StackFrame>> {
        self.frames.lock().get(index as usize).cloned()
    }

    /// 現在のすべてのフレーム
    pub fn frames(&self) -> Vec<Arc<StackFrame>> {
        self.frames.lock().clone()
    }

    /// 同一性でフレームを探す
    ///
    /// 複数のフレームが一致した場合はスタック順で最初のもの（最も内側）を返します。
    pub fn frame_with_stack_id(&self, stack_id: &StackId) -> Option<Arc<StackFrame>> {
        self.identity_lookups.fetch_add(1, Ordering::Relaxed);

        let found = self
            .frames
            .lock()
            .iter()
            .find(|f| f.stack_id() == *stack_id)
            .cloned();

        tracing::trace!(
            tid = self.tid,
            stack_id = %stack_id,
            found = found.as_ref().map(|f| f.index()),
            "frame lookup by identity"
        );
        found
    }

    /// frame_with_stack_id の呼び出し回数
    pub fn identity_lookup_count(&self) -> usize {
        self.identity_lookups.load(Ordering::Relaxed)
    }

    /// 停止イベント: フレームをすべて作り直す
    pub fn set_frames(self: &Arc<Self>, specs: Vec<FrameSpec>) {
        let target = self.target();
        let frames: Vec<Arc<StackFrame>> = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Arc::new(StackFrame::new(index as u32, spec, self, target.as_ref())))
            .collect();

        tracing::debug!(tid = self.tid, frames = frames.len(), "rebuilt stack frames");
        *self.frames.lock() = frames;
    }

    /// 再開イベント: フレームを破棄する
    pub fn clear_frames(&self) {
        tracing::debug!(tid = self.tid, "cleared stack frames");
        self.frames.lock().clear();
    }
}
