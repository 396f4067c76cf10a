//! スレッドへの参照

use crate::errors::NO_VALUE;
use crate::frame::{Frame, API_LOG};
use framekit_target::{Thread, ThreadId};
use std::fmt;
use std::sync::{Arc, Weak};

/// スレッドへの弱参照
///
/// スレッドが終了すると無効になります。
#[derive(Debug, Clone, Default)]
pub struct ThreadRef {
    thread: Weak<Thread>,
}

impl ThreadRef {
    pub fn new(thread: Option<&Arc<Thread>>) -> Self {
        Self {
            thread: thread.map(Arc::downgrade).unwrap_or_default(),
        }
    }

    /// APIロックを取ってスレッドに対する操作を行う
    fn with_thread<R>(&self, f: impl FnOnce(&Arc<Thread>) -> R) -> Option<R> {
        let thread = self.thread.upgrade()?;
        let target = thread.target();
        let _lock = target.as_ref().map(|t| t.api_lock());
        Some(f(&thread))
    }

    pub fn is_valid(&self) -> bool {
        self.thread.upgrade().is_some()
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread.upgrade().map(|t| t.tid())
    }

    pub fn name(&self) -> Option<String> {
        self.thread.upgrade()?.name().map(|s| s.to_string())
    }

    pub fn num_frames(&self) -> usize {
        let count = self.with_thread(|t| t.frame_count()).unwrap_or(0);
        tracing::debug!(target: API_LOG, tid = ?self.thread_id(), "ThreadRef::num_frames => {}", count);
        count
    }

    /// 番号でフレームを取得し、ハンドルを作成する
    pub fn frame_at_index(&self, index: u32) -> Frame {
        let frame = self
            .with_thread(|t| Frame::from_stack_frame(t.frame_at_index(index).as_ref()))
            .unwrap_or_default();
        tracing::debug!(
            target: API_LOG,
            tid = ?self.thread_id(),
            index,
            frame = %frame.stack_id().map(|id| id.to_string()).unwrap_or_else(|| "null".to_string()),
            "ThreadRef::frame_at_index"
        );
        frame
    }

    /// すべてのフレームのハンドル
    pub fn frames(&self) -> Vec<Frame> {
        self.with_thread(|t| {
            t.frames()
                .iter()
                .map(|f| Frame::from_stack_frame(Some(f)))
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn description(&self) -> String {
        self.with_thread(|t| {
            let mut desc = format!("thread #{}", t.tid());
            if let Some(name) = t.name() {
                desc.push_str(&format!(", name = '{}'", name));
            }
            desc.push_str(&format!(", frames = {}", t.frame_count()));
            desc
        })
        .unwrap_or_else(|| NO_VALUE.to_string())
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
