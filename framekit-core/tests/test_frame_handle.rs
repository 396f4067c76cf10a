//! フレームハンドルの解決・同一性・等価性のテスト

mod common;

use common::{restop, stopped, LEAF_CFA, MAIN_CFA, TID};
use framekit_core::{Frame, StackId};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_resolve_live_frame() {
    let (_target, thread) = stopped();
    let frame0 = thread.frame_at_index(0).unwrap();
    let handle = Frame::from_stack_frame(Some(&frame0));

    let resolved = handle.stack_frame().unwrap();
    assert!(Arc::ptr_eq(&resolved, &frame0));
    assert!(handle.is_valid());
}

#[test]
fn test_identity_is_stable() {
    let (_target, thread) = stopped();
    let handle = Frame::from_stack_frame(thread.frame_at_index(1).as_ref());
    let id = handle.stack_id().unwrap();
    assert_eq!(id.tid, TID);
    assert_eq!(id.cfa, MAIN_CFA);

    thread.clear_frames();
    assert_eq!(handle.stack_id(), Some(id));
    assert!(!handle.is_valid());

    thread.set_frames(common::specs());
    assert_eq!(handle.stack_id(), Some(id));
    assert_eq!(handle.stack_frame().unwrap().stack_id(), id);
}

#[test]
fn test_thread_one_frame_zero_scenario() {
    let (_target, thread) = stopped();
    let handle = Frame::from_stack_frame(thread.frame_at_index(0).as_ref());
    let original = handle.stack_frame().unwrap();
    assert_eq!(original.index(), 0);

    // 停止・再開でフレーム0のオブジェクトが置き換わる
    restop(&thread);
    let replacement = thread.frame_at_index(0).unwrap();
    assert!(!Arc::ptr_eq(&original, &replacement));

    let resolved = handle.stack_frame().unwrap();
    assert!(Arc::ptr_eq(&resolved, &replacement));

    let fresh = Frame::from_stack_frame(thread.frame_at_index(0).as_ref());
    assert!(handle == fresh);
    assert_eq!(fresh.stack_id().map(|id| id.cfa), Some(LEAF_CFA));
}

#[test]
fn test_fast_path_skips_identity_lookup() {
    let (_target, thread) = stopped();
    let frame1 = thread.frame_at_index(1).unwrap();
    let handle = Frame::from_stack_frame(Some(&frame1));

    let before = thread.identity_lookup_count();
    for _ in 0..3 {
        assert!(Arc::ptr_eq(&handle.stack_frame().unwrap(), &frame1));
    }
    assert_eq!(thread.identity_lookup_count(), before);
}

#[test]
fn test_slow_path_refreshes_cached_frame() {
    let (_target, thread) = stopped();
    let handle = Frame::from_stack_frame(thread.frame_at_index(1).as_ref());
    restop(&thread);

    let before = thread.identity_lookup_count();
    let first = handle.stack_frame().unwrap();
    assert_eq!(thread.identity_lookup_count(), before + 1);

    // 2回目は保持し直したフレームが使われる
    let second = handle.stack_frame().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(thread.identity_lookup_count(), before + 1);
}

#[test]
fn test_unmatched_identity_is_empty() {
    let (_target, thread) = stopped();
    let handle = Frame::from_stack_frame(thread.frame_at_index(1).as_ref());

    // main のフレームがなくなった停止
    thread.set_frames(common::specs().into_iter().take(1).collect());
    assert!(handle.stack_frame().is_none());
    assert!(handle.stack_id().is_some());

    // 同じ位置のフレームが戻れば再び解決できる
    thread.set_frames(common::specs());
    assert!(handle.is_valid());
}

#[test]
fn test_thread_death_is_permanent() {
    let (target, thread) = stopped();
    let handle = Frame::from_stack_frame(thread.frame_at_index(0).as_ref());

    drop(target.remove_thread(TID));
    drop(thread);
    assert!(handle.stack_frame().is_none());
    assert!(!handle.is_valid());

    // 同じIDで新しいスレッドができても、終了したスレッドへの参照は戻らない
    let reborn = target.create_thread(TID, Some("thread-1".to_string()));
    reborn.set_frames(common::specs());
    assert!(handle.stack_frame().is_none());
    assert!(handle.stack_id().is_some());
}

#[test]
fn test_equality_is_partial() {
    let (_target, thread) = stopped();
    let a = Frame::from_stack_frame(thread.frame_at_index(0).as_ref());
    let b = Frame::from_stack_frame(thread.frame_at_index(0).as_ref());
    let other = Frame::from_stack_frame(thread.frame_at_index(1).as_ref());

    assert!(a == b);
    assert!(a.is_equal(&b));
    assert!(a != other);

    let empty = Frame::new();
    assert!(empty != Frame::new());
    assert!(!empty.is_equal(&empty));
    assert!(empty != a);
    assert!(a != empty);

    // 解決できなくなったハンドルは自分自身とも等しくない
    thread.clear_frames();
    assert!(!a.is_equal(&a));
    assert!(a != b);
}

#[test]
fn test_rebind() {
    let (_target, thread) = stopped();
    let mut handle = Frame::from_stack_frame(thread.frame_at_index(0).as_ref());
    let shared = handle.clone();

    let frame1 = thread.frame_at_index(1).unwrap();
    handle.set_stack_frame(Some(&frame1));
    assert_eq!(shared.stack_id(), Some(frame1.stack_id()));
    assert!(Arc::ptr_eq(&shared.stack_frame().unwrap(), &frame1));

    // None で空になるのはこのハンドルだけ
    handle.set_stack_frame(None);
    assert!(handle.stack_id().is_none());
    assert!(handle.stack_frame().is_none());
    assert!(shared.is_valid());
    assert_eq!(shared.stack_id(), Some(frame1.stack_id()));
}

#[test]
fn test_rebind_during_identity_lookup() {
    let (target, thread) = stopped();
    let mut handle = Frame::from_stack_frame(thread.frame_at_index(0).as_ref());
    let resolver = handle.clone();

    let guard = target.api_lock();
    // 保持しているフレームが無効になり、解決は探し直しでAPIロックを待つ
    restop(&thread);
    let frame1 = thread.frame_at_index(1).unwrap();

    let pending = std::thread::spawn(move || resolver.stack_frame().map(|f| f.stack_id()));
    std::thread::sleep(Duration::from_millis(50));
    handle.set_stack_frame(Some(&frame1));
    drop(guard);

    let resolved = pending.join().unwrap();
    assert_eq!(resolved, Some(frame1.stack_id()));

    let expected = handle.stack_id().unwrap();
    assert_eq!(expected.cfa, MAIN_CFA);
    for _ in 0..3 {
        let frame = handle.stack_frame().unwrap();
        assert_eq!(frame.stack_id(), expected);
        assert!(Arc::ptr_eq(&frame, &frame1));
    }
}

#[test]
fn test_clear_detaches_only_this_handle() {
    let (_target, thread) = stopped();
    let handle = Frame::from_stack_frame(thread.frame_at_index(0).as_ref());
    let mut copy = handle.clone();

    copy.clear();
    assert!(!copy.is_valid());
    assert!(copy.stack_id().is_none());
    assert!(handle.is_valid());
}

#[test]
fn test_handle_drop_leaves_frame_alive() {
    let (_target, thread) = stopped();
    let frame0 = thread.frame_at_index(0).unwrap();
    {
        let handles: Vec<Frame> = (0..4).map(|_| Frame::from_stack_frame(Some(&frame0))).collect();
        assert!(handles.iter().all(|h| h.is_valid()));
    }
    assert!(Arc::ptr_eq(&thread.frame_at_index(0).unwrap(), &frame0));
    assert_eq!(thread.frame_count(), 2);
}

#[test]
fn test_first_match_wins_for_duplicate_identity() {
    let (_target, thread) = stopped();
    let leaf = common::specs().remove(0);
    thread.set_frames(vec![leaf.clone(), leaf]);

    let handle = Frame::from_stack_frame(thread.frame_at_index(1).as_ref());
    let expected: StackId = handle.stack_id().unwrap();
    restop_with_duplicates(&thread);

    let resolved = handle.stack_frame().unwrap();
    assert_eq!(resolved.stack_id(), expected);
    assert_eq!(resolved.index(), 0);
}

fn restop_with_duplicates(thread: &Arc<framekit_target::Thread>) {
    let leaf = common::specs().remove(0);
    thread.clear_frames();
    thread.set_frames(vec![leaf.clone(), leaf]);
}

#[test]
fn test_api_lock_is_reentrant() {
    let (target, thread) = stopped();
    let handle = Frame::from_stack_frame(thread.frame_at_index(0).as_ref());

    let _guard = target.api_lock();
    assert!(handle.is_valid());
    assert_eq!(handle.frame_id(), 0);
}

#[test]
fn test_resolve_while_frames_are_rebuilt() {
    let (_target, thread) = stopped();
    let handle = Frame::from_stack_frame(thread.frame_at_index(1).as_ref());

    std::thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..200 {
                restop(&thread);
            }
        });
        for _ in 0..4 {
            let handle = handle.clone();
            s.spawn(move || {
                for _ in 0..200 {
                    if let Some(frame) = handle.stack_frame() {
                        assert_eq!(frame.stack_id(), handle.stack_id().unwrap());
                    }
                }
            });
        }
    });

    assert!(handle.is_valid());
}
