// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_grabber::{
    channel::{Direction, TransferChannel},
    dummy::DummyChannel,
    memory::{page_size, round_up, ExternalBuffer, SECTOR_SIZE},
    ring::Ring,
    tracker::CompletionTracker,
    Error,
};
use serial_test::serial;
use std::{
    error::Error as StdError,
    time::{Duration, Instant},
};

type TestResult = Result<(), Box<dyn StdError>>;

/// Channel whose frames carry their transfer number in the first byte.
fn marked_channel() -> DummyChannel {
    let channel = DummyChannel::new();
    channel.set_frame_filler(|n, buf| buf[0] = n as u8);
    channel
}

fn leaked(len: usize) -> ExternalBuffer {
    ExternalBuffer::from(Box::leak(vec![0u8; len].into_boxed_slice()))
}

#[test]
fn test_tracker_slot_index() -> TestResult {
    let tracker = CompletionTracker::new(4, 0);
    assert_eq!(tracker.slot_index(0), Some(3));
    assert_eq!(tracker.slot_index(1), Some(0));
    assert_eq!(tracker.slot_index(4), Some(3));
    assert_eq!(tracker.slot_index(5), Some(0));
    assert_eq!(tracker.slot_index(1_000_002), Some(1));

    let empty = CompletionTracker::default();
    assert_eq!(empty.slot_index(7), None);
    assert!(!empty.overrun_at(100));
    Ok(())
}

#[test]
fn test_tracker_overrun_boundary() -> TestResult {
    let tracker = CompletionTracker::new(4, 10);
    assert!(!tracker.overrun_at(13));
    assert!(tracker.overrun_at(14));
    assert!(tracker.overrun_at(20));
    Ok(())
}

#[test]
fn test_tracker_active_slot() -> TestResult {
    let tracker = CompletionTracker::new(4, 0);
    // Transfer queued: the next slot is being written.
    assert_eq!(tracker.current_active_slot(2, 5), Some(2));
    // Idle after finishing everything queued.
    assert_eq!(tracker.current_active_slot(2, 2), Some(1));
    // Nothing ever queued.
    assert_eq!(tracker.current_active_slot(2, 0), Some(2));
    Ok(())
}

#[test]
fn test_configure_disable() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());

    ring.configure_separate(1024, 4, Direction::Read, None)?;
    assert_eq!(ring.ring_size(), 4);
    assert_eq!(channel.buffer_count(), 4);
    assert_eq!(channel.registered_count(), 4);
    for slot in ring.pool().slots() {
        assert!(slot.owned());
        assert_eq!(slot.size(), 1024);
        assert_eq!(slot.as_ptr() as usize % page_size(), 0);
        assert_eq!(channel.registered_address(slot.index()), Some(slot.as_ptr()));
    }

    ring.disable();
    assert_eq!(ring.ring_size(), 0);
    assert!(!ring.pool().is_configured());
    assert_eq!(channel.registered_count(), 0);
    assert_eq!(channel.buffer_count(), 0);

    // Idempotent.
    ring.disable();
    assert_eq!(channel.registered_count(), 0);
    Ok(())
}

#[test]
fn test_drop_releases_slots() -> TestResult {
    let channel = DummyChannel::new();
    {
        let mut ring = Ring::new(channel.clone());
        ring.configure_separate(512, 3, Direction::Read, None)?;
        assert_eq!(channel.registered_count(), 3);
    }
    assert_eq!(channel.registered_count(), 0);
    assert_eq!(channel.buffer_count(), 0);
    Ok(())
}

#[test]
fn test_configure_rejects() -> TestResult {
    let channel = DummyChannel::with_max_buffers(8);
    let mut ring = Ring::new(channel.clone());

    for (bufsize, numbufs) in [(1023, 4), (0, 4), (1024, 0), (1024, 9)] {
        let err = ring
            .configure_separate(bufsize, numbufs, Direction::Read, None)
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{err}");
        assert_eq!(channel.registered_count(), 0);
        assert_eq!(channel.buffer_count(), 0);
    }

    ring.configure_separate(1024, 8, Direction::Read, None)?;
    let err = ring
        .configure_separate(1024, 2, Direction::Read, None)
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(ring.ring_size(), 8);
    Ok(())
}

#[test]
fn test_configure_while_running() -> TestResult {
    let channel = DummyChannel::new();
    let mut running = Ring::new(channel.clone());
    running.configure_separate(1024, 2, Direction::Read, None)?;
    running.start(10)?;

    let mut other = Ring::new(channel.clone());
    let err = other
        .configure_separate(1024, 2, Direction::Read, None)
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(channel.registered_count(), 2);
    Ok(())
}

#[test]
fn test_registration_failure_rolls_back() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());

    channel.fail_command(Some("register_buffer"));
    let err = ring
        .configure_separate(1024, 4, Direction::Read, None)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::HardwareCommandFailed {
            command: "register_buffer",
            ..
        }
    ));
    assert!(!ring.pool().is_configured());
    assert_eq!(channel.registered_count(), 0);
    assert_eq!(channel.buffer_count(), 0);

    assert!(ring
        .configure_block(1024, 4, Direction::Read, 64, true, None)
        .is_err());
    assert!(!ring.pool().is_configured());
    assert!(ring.pool().block_base().is_none());
    assert_eq!(channel.buffer_count(), 0);

    channel.fail_command(None);
    ring.configure_separate(1024, 4, Direction::Read, None)?;
    assert_eq!(channel.registered_count(), 4);
    assert_eq!(channel.buffer_count(), 4);
    Ok(())
}

#[test]
fn test_add_slot_failure_restores_ring_size() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.add_slot(256, Direction::Read, None)?;
    ring.add_slot(256, Direction::Read, None)?;

    channel.fail_command(Some("register_buffer"));
    assert!(ring.add_slot(256, Direction::Read, None).is_err());
    channel.fail_command(None);

    assert_eq!(ring.pool().numbufs(), 2);
    assert_eq!(ring.ring_size(), 2);
    assert_eq!(channel.buffer_count(), 2);
    assert_eq!(channel.registered_count(), 2);

    assert_eq!(ring.add_slot(256, Direction::Read, None)?, 2);
    assert_eq!(channel.buffer_count(), 3);
    Ok(())
}

#[test]
fn test_block_size_overflow() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());

    let huge = usize::MAX - 1;
    assert!(matches!(
        ring.configure_block(huge, 2, Direction::Read, 0, false, None),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        ring.configure_block(usize::MAX / 2 & !1, 4, Direction::Read, 512, true, None),
        Err(Error::Configuration(_))
    ));
    assert!(!ring.pool().is_configured());
    assert_eq!(channel.buffer_count(), 0);
    Ok(())
}

#[test]
fn test_not_configured() -> TestResult {
    let mut ring = Ring::new(DummyChannel::new());
    assert!(matches!(ring.start(1), Err(Error::NoRingConfigured)));
    assert!(matches!(
        ring.wait_for(1, Some(Duration::from_millis(1))),
        Err(Error::NoRingConfigured)
    ));
    assert!(matches!(ring.peek_latest(None), Err(Error::NoRingConfigured)));
    assert!(ring.check_available(1).is_none());
    assert!(!ring.overrun());
    assert_eq!(ring.slot_index(1), None);
    assert!(matches!(ring.next_write_slot(), Err(Error::NoRingConfigured)));
    Ok(())
}

#[test]
#[serial]
fn test_slot_cycle_then_timeout() -> TestResult {
    let channel = marked_channel();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(1024, 4, Direction::Read, None)?;
    ring.start(4)?;
    assert_eq!(channel.complete(10), 4);

    for expected in 0..4u32 {
        let slot = ring.wait_for(1, Some(Duration::from_millis(100)))?;
        assert_eq!(slot.index(), expected);
        assert_eq!(slot.completion(), u64::from(expected) + 1);
        assert_eq!(slot.len(), 1024);
        assert_eq!(slot[0], expected as u8);
    }

    let start = Instant::now();
    let result = ring.wait_for(1, Some(Duration::from_millis(10)));
    assert!(start.elapsed() < Duration::from_millis(500));
    match result {
        Err(Error::TimedOut { target, slot }) => {
            assert_eq!(target, 5);
            assert_eq!(slot, 0);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    // The consumed count moved past the missing frame.
    assert_eq!(ring.consumed_count(), 5);
    assert_eq!(ring.done_count(), 4);
    Ok(())
}

#[test]
#[serial]
fn test_caller_buffers() -> TestResult {
    let channel = marked_channel();
    let buffers = [leaked(256), leaked(256), leaked(256)];
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(256, 3, Direction::Read, Some(&buffers))?;

    for (slot, buf) in ring.pool().slots().iter().zip(&buffers) {
        assert!(!slot.owned());
        assert_eq!(slot.as_ptr(), buf.as_ptr());
    }

    ring.start(5)?;
    channel.complete(5);
    // Slots 0 and 1 were written twice; the oldest frames are lost.
    assert!(ring.overrun());
    ring.set_consumed(2);
    assert!(ring.overrun());
    ring.set_consumed(3);
    assert!(!ring.overrun());

    let slot = ring.wait_for(1, None)?;
    assert_eq!(slot.index(), 0);
    assert_eq!(slot[0], 3);
    let slot = ring.wait_for(1, None)?;
    assert_eq!(slot.index(), 1);
    assert_eq!(slot[0], 4);
    assert_eq!(slot.as_ptr(), buffers[1].as_ptr() as *const u8);

    ring.disable();
    // Caller memory survives the ring.
    assert_eq!(unsafe { *buffers[1].as_ptr() }, 4);
    Ok(())
}

#[test]
fn test_caller_markers_round_trip() -> TestResult {
    let channel = DummyChannel::new();
    let markers = [0x11u8, 0x22, 0x33, 0x44];
    let buffers: Vec<ExternalBuffer> = markers
        .iter()
        .map(|&marker| ExternalBuffer::from(Box::leak(vec![marker; 128].into_boxed_slice())))
        .collect();

    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(128, 4, Direction::Read, Some(&buffers))?;
    ring.start(4)?;
    channel.complete(4);

    for marker in markers {
        let slot = ring.wait_for(1, Some(Duration::from_secs(1)))?;
        assert!(slot.iter().all(|&b| b == marker));
    }
    Ok(())
}

#[test]
fn test_caller_buffers_rejected() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());

    let too_few = [leaked(256)];
    assert!(ring
        .configure_separate(256, 2, Direction::Read, Some(&too_few))
        .is_err());
    let too_small = [leaked(256), leaked(128)];
    assert!(ring
        .configure_separate(256, 2, Direction::Read, Some(&too_small))
        .is_err());
    assert_eq!(channel.registered_count(), 0);
    Ok(())
}

#[test]
fn test_overrun() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 4, Direction::Read, None)?;
    ring.start(0)?;

    channel.complete(3);
    assert!(!ring.overrun());
    assert!(ring.overrun_error().is_ok());

    channel.complete(1);
    assert!(ring.overrun());
    match ring.overrun_error() {
        Err(Error::Overrun {
            done,
            consumed,
            ring_size,
        }) => assert_eq!((done, consumed, ring_size), (4, 0, 4)),
        other => panic!("expected overrun, got {other:?}"),
    }

    ring.wait_for(1, None)?;
    assert!(!ring.overrun());
    Ok(())
}

#[test]
fn test_check_available() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 4, Direction::Read, None)?;
    ring.start(0)?;

    assert!(ring.check_available(1).is_none());
    assert_eq!(ring.consumed_count(), 0);

    channel.complete(2);
    let index = ring.check_available(1).map(|slot| slot.index());
    assert_eq!(index, Some(0));
    assert_eq!(ring.consumed_count(), 1);

    // Only one more is done, so two is not available and nothing moves.
    assert!(ring.check_available(2).is_none());
    assert_eq!(ring.consumed_count(), 1);

    let index = ring.check_available(1).map(|slot| slot.index());
    assert_eq!(index, Some(1));
    Ok(())
}

#[test]
#[serial]
fn test_peek_latest() -> TestResult {
    let channel = marked_channel();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 4, Direction::Read, None)?;
    ring.start(0)?;

    channel.complete(3);
    let mut skipped = 0;
    let slot = ring.peek_latest(Some(&mut skipped))?;
    assert_eq!(skipped, 2);
    assert_eq!(slot.index(), 2);
    assert_eq!(slot[0], 2);
    assert_eq!(ring.consumed_count(), 3);

    channel.complete(1);
    let slot = ring.peek_latest(Some(&mut skipped))?;
    assert_eq!(skipped, 0);
    assert_eq!(slot.index(), 3);
    Ok(())
}

#[test]
#[serial]
fn test_peek_latest_blocks_for_one() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 2, Direction::Read, None)?;
    ring.start(0)?;

    let clock = channel.run(Duration::from_millis(50));
    let mut skipped = 7;
    let index = ring.peek_latest(Some(&mut skipped))?.index();
    drop(clock);
    assert_eq!(skipped, 0);
    assert_eq!(index, 0);
    Ok(())
}

#[test]
#[serial]
fn test_wait_for_next() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 4, Direction::Read, None)?;
    ring.start(0)?;
    channel.complete(5);

    let clock = channel.run(Duration::from_millis(5));
    let slot = ring.wait_for_next_timeout(Some(Duration::from_secs(2)))?;
    assert!(slot.completion() >= 6);
    let (completion, index) = (slot.completion(), slot.index());
    drop(clock);
    assert_eq!(ring.slot_index(completion), Some(index));
    assert_eq!(ring.consumed_count(), completion);
    Ok(())
}

#[test]
#[serial]
fn test_timestamps() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 4, Direction::Read, None)?;
    ring.start(0)?;
    channel.complete(2);

    assert!(ring.timestamp(0).is_ok());
    let (slot, stamp) = ring.wait_with_timestamp(2, Some(Duration::from_millis(100)))?;
    assert_eq!(slot.index(), 1);
    assert_eq!(ring.timestamp(1)?, stamp);

    channel.complete(1);
    let mut skipped = 9;
    let (slot, latest) = ring.peek_latest_with_timestamp(Some(&mut skipped))?;
    assert_eq!(slot.index(), 2);
    assert_eq!(skipped, 0);
    assert_eq!(ring.timestamp(2)?, latest);

    assert!(matches!(
        ring.timestamp(99),
        Err(Error::HardwareCommandFailed { .. })
    ));
    Ok(())
}

#[test]
fn test_cancel_and_reset() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 4, Direction::Read, None)?;

    // Nothing in flight: both are no-ops.
    ring.cancel_current_transfer()?;
    ring.stop_after_current()?;

    ring.start(10)?;
    channel.complete(2);
    assert_eq!(ring.current_active_slot(), Some(2));

    ring.stop_after_current()?;
    assert_eq!(channel.todo_count(), 3);
    assert_eq!(channel.complete(5), 1);
    assert_eq!(ring.done_count(), 3);

    ring.start(5)?;
    channel.complete(1);
    ring.abort()?;
    assert_eq!(ring.done_count(), 4);
    assert_eq!(channel.todo_count(), 4);
    assert_eq!(ring.consumed_count(), 4);

    ring.start(2)?;
    ring.abort_current()?;
    assert_eq!(ring.done_count(), 5);
    assert_eq!(ring.consumed_count(), 5);

    ring.start(1)?;
    channel.complete(1);
    let slot = ring.wait_for(1, Some(Duration::from_millis(100)))?;
    assert_eq!(slot.completion(), 6);
    assert_eq!(slot.index(), 1);
    Ok(())
}

#[test]
fn test_cancel_discards_in_flight() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 4, Direction::Read, None)?;
    ring.start(0)?;
    channel.complete(1);

    ring.cancel_current_transfer()?;
    assert_eq!(channel.todo_count(), 1);
    assert_eq!(channel.complete(1), 0);

    ring.reset_to(8)?;
    assert_eq!(ring.done_count(), 8);
    assert_eq!(ring.consumed_count(), 8);
    assert_eq!(ring.slot_index(9), Some(0));
    Ok(())
}

#[test]
fn test_wait_failure() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 2, Direction::Read, None)?;
    ring.start(0)?;

    channel.fail_command(Some("block_until"));
    assert!(matches!(
        ring.wait_for(1, Some(Duration::from_millis(10))),
        Err(Error::WaitFailed(_))
    ));
    channel.fail_command(Some("start"));
    assert!(matches!(
        ring.start(1),
        Err(Error::HardwareCommandFailed { command: "start", .. })
    ));
    Ok(())
}

#[test]
fn test_block_header_before() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_block(1000, 3, Direction::Read, 100, true, None)?;

    let layout = ring.pool().block_layout().ok_or("no block layout")?;
    assert_eq!(layout.header_size, SECTOR_SIZE);
    assert!(layout.header_before);
    assert_eq!(layout.full_size, round_up(SECTOR_SIZE + 1000, page_size()));

    let base = ring.pool().block_base().ok_or("no block base")? as usize;
    assert_eq!(base % page_size(), 0);
    for slot in ring.pool().slots() {
        assert!(!slot.owned());
        let offset = slot.index() as usize * layout.full_size + SECTOR_SIZE;
        assert_eq!(slot.as_ptr() as usize, base + offset);
        assert_eq!(channel.registered(slot.index()), Some((1000, Direction::Read)));
        let header = ring.pool().header(slot.index()).ok_or("no header")?;
        assert_eq!(header.len(), SECTOR_SIZE);
        assert_eq!(header.as_ptr() as usize + SECTOR_SIZE, slot.as_ptr() as usize);
    }
    assert!(ring.pool().block().is_some());

    ring.disable();
    assert!(ring.pool().block_base().is_none());
    assert_eq!(channel.registered_count(), 0);
    Ok(())
}

#[test]
fn test_block_header_after() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_block(1024, 2, Direction::Read, 64, false, None)?;

    let layout = ring.pool().block_layout().ok_or("no block layout")?;
    assert_eq!(layout.header_size, 64);
    assert_eq!(layout.full_size, round_up(1088, page_size()));

    ring.start(1)?;
    channel.complete(1);
    let slot = ring.wait_for(1, None)?;
    let header = slot.header().ok_or("no header")?;
    assert_eq!(header.len(), 64);
    assert_eq!(header.as_ptr() as usize, slot.as_ptr() as usize + 1024);
    Ok(())
}

#[test]
fn test_block_caller_memory() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    let full = round_up(2048, page_size());

    let err = ring
        .configure_block(2048, 4, Direction::Read, 0, false, Some(leaked(full)))
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));

    let block = leaked(full * 4);
    ring.configure_block(2048, 4, Direction::Read, 0, false, Some(block))?;
    assert!(ring.pool().block().is_none());
    assert_eq!(ring.pool().block_base(), Some(block.as_ptr()));
    assert!(ring.pool().header(0).is_none());
    Ok(())
}

#[test]
fn test_resize_slot() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(1024, 2, Direction::Read, None)?;

    ring.resize_slot(0, 512, Direction::Write)?;
    assert_eq!(channel.registered(0), Some((512, Direction::Write)));
    let slot = ring.pool().slot(0).ok_or("no slot")?;
    assert_eq!(slot.size(), 512);
    assert_eq!(slot.allocated_size(), 1024);
    assert_eq!(channel.registered_address(0), Some(slot.as_ptr()));

    // Back up to the allocated size is fine, beyond it is not.
    ring.resize_slot(0, 1024, Direction::Read)?;
    assert!(matches!(
        ring.resize_slot(0, 2048, Direction::Read),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(
        ring.resize_slot(5, 64, Direction::Read),
        Err(Error::Configuration(_))
    ));
    assert_eq!(channel.registered(1), Some((1024, Direction::Read)));
    Ok(())
}

#[test]
fn test_add_slot() -> TestResult {
    let channel = DummyChannel::with_max_buffers(2);
    let mut ring = Ring::new(channel.clone());

    assert_eq!(ring.add_slot(256, Direction::Read, None)?, 0);
    assert_eq!(ring.add_slot(256, Direction::Write, Some(leaked(256)))?, 1);
    assert_eq!(ring.ring_size(), 2);
    assert_eq!(channel.buffer_count(), 2);
    assert_eq!(channel.registered(1), Some((256, Direction::Write)));

    assert!(ring.add_slot(256, Direction::Read, None).is_err());
    assert!(ring.add_slot(255, Direction::Read, None).is_err());
    Ok(())
}

#[test]
fn test_write_ring() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(16, 3, Direction::Write, None)?;

    for frame in 0..4u8 {
        let slot = ring.next_write_slot()?;
        assert_eq!(slot.index(), u32::from(frame % 3));
        assert_eq!(slot.direction(), Direction::Write);
        slot.as_mut_slice().fill(frame);
    }
    let slot = ring.pool().slot(0).ok_or("no slot")?;
    assert!(slot.as_slice().iter().all(|&b| b == 3));
    Ok(())
}

#[test]
fn test_write_ring_follows_reset() -> TestResult {
    let channel = DummyChannel::new();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(16, 4, Direction::Write, None)?;

    assert_eq!(ring.next_write_slot()?.index(), 0);
    ring.reset_to(2)?;
    assert_eq!(ring.next_write_slot()?.index(), 2);
    assert_eq!(ring.slot_index(3), Some(2));

    ring.reset_to(7)?;
    assert_eq!(ring.next_write_slot()?.index(), 3);
    assert_eq!(ring.next_write_slot()?.index(), 0);
    Ok(())
}

#[test]
#[serial]
fn test_free_running() -> TestResult {
    let channel = marked_channel();
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(4096, 4, Direction::Read, None)?;
    ring.start_continuous()?;

    let clock = channel.run(Duration::from_millis(2));
    for expected in 0..12u64 {
        let slot = ring.wait_for(1, Some(Duration::from_secs(1)))?;
        assert_eq!(slot.completion(), expected + 1);
        assert_eq!(u64::from(slot.index()), expected % 4);
    }
    ring.stop_after_current()?;
    drop(clock);

    assert!(ring.done_count() >= 12);
    ring.disable();
    assert_eq!(channel.registered_count(), 0);
    Ok(())
}

#[test]
fn test_arc_channel() -> TestResult {
    let channel = std::sync::Arc::new(DummyChannel::new());
    let mut ring = Ring::new(channel.clone());
    ring.configure_separate(64, 2, Direction::Read, None)?;
    ring.start(1)?;
    channel.complete(1);
    assert_eq!(ring.wait_for(1, None)?.index(), 0);
    Ok(())
}
