// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::channel::TransferChannel;

/// Application side of the completion protocol.
///
/// The hardware publishes a cumulative completion count; the tracker keeps
/// how far the application has consumed. Completion number `n` (one based)
/// landed in slot `(n - 1) % ring_size`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct CompletionTracker {
    consumed_count: u64,
    ring_size: u32,
}

impl CompletionTracker {
    pub fn new(ring_size: u32, consumed_count: u64) -> Self {
        Self {
            consumed_count,
            ring_size,
        }
    }

    pub fn ring_size(&self) -> u32 {
        self.ring_size
    }

    pub fn consumed_count(&self) -> u64 {
        self.consumed_count
    }

    /// Overwrites the consumed count, for resynchronising after a reset.
    pub fn set_consumed(&mut self, n: u64) {
        self.consumed_count = n;
    }

    /// Hardware completion count, read fresh from the channel.
    pub fn done_count(&self, channel: &(impl TransferChannel + ?Sized)) -> u64 {
        channel.completion_count()
    }

    /// Slot written by completion number `n`. Zero maps to the last slot,
    /// the one before slot 0. `None` without a ring.
    pub fn slot_index(&self, n: u64) -> Option<u32> {
        if self.ring_size == 0 {
            return None;
        }
        let size = u64::from(self.ring_size);
        Some(((n % size + size - 1) % size) as u32)
    }

    /// True once the hardware is a full ring ahead of the application, at
    /// which point the oldest unconsumed slot has been overwritten.
    pub fn overrun_at(&self, done: u64) -> bool {
        self.ring_size > 0 && done >= self.consumed_count + u64::from(self.ring_size)
    }

    pub fn overrun(&self, channel: &(impl TransferChannel + ?Sized)) -> bool {
        self.overrun_at(channel.completion_count())
    }

    /// Slot the hardware is most likely writing right now.
    ///
    /// Counts one past `done` when a transfer is queued (`todo > done`) or
    /// when the hardware reports nothing queued at all. The counters can move
    /// between the two reads, so treat the answer as a hint.
    pub fn current_active_slot(&self, done: u64, todo: u64) -> Option<u32> {
        let count = if todo == 0 || todo > done {
            done + 1
        } else {
            done
        };
        self.slot_index(count)
    }

    /// Marks everything up to completion `target` as consumed.
    pub(crate) fn advance_to(&mut self, target: u64) {
        self.consumed_count = target;
    }
}

