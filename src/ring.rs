// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Ring-buffer acquisition on top of a [`TransferChannel`].
//!
//! A [`Ring`] owns the buffer pool, the completion tracker and the channel.
//! Waiting hands out a [`SlotRef`] that borrows the ring, so a slot can not
//! outlive a later `disable()` or reconfiguration.

use crate::{
    channel::{Direction, Timestamp, TransferChannel, WaitOutcome},
    error::{Error, Result},
    memory::{Allocator, ExternalBuffer},
    pool::{BufferPool, BufferSlot},
    tracker::CompletionTracker,
};
use std::{fmt, ops::Deref, time::Duration};
use tracing::{debug, instrument, trace, warn};

/// A completed slot handed to the application.
///
/// Dereferences to the slot payload. The data stays valid until the
/// hardware laps the ring; check [`Ring::overrun`] once done with it.
pub struct SlotRef<'a> {
    slot: &'a BufferSlot,
    header: Option<&'a [u8]>,
    completion: u64,
}

impl<'a> SlotRef<'a> {
    pub fn index(&self) -> u32 {
        self.slot.index()
    }

    /// Completion number that filled this slot.
    pub fn completion(&self) -> u64 {
        self.completion
    }

    pub fn as_slice(&self) -> &'a [u8] {
        self.slot.as_slice()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.slot.as_ptr()
    }

    /// Header region of the slot in block mode.
    pub fn header(&self) -> Option<&'a [u8]> {
        self.header
    }

    pub fn slot(&self) -> &'a BufferSlot {
        self.slot
    }
}

impl Deref for SlotRef<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.slot.as_slice()
    }
}

impl fmt::Debug for SlotRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SlotRef")
            .field("index", &self.index())
            .field("completion", &self.completion)
            .field("len", &self.slot.size())
            .finish()
    }
}

/// Ring-buffer acquisition engine.
///
/// All mutating operations take `&mut self`; a ring has a single consumer.
/// Share the channel (not the ring) with threads that only need to inspect
/// the hardware counters.
pub struct Ring<C: TransferChannel> {
    channel: C,
    pool: BufferPool,
    tracker: CompletionTracker,
}

impl<C: TransferChannel> Ring<C> {
    pub fn new(channel: C) -> Self {
        Self::with_allocator(channel, Allocator::default())
    }

    pub fn with_allocator(channel: C, allocator: Allocator) -> Self {
        Self {
            channel,
            pool: BufferPool::new(allocator),
            tracker: CompletionTracker::default(),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    /// Number of slots in the ring, zero when unconfigured.
    pub fn ring_size(&self) -> u32 {
        self.tracker.ring_size()
    }

    fn reset_tracker(&mut self) {
        self.tracker = CompletionTracker::new(
            self.pool.numbufs(),
            self.channel.completion_count(),
        );
    }

    /// Allocates or adopts `numbufs` separate slots and registers them.
    ///
    /// See [`BufferPool::configure_separate`] for the failure conditions.
    /// The consumed count restarts at the channel's completion count.
    pub fn configure_separate(
        &mut self,
        bufsize: usize,
        numbufs: u32,
        direction: Direction,
        slots: Option<&[ExternalBuffer]>,
    ) -> Result<()> {
        self.pool
            .configure_separate(&self.channel, bufsize, numbufs, direction, slots)?;
        self.reset_tracker();
        Ok(())
    }

    /// Carves `numbufs` slots from one contiguous region.
    ///
    /// See [`BufferPool::configure_block`] for the layout rules.
    pub fn configure_block(
        &mut self,
        bufsize: usize,
        numbufs: u32,
        direction: Direction,
        header_size: usize,
        header_before: bool,
        block: Option<ExternalBuffer>,
    ) -> Result<()> {
        self.pool.configure_block(
            &self.channel,
            bufsize,
            numbufs,
            direction,
            header_size,
            header_before,
            block,
        )?;
        self.reset_tracker();
        Ok(())
    }

    /// Appends a slot to the ring, returning its index.
    pub fn add_slot(
        &mut self,
        bufsize: usize,
        direction: Direction,
        buffer: Option<ExternalBuffer>,
    ) -> Result<u32> {
        let first = !self.pool.is_configured();
        let index = self.pool.add_slot(&self.channel, bufsize, direction, buffer)?;
        if first {
            self.reset_tracker();
        } else {
            self.tracker = CompletionTracker::new(self.pool.numbufs(), self.tracker.consumed_count());
        }
        Ok(index)
    }

    /// Stops the hardware, releases every slot and frees owned memory.
    /// Idempotent.
    pub fn disable(&mut self) {
        self.pool.disable(&self.channel);
        self.tracker = CompletionTracker::default();
    }

    /// Changes the logical size and direction of one slot.
    pub fn resize_slot(&mut self, index: u32, new_size: usize, direction: Direction) -> Result<()> {
        self.pool
            .resize_slot(&self.channel, index, new_size, direction)
    }

    fn require_ring(&self) -> Result<()> {
        if self.tracker.ring_size() == 0 {
            return Err(Error::NoRingConfigured);
        }
        Ok(())
    }

    /// Queues `n` acquisitions.
    pub fn start(&mut self, n: u32) -> Result<()> {
        self.require_ring()?;
        debug!(n, "start");
        self.channel.start(n)
    }

    /// Acquires until stopped.
    pub fn start_continuous(&mut self) -> Result<()> {
        self.start(0)
    }

    fn slot_ref(&self, index: u32, completion: u64) -> Result<SlotRef<'_>> {
        let slot = self.pool.slot(index).ok_or(Error::NoRingConfigured)?;
        Ok(SlotRef {
            slot,
            header: self.pool.header(index),
            completion,
        })
    }

    fn invalidate(&self, index: u32) {
        let len = self.pool.slot(index).map_or(0, BufferSlot::size);
        self.channel.sync_for_cpu(index, 0, len);
    }

    /// Blocks until completion `target`, consumes up to it and returns the
    /// slot it landed in. The consumed count moves even when the wait times
    /// out.
    fn block_to(&mut self, target: u64, timeout: Option<Duration>) -> Result<u32> {
        let outcome = self
            .channel
            .block_until(target, timeout)
            .map_err(|e| Error::WaitFailed(e.to_string()))?;
        self.tracker.advance_to(target);
        let index = self
            .tracker
            .slot_index(target)
            .ok_or(Error::NoRingConfigured)?;
        self.invalidate(index);
        match outcome {
            WaitOutcome::Completed => {
                trace!(completion = target, index, "slot ready");
                Ok(index)
            }
            WaitOutcome::TimedOut => {
                warn!(completion = target, index, "wait timed out");
                Err(Error::TimedOut {
                    target,
                    slot: index,
                })
            }
        }
    }

    /// Waits until `count` more transfers have completed and returns the
    /// slot of the last one.
    ///
    /// `None` waits indefinitely. On timeout the consumed count has already
    /// been advanced to the requested target; the error carries that target
    /// and its slot, whose contents are not guaranteed to be a complete
    /// frame.
    ///
    /// # Errors
    ///
    /// - [`Error::NoRingConfigured`] before any `configure_*`
    /// - [`Error::TimedOut`] when the deadline passes first
    /// - [`Error::WaitFailed`] when the channel fails while blocking
    #[instrument(level = "trace", skip(self))]
    pub fn wait_for(&mut self, count: u32, timeout: Option<Duration>) -> Result<SlotRef<'_>> {
        self.require_ring()?;
        let target = self.tracker.consumed_count() + u64::from(count);
        let index = self.block_to(target, timeout)?;
        self.slot_ref(index, target)
    }

    /// Waits for the first transfer to complete after this call, skipping
    /// anything that was already done.
    pub fn wait_for_next(&mut self) -> Result<SlotRef<'_>> {
        self.wait_for_next_timeout(None)
    }

    pub fn wait_for_next_timeout(&mut self, timeout: Option<Duration>) -> Result<SlotRef<'_>> {
        self.require_ring()?;
        let target = self.channel.completion_count() + 1;
        let index = self.block_to(target, timeout)?;
        self.slot_ref(index, target)
    }

    /// Non-blocking variant of [`wait_for`](Self::wait_for). Consumes and
    /// returns the slot only when `count` more transfers are already done.
    pub fn check_available(&mut self, count: u32) -> Option<SlotRef<'_>> {
        if self.tracker.ring_size() == 0 {
            return None;
        }
        let target = self.tracker.consumed_count() + u64::from(count);
        if self.channel.completion_count() < target {
            return None;
        }
        self.tracker.advance_to(target);
        let index = self.tracker.slot_index(target)?;
        self.invalidate(index);
        self.slot_ref(index, target).ok()
    }

    /// Consumes everything already completed and returns the newest slot,
    /// waiting for one transfer when nothing is pending.
    ///
    /// `skipped` receives the number of completed slots passed over.
    pub fn peek_latest(&mut self, skipped: Option<&mut u32>) -> Result<SlotRef<'_>> {
        self.require_ring()?;
        let done = self.channel.completion_count();
        let delta = done.saturating_sub(self.tracker.consumed_count()).max(1);
        let count = u32::try_from(delta).unwrap_or(u32::MAX);
        if let Some(skipped) = skipped {
            *skipped = count - 1;
        }
        if count > 1 {
            debug!(skipped = count - 1, "skipping to latest slot");
        }
        self.wait_for(count, None)
    }

    /// [`peek_latest`](Self::peek_latest) with the completion time of the
    /// returned slot.
    pub fn peek_latest_with_timestamp(
        &mut self,
        skipped: Option<&mut u32>,
    ) -> Result<(SlotRef<'_>, Timestamp)> {
        self.require_ring()?;
        let done = self.channel.completion_count();
        let delta = done.saturating_sub(self.tracker.consumed_count()).max(1);
        let count = u32::try_from(delta).unwrap_or(u32::MAX);
        if let Some(skipped) = skipped {
            *skipped = count - 1;
        }
        self.wait_with_timestamp(count, None)
    }

    /// [`wait_for`](Self::wait_for) returning the hardware completion time
    /// of the returned slot as well.
    pub fn wait_with_timestamp(
        &mut self,
        count: u32,
        timeout: Option<Duration>,
    ) -> Result<(SlotRef<'_>, Timestamp)> {
        self.require_ring()?;
        let target = self.tracker.consumed_count() + u64::from(count);
        let index = self.block_to(target, timeout)?;
        let timestamp = self.channel.timestamp_of(target.saturating_sub(1))?;
        Ok((self.slot_ref(index, target)?, timestamp))
    }

    /// Completion time of transfer number `n` (zero based).
    pub fn timestamp(&self, n: u64) -> Result<Timestamp> {
        self.channel.timestamp_of(n)
    }

    pub fn done_count(&self) -> u64 {
        self.channel.completion_count()
    }

    pub fn consumed_count(&self) -> u64 {
        self.tracker.consumed_count()
    }

    /// Overrides the consumed count without touching the hardware.
    pub fn set_consumed(&mut self, n: u64) {
        self.tracker.set_consumed(n);
    }

    pub fn slot_index(&self, n: u64) -> Option<u32> {
        self.tracker.slot_index(n)
    }

    /// True once unread slots have been overwritten.
    pub fn overrun(&self) -> bool {
        self.tracker.overrun(&self.channel)
    }

    /// Reports an overrun as [`Error::Overrun`].
    pub fn overrun_error(&self) -> Result<()> {
        let done = self.channel.completion_count();
        if self.tracker.overrun_at(done) {
            return Err(Error::Overrun {
                done,
                consumed: self.tracker.consumed_count(),
                ring_size: self.tracker.ring_size(),
            });
        }
        Ok(())
    }

    /// Slot the hardware is probably writing. Advisory; see
    /// [`CompletionTracker::current_active_slot`].
    pub fn current_active_slot(&self) -> Option<u32> {
        let done = self.channel.completion_count();
        let todo = self.channel.todo_count();
        self.tracker.current_active_slot(done, todo)
    }

    fn transfer_active(&self) -> bool {
        self.channel.todo_count() > self.channel.completion_count()
    }

    /// Halts immediately, discarding the in-flight transfer. The hardware
    /// ring pointer does not advance.
    pub fn cancel_current_transfer(&mut self) -> Result<()> {
        if !self.transfer_active() {
            return Ok(());
        }
        debug!("cancel current transfer");
        self.channel.abort_now()
    }

    /// Lets the in-flight transfer finish, then halts. The hardware ring
    /// pointer advances by one.
    pub fn stop_after_current(&mut self) -> Result<()> {
        if !self.transfer_active() {
            return Ok(());
        }
        debug!("stop after current transfer");
        self.channel.stop_after_current()
    }

    /// Cancels any transfer and repositions both the hardware and the
    /// consumed count so the next transfer is number `n + 1`.
    pub fn reset_to(&mut self, n: u64) -> Result<()> {
        self.cancel_current_transfer()?;
        if self.tracker.ring_size() > 0 {
            self.channel.set_next_buffer(n)?;
            self.tracker.set_consumed(n);
            self.pool.set_next_write(n);
        }
        debug!(n, "ring reset");
        Ok(())
    }

    /// Cancels acquisition and resumes after the last completed transfer.
    pub fn abort(&mut self) -> Result<()> {
        let done = self.channel.completion_count();
        self.reset_to(done)
    }

    /// Cancels acquisition and skips the slot that was being written.
    pub fn abort_current(&mut self) -> Result<()> {
        let done = self.channel.completion_count();
        self.reset_to(done + 1)
    }

    /// Next slot to fill on a memory-to-device ring, cycling in ring order.
    pub fn next_write_slot(&mut self) -> Result<&mut BufferSlot> {
        self.pool.next_write_slot().ok_or(Error::NoRingConfigured)
    }
}

impl<C: TransferChannel> Drop for Ring<C> {
    fn drop(&mut self) {
        self.disable();
    }
}

impl<C: TransferChannel> fmt::Debug for Ring<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Ring")
            .field("pool", &self.pool)
            .field("tracker", &self.tracker)
            .finish()
    }
}
