// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Boundary with the register/DMA transfer subsystem.
//!
//! The acquisition engine never talks to a device directly. Everything it
//! needs from the hardware is expressed by [`TransferChannel`]: buffer
//! registration, start/stop/abort commands, a monotonic completion counter
//! and a blocking wait on that counter.

use crate::error::Result;
use std::{sync::Arc, time::Duration};

/// Hardware timestamp of a completed transfer.
pub use unix_ts::Timestamp;

/// Hardware maximum number of ring buffers unless the channel says otherwise.
pub const MAX_DMA_BUFFERS: u32 = 1024;

/// Transfer direction of a ring buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to memory (acquisition).
    #[default]
    Read,
    /// Memory to device (output).
    Write,
}

/// Result of a blocking wait on the completion counter.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The completion counter reached the requested target.
    Completed,
    /// The deadline passed first.
    TimedOut,
}

/// Minimal contract the acquisition engine requires from a transfer channel.
///
/// Counters are cumulative since the channel was opened and never reset
/// while a session is open. Implementations run asynchronously from the
/// caller; the completion counter may advance at any time.
pub trait TransferChannel {
    /// Registers the memory at `address` as ring buffer `index`.
    ///
    /// The address stays valid until [`release_buffer`](Self::release_buffer)
    /// is called for the same index. Registering an index again replaces its
    /// size and direction.
    fn register_buffer(
        &self,
        index: u32,
        address: *mut u8,
        size: usize,
        direction: Direction,
    ) -> Result<()>;

    /// Tells the hardware how many buffers make up the ring.
    fn set_buffer_count(&self, n: u32) -> Result<()>;

    /// Queues `n` more transfers. Zero starts free-running acquisition that
    /// continues until stopped.
    fn start(&self, n: u32) -> Result<()>;

    /// Lets the in-flight transfer finish, then halts.
    fn stop_after_current(&self) -> Result<()>;

    /// Halts immediately, discarding the in-flight transfer.
    fn abort_now(&self) -> Result<()>;

    /// Number of transfers completed since the channel was opened.
    fn completion_count(&self) -> u64;

    /// Number of transfers the hardware has been told to perform.
    fn todo_count(&self) -> u64;

    /// Repositions the hardware so the next transfer is number `n + 1`.
    fn set_next_buffer(&self, n: u64) -> Result<()>;

    /// Blocks until the completion counter reaches `target` or the timeout
    /// expires. `None` waits indefinitely.
    fn block_until(&self, target: u64, timeout: Option<Duration>) -> Result<WaitOutcome>;

    /// Completion time of transfer number `n` (zero based).
    fn timestamp_of(&self, n: u64) -> Result<Timestamp>;

    /// Detaches ring buffer `index` from the DMA resources.
    fn release_buffer(&self, index: u32) -> Result<()>;

    fn max_buffers(&self) -> u32 {
        MAX_DMA_BUFFERS
    }

    /// Makes `len` bytes at `offset` of buffer `index` visible to the CPU.
    /// Coherent architectures need nothing here.
    fn sync_for_cpu(&self, _index: u32, _offset: usize, _len: usize) {}
}

impl<T: TransferChannel + ?Sized> TransferChannel for Arc<T> {
    fn register_buffer(
        &self,
        index: u32,
        address: *mut u8,
        size: usize,
        direction: Direction,
    ) -> Result<()> {
        (**self).register_buffer(index, address, size, direction)
    }

    fn set_buffer_count(&self, n: u32) -> Result<()> {
        (**self).set_buffer_count(n)
    }

    fn start(&self, n: u32) -> Result<()> {
        (**self).start(n)
    }

    fn stop_after_current(&self) -> Result<()> {
        (**self).stop_after_current()
    }

    fn abort_now(&self) -> Result<()> {
        (**self).abort_now()
    }

    fn completion_count(&self) -> u64 {
        (**self).completion_count()
    }

    fn todo_count(&self) -> u64 {
        (**self).todo_count()
    }

    fn set_next_buffer(&self, n: u64) -> Result<()> {
        (**self).set_next_buffer(n)
    }

    fn block_until(&self, target: u64, timeout: Option<Duration>) -> Result<WaitOutcome> {
        (**self).block_until(target, timeout)
    }

    fn timestamp_of(&self, n: u64) -> Result<Timestamp> {
        (**self).timestamp_of(n)
    }

    fn release_buffer(&self, index: u32) -> Result<()> {
        (**self).release_buffer(index)
    }

    fn max_buffers(&self) -> u32 {
        (**self).max_buffers()
    }

    fn sync_for_cpu(&self, index: u32, offset: usize, len: usize) {
        (**self).sync_for_cpu(index, offset, len)
    }
}
