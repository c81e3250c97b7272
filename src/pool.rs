// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Ring buffer memory and its registration with the transfer channel.

use crate::{
    channel::{Direction, TransferChannel},
    error::{Error, Result},
    memory::{page_size, Allocation, Allocator, ExternalBuffer, SECTOR_SIZE},
};
use std::{
    fmt,
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
};
use tracing::{debug, info, warn};

/// One registered ring buffer.
pub struct BufferSlot {
    index: u32,
    address: NonNull<u8>,
    size: usize,
    allocated_size: usize,
    owned: bool,
    direction: Direction,
    memory: Option<Allocation>,
}

impl BufferSlot {
    /// Position of the slot in the ring.
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.address.as_ptr()
    }

    /// Logical size currently registered with the channel.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Size at configuration time; the upper bound for a resize.
    pub fn allocated_size(&self) -> usize {
        self.allocated_size
    }

    /// Whether the pool allocated this slot's memory and must free it.
    pub fn owned(&self) -> bool {
        self.owned
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Memory backing an owned slot, for example to export its DMA buffer fd.
    pub fn allocation(&self) -> Option<&Allocation> {
        self.memory.as_ref()
    }

    /// Slot payload as bytes.
    ///
    /// The hardware may write the slot again once the ring laps the reader;
    /// check [`Ring::overrun`](crate::ring::Ring::overrun) after use.
    pub fn as_slice(&self) -> &[u8] {
        unsafe { from_raw_parts(self.address.as_ptr(), self.size) }
    }

    /// Mutable slot payload, used to fill buffers for memory-to-device rings.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.address.as_ptr(), self.size) }
    }
}

impl fmt::Debug for BufferSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferSlot")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("size", &self.size)
            .field("allocated_size", &self.allocated_size)
            .field("owned", &self.owned)
            .field("direction", &self.direction)
            .finish()
    }
}

/// Layout of a block of slots carved from one contiguous region.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockLayout {
    /// Bytes reserved per slot for a header.
    pub header_size: usize,
    /// Header placed before the payload instead of after it.
    pub header_before: bool,
    /// Distance between the start of consecutive slots.
    pub full_size: usize,
}

/// Owns the slot memory of one ring and keeps it registered with the
/// transfer channel between `configure_*` and [`disable`](Self::disable).
pub struct BufferPool {
    allocator: Allocator,
    slots: Vec<BufferSlot>,
    bufsize: usize,
    direction: Direction,
    block: Option<Allocation>,
    block_base: Option<NonNull<u8>>,
    layout: BlockLayout,
    next_write: usize,
}

// The pool exclusively owns its allocations. External memory is covered by
// the `ExternalBuffer` contract.
unsafe impl Send for BufferPool {}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(Allocator::default())
    }
}

impl BufferPool {
    pub fn new(allocator: Allocator) -> Self {
        Self {
            allocator,
            slots: Vec::new(),
            bufsize: 0,
            direction: Direction::Read,
            block: None,
            block_base: None,
            layout: BlockLayout::default(),
            next_write: 0,
        }
    }

    pub fn allocator(&self) -> Allocator {
        self.allocator
    }

    pub fn is_configured(&self) -> bool {
        !self.slots.is_empty()
    }

    pub fn numbufs(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn bufsize(&self) -> usize {
        self.bufsize
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn slots(&self) -> &[BufferSlot] {
        &self.slots
    }

    pub fn slot(&self, index: u32) -> Option<&BufferSlot> {
        self.slots.get(index as usize)
    }

    pub fn slot_mut(&mut self, index: u32) -> Option<&mut BufferSlot> {
        self.slots.get_mut(index as usize)
    }

    /// Allocated size of slot `index`, zero if it was never configured.
    pub fn allocated_size(&self, index: u32) -> usize {
        self.slot(index).map_or(0, |slot| slot.allocated_size)
    }

    /// Payload addresses of all slots in ring order.
    pub fn addresses(&self) -> Vec<*mut u8> {
        self.slots.iter().map(BufferSlot::as_ptr).collect()
    }

    /// Start of the contiguous region in block mode.
    pub fn block_base(&self) -> Option<*mut u8> {
        self.block_base.map(NonNull::as_ptr)
    }

    /// Block allocated by the pool in block mode.
    pub fn block(&self) -> Option<&Allocation> {
        self.block.as_ref()
    }

    pub fn block_layout(&self) -> Option<BlockLayout> {
        self.block_base.map(|_| self.layout)
    }

    /// Header region of slot `index` in block mode, `None` without headers.
    pub fn header(&self, index: u32) -> Option<&[u8]> {
        let header_size = self.layout.header_size;
        if self.block_base.is_none() || header_size == 0 {
            return None;
        }
        let slot = self.slot(index)?;
        let start = if self.layout.header_before {
            unsafe { slot.address.as_ptr().sub(header_size) }
        } else {
            unsafe { slot.address.as_ptr().add(self.bufsize) }
        };
        Some(unsafe { from_raw_parts(start, header_size) })
    }

    fn validate(
        &self,
        channel: &(impl TransferChannel + ?Sized),
        bufsize: usize,
        numbufs: u32,
    ) -> Result<()> {
        if self.is_configured() {
            return Err(Error::Configuration(
                "ring already configured, disable it first".to_string(),
            ));
        }
        if channel.todo_count() > channel.completion_count() {
            return Err(Error::Configuration(
                "cannot configure while transfers are in flight".to_string(),
            ));
        }
        if numbufs == 0 {
            return Err(Error::Configuration("ring needs at least one buffer".to_string()));
        }
        let max = channel.max_buffers();
        if numbufs > max {
            return Err(Error::Configuration(format!(
                "{numbufs} buffers requested, hardware supports {max}"
            )));
        }
        if bufsize == 0 || bufsize & 1 != 0 {
            return Err(Error::Configuration(format!(
                "buffer size {bufsize} must be a non-zero multiple of 2"
            )));
        }
        Ok(())
    }

    /// Configures `numbufs` independently allocated slots of `bufsize` bytes.
    ///
    /// With `slots` the caller supplies the memory, one buffer per slot, and
    /// keeps ownership of it. Otherwise the pool allocates zero-filled,
    /// page-aligned buffers from its allocator.
    ///
    /// Nothing is registered when validation fails. A failure part way
    /// through registration releases what was already registered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if:
    /// - The pool is already configured or transfers are in flight
    /// - `bufsize` is zero or odd
    /// - `numbufs` is zero or above the channel's maximum
    /// - `slots` does not hold `numbufs` buffers of at least `bufsize` bytes
    ///
    /// Allocation and registration failures are passed through.
    pub fn configure_separate(
        &mut self,
        channel: &(impl TransferChannel + ?Sized),
        bufsize: usize,
        numbufs: u32,
        direction: Direction,
        slots: Option<&[ExternalBuffer]>,
    ) -> Result<()> {
        self.validate(channel, bufsize, numbufs)?;
        if let Some(slots) = slots {
            if slots.len() != numbufs as usize {
                return Err(Error::Configuration(format!(
                    "{} buffers supplied for a ring of {numbufs}",
                    slots.len()
                )));
            }
            if let Some(short) = slots.iter().position(|buf| buf.len() < bufsize) {
                return Err(Error::Configuration(format!(
                    "supplied buffer {short} is smaller than {bufsize} bytes"
                )));
            }
            let page = page_size();
            for (i, buf) in slots.iter().enumerate() {
                if buf.as_ptr() as usize % page != 0 {
                    warn!("supplied buffer {i} at {:p} is not page aligned", buf.as_ptr());
                }
            }
        }

        channel.set_buffer_count(numbufs)?;
        self.bufsize = bufsize;
        self.direction = direction;

        for index in 0..numbufs {
            let (address, memory) = match slots {
                Some(slots) => (slots[index as usize].as_ptr(), None),
                None => match Allocation::new(bufsize, self.allocator) {
                    Ok(memory) => (memory.as_ptr(), Some(memory)),
                    Err(e) => {
                        self.rollback(channel);
                        return Err(e);
                    }
                },
            };
            if let Err(e) = self.attach(channel, index, address, bufsize, direction, memory) {
                self.rollback(channel);
                return Err(e);
            }
        }

        info!(numbufs, bufsize, ?direction, "ring configured");
        Ok(())
    }

    /// Configures `numbufs` slots carved from one contiguous region.
    ///
    /// Each slot spans `round_up(header_size + bufsize, page_size())` bytes.
    /// A header placed before the payload is first rounded up to a 512 byte
    /// sector, and the payload starts right after it. Slots in block mode are
    /// never individually owned; the pool frees the block itself when it
    /// allocated it.
    ///
    /// # Errors
    ///
    /// Same conditions as [`configure_separate`](Self::configure_separate),
    /// plus a supplied `block` smaller than `numbufs` full slots and a
    /// layout whose total size overflows `usize`.
    #[allow(clippy::too_many_arguments)]
    pub fn configure_block(
        &mut self,
        channel: &(impl TransferChannel + ?Sized),
        bufsize: usize,
        numbufs: u32,
        direction: Direction,
        header_size: usize,
        header_before: bool,
        block: Option<ExternalBuffer>,
    ) -> Result<()> {
        self.validate(channel, bufsize, numbufs)?;

        let header = if header_before {
            header_size.checked_next_multiple_of(SECTOR_SIZE)
        } else {
            Some(header_size)
        };
        let sizes = header.and_then(|header| {
            let full = header
                .checked_add(bufsize)?
                .checked_next_multiple_of(page_size())?;
            Some((header, full, full.checked_mul(numbufs as usize)?))
        });
        let (header_size, full_size, total) = sizes.ok_or_else(|| {
            Error::Configuration(format!(
                "{numbufs} buffers of {bufsize} bytes with a {header_size} byte header overflow"
            ))
        })?;

        if let Some(block) = &block {
            if block.len() < total {
                return Err(Error::Configuration(format!(
                    "supplied block of {} bytes is smaller than {total}",
                    block.len()
                )));
            }
        }

        let (base, owned_block) = match block {
            Some(block) => (block.as_ptr(), None),
            None => {
                let memory = Allocation::new(total, self.allocator)?;
                (memory.as_ptr(), Some(memory))
            }
        };

        channel.set_buffer_count(numbufs)?;
        self.bufsize = bufsize;
        self.direction = direction;
        self.block = owned_block;
        self.block_base = NonNull::new(base);
        self.layout = BlockLayout {
            header_size,
            header_before,
            full_size,
        };

        let payload_offset = if header_before { header_size } else { 0 };
        for index in 0..numbufs {
            let address = unsafe { base.add(index as usize * full_size + payload_offset) };
            if let Err(e) = self.attach(channel, index, address, bufsize, direction, None) {
                self.rollback(channel);
                return Err(e);
            }
        }

        info!(
            numbufs,
            bufsize, full_size, header_size, header_before, "block ring configured"
        );
        Ok(())
    }

    /// Appends one slot to the ring and returns its index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an odd or zero `bufsize`, a
    /// supplied buffer smaller than `bufsize`, or when the ring is full.
    pub fn add_slot(
        &mut self,
        channel: &(impl TransferChannel + ?Sized),
        bufsize: usize,
        direction: Direction,
        buffer: Option<ExternalBuffer>,
    ) -> Result<u32> {
        if bufsize == 0 || bufsize & 1 != 0 {
            return Err(Error::Configuration(format!(
                "buffer size {bufsize} must be a non-zero multiple of 2"
            )));
        }
        let index = self.numbufs();
        if index >= channel.max_buffers() {
            return Err(Error::Configuration(format!(
                "ring already holds {index} buffers"
            )));
        }
        let (address, memory) = match buffer {
            Some(buf) if buf.len() < bufsize => {
                return Err(Error::Configuration(format!(
                    "supplied buffer is smaller than {bufsize} bytes"
                )));
            }
            Some(buf) => (buf.as_ptr(), None),
            None => {
                let memory = Allocation::new(bufsize, self.allocator)?;
                (memory.as_ptr(), Some(memory))
            }
        };

        channel.set_buffer_count(index + 1)?;
        if index == 0 {
            self.bufsize = bufsize;
            self.direction = direction;
        }
        if let Err(e) = self.attach(channel, index, address, bufsize, direction, memory) {
            if let Err(e) = channel.set_buffer_count(index) {
                warn!("failed to restore ring size {index}: {e}");
            }
            return Err(e);
        }
        debug!(index, bufsize, "slot added");
        Ok(index)
    }

    fn attach(
        &mut self,
        channel: &(impl TransferChannel + ?Sized),
        index: u32,
        address: *mut u8,
        size: usize,
        direction: Direction,
        memory: Option<Allocation>,
    ) -> Result<()> {
        let address = NonNull::new(address)
            .ok_or_else(|| Error::Configuration(format!("slot {index} has a null address")))?;
        channel.register_buffer(index, address.as_ptr(), size, direction)?;
        self.slots.push(BufferSlot {
            index,
            address,
            size,
            allocated_size: size,
            owned: memory.is_some(),
            direction,
            memory,
        });
        Ok(())
    }

    fn rollback(&mut self, channel: &(impl TransferChannel + ?Sized)) {
        warn!("ring configuration failed, releasing {} slots", self.slots.len());
        self.release_all(channel);
        if let Err(e) = channel.set_buffer_count(0) {
            warn!("failed to clear ring size: {e}");
        }
    }

    fn release_all(&mut self, channel: &(impl TransferChannel + ?Sized)) {
        while let Some(slot) = self.slots.pop() {
            if let Err(e) = channel.release_buffer(slot.index) {
                warn!("failed to release slot {}: {e}", slot.index);
            }
            // Owned memory is freed here, after the channel let go of it.
            drop(slot);
        }
        self.block = None;
        self.block_base = None;
        self.layout = BlockLayout::default();
        self.bufsize = 0;
        self.next_write = 0;
    }

    /// Stops in-flight transfers, releases every slot from the channel and
    /// frees owned memory. Safe to call on an unconfigured pool.
    pub fn disable(&mut self, channel: &(impl TransferChannel + ?Sized)) {
        if !self.is_configured() && self.block_base.is_none() {
            return;
        }
        if channel.todo_count() > channel.completion_count() {
            if let Err(e) = channel.abort_now() {
                warn!("failed to abort transfers before disable: {e}");
            }
        }
        let numbufs = self.numbufs();
        self.release_all(channel);
        if let Err(e) = channel.set_buffer_count(0) {
            warn!("failed to clear ring size: {e}");
        }
        info!(numbufs, "ring disabled");
    }

    /// Changes the logical size and direction of slot `index` and registers
    /// it again with the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the slot was never configured or
    /// `new_size` exceeds its allocated size.
    pub fn resize_slot(
        &mut self,
        channel: &(impl TransferChannel + ?Sized),
        index: u32,
        new_size: usize,
        direction: Direction,
    ) -> Result<()> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or_else(|| Error::Configuration(format!("slot {index} was never configured")))?;
        if new_size > slot.allocated_size {
            return Err(Error::Configuration(format!(
                "slot {index} holds {} bytes, cannot resize to {new_size}",
                slot.allocated_size
            )));
        }
        channel.register_buffer(index, slot.address.as_ptr(), new_size, direction)?;
        slot.size = new_size;
        slot.direction = direction;
        debug!(index, new_size, ?direction, "slot resized");
        Ok(())
    }

    /// Points the write cursor at the slot completion `n` lands in.
    pub(crate) fn set_next_write(&mut self, n: u64) {
        let numbufs = self.slots.len() as u64;
        self.next_write = if numbufs == 0 { 0 } else { (n % numbufs) as usize };
    }

    /// Next slot to fill for memory-to-device rings, cycling through the ring.
    pub fn next_write_slot(&mut self) -> Option<&mut BufferSlot> {
        if self.slots.is_empty() {
            return None;
        }
        let index = self.next_write % self.slots.len();
        self.next_write = (index + 1) % self.slots.len();
        self.slots.get_mut(index)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("allocator", &self.allocator)
            .field("numbufs", &self.slots.len())
            .field("bufsize", &self.bufsize)
            .field("direction", &self.direction)
            .field("block_base", &self.block_base)
            .field("layout", &self.layout)
            .finish()
    }
}
