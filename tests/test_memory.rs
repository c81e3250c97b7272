// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_grabber::{
    channel::Direction,
    dummy::DummyChannel,
    memory::{page_size, round_up, Allocation, Allocator, DmaHeapKind, ExternalBuffer},
    ring::Ring,
};
use serial_test::serial;
use std::{error::Error, ptr, time::Duration};

#[test]
fn test_round_up() -> Result<(), Box<dyn Error>> {
    assert_eq!(round_up(0, 512), 0);
    assert_eq!(round_up(1, 512), 512);
    assert_eq!(round_up(512, 512), 512);
    assert_eq!(round_up(4097, 4096), 8192);
    assert!(page_size().is_power_of_two());
    Ok(())
}

#[test]
fn test_system_allocation() -> Result<(), Box<dyn Error>> {
    let mut mem = Allocation::new(10_000, Allocator::System)?;
    assert_eq!(mem.len(), 10_000);
    assert_eq!(mem.as_ptr() as usize % page_size(), 0);
    assert!(mem.fd().is_none());
    assert!(mem.as_slice().iter().all(|&b| b == 0));

    mem.as_slice_mut()[9_999] = 0xa5;
    assert_eq!(mem.as_slice()[9_999], 0xa5);

    assert!(Allocation::new(0, Allocator::System).is_err());
    Ok(())
}

#[test]
fn test_external_buffer() -> Result<(), Box<dyn Error>> {
    assert!(unsafe { ExternalBuffer::from_raw_parts(ptr::null_mut(), 64) }.is_none());

    let buf: &'static mut [u8] = Box::leak(vec![0u8; 64].into_boxed_slice());
    let addr = buf.as_mut_ptr();
    let external = ExternalBuffer::from(buf);
    assert_eq!(external.as_ptr(), addr);
    assert_eq!(external.len(), 64);
    assert!(!external.is_empty());
    Ok(())
}

/// Requires a CMA heap at /dev/dma_heap/linux,cma with permission to use it.
#[test]
#[serial]
#[ignore = "requires /dev/dma_heap/linux,cma"]
fn test_dma_heap_allocation() -> Result<(), Box<dyn Error>> {
    let mem = Allocation::new(1 << 20, Allocator::DmaHeap(DmaHeapKind::Cma))?;
    assert!(mem.fd().is_some());
    assert_eq!(mem.as_ptr() as usize % page_size(), 0);
    assert!(mem.as_slice().iter().all(|&b| b == 0));
    Ok(())
}

#[test]
#[serial]
#[ignore = "requires /dev/dma_heap/linux,cma"]
fn test_dma_heap_ring() -> Result<(), Box<dyn Error>> {
    let channel = DummyChannel::new();
    channel.set_frame_filler(|n, buf| buf.fill(n as u8));
    let mut ring = Ring::with_allocator(channel.clone(), Allocator::DmaHeap(DmaHeapKind::Cma));
    ring.configure_block(1920 * 1080 * 2, 4, Direction::Read, 0, false, None)?;
    assert!(ring.pool().block().and_then(|block| block.fd()).is_some());

    ring.start(4)?;
    channel.complete(4);
    for expected in 0..4u8 {
        let slot = ring.wait_for(1, Some(Duration::from_secs(1)))?;
        assert!(slot.iter().all(|&b| b == expected));
    }
    ring.disable();
    Ok(())
}
