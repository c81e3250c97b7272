// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Frame Grabber Library
//!
//! This library provides the ring-buffer acquisition engine of the EdgeFirst
//! frame grabber. A DMA-capable transfer channel writes frames into a ring
//! of N buffers and publishes a monotonic completion count; the engine maps
//! that count to ring slots, hands completed slots to the application
//! without copying, detects overruns and post-processes frames into their
//! final pixel layout.
//!
//! ## Features
//!
//! - **Buffer Pool**: Separate or contiguous (block) slot layouts, allocated
//!   from the process heap or a Linux DMA heap, or supplied by the caller.
//! - **Completion Tracking**: Slot indexing from the hardware completion
//!   counter with conservative overrun detection.
//! - **Wait Engine**: Blocking, polling and skip-to-latest waits with
//!   timeouts, hardware timestamps and explicit cancellation.
//! - **Post-Processing**: Table-driven deinterlace, tap reorder and Bayer
//!   demosaic transforms, extensible with application or shared-library
//!   transforms.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_grabber::{channel::Direction, dummy::DummyChannel, ring::Ring};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let channel = DummyChannel::new();
//! let mut ring = Ring::new(channel.clone());
//!
//! // Four 1 KiB slots for device-to-memory transfers
//! ring.configure_separate(1024, 4, Direction::Read, None)?;
//! ring.start(4)?;
//! channel.complete(4);
//!
//! for _ in 0..4 {
//!     let slot = ring.wait_for(1, Some(Duration::from_secs(1)))?;
//!     println!("slot {} holds {} bytes", slot.index(), slot.len());
//! }
//! ring.disable();
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! Slot memory is written by hardware outside the control of the Rust
//! borrow checker. A [`ring::SlotRef`] borrows the ring, so a slot can never
//! outlive `disable()`, but its contents may be overwritten once the
//! hardware laps the ring. Check [`ring::Ring::overrun`] after using a slot.

pub mod channel;
pub mod dummy;
pub mod error;
pub mod memory;
pub mod pool;
pub mod postproc;
pub mod ring;
pub mod tracker;

pub use error::{Error, Result};
