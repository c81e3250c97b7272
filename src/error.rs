// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::postproc::{Method, PixelKind};
use thiserror::Error;

/// Errors reported by the acquisition engine and the post-processing stage.
///
/// Configuration and transform errors are returned to the immediate caller
/// and never retried internally. A timeout is recoverable: the consumed count
/// has already been advanced to the requested target when it is reported.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid size, count or state transition while configuring the ring.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A wait or check was issued before any ring was configured.
    #[error("no ring buffers configured")]
    NoRingConfigured,

    /// The hardware did not reach `target` before the caller's deadline.
    #[error("timed out waiting for completion {target} (slot {slot})")]
    TimedOut { target: u64, slot: u32 },

    /// The hardware has lapped the application; unread slots were
    /// overwritten. Never raised by the engine itself, see
    /// [`Ring::overrun_error`](crate::ring::Ring::overrun_error).
    #[error("ring overrun: {done} done, {consumed} consumed, ring of {ring_size}")]
    Overrun {
        done: u64,
        consumed: u64,
        ring_size: u32,
    },

    /// The transfer channel reported a failure while blocking.
    #[error("wait failed: {0}")]
    WaitFailed(String),

    /// The transfer channel rejected a command.
    #[error("{command} command failed: {reason}")]
    HardwareCommandFailed {
        command: &'static str,
        reason: String,
    },

    #[error("no transform for {method:?} from {src:?} to {dst:?}")]
    UnsupportedCombination {
        method: Method,
        src: PixelKind,
        dst: PixelKind,
    },

    /// Buffer length does not hold `width` x `height` pixels.
    #[error("{which} buffer of {len} bytes cannot hold {width}x{height} (needs {needed})")]
    GeometryMismatch {
        which: &'static str,
        width: u32,
        height: u32,
        len: usize,
        needed: usize,
    },

    #[error("transform failed: {0}")]
    TransformFailed(String),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn command(command: &'static str, reason: impl ToString) -> Self {
        Error::HardwareCommandFailed {
            command,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
