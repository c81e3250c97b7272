// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Software transfer channel.
//!
//! [`DummyChannel`] behaves like a frame grabber with no camera attached:
//! transfers complete when [`DummyChannel::complete`] is called or, with
//! [`DummyChannel::run`], at a fixed frame rate. Registered buffers are
//! optionally filled by a frame generator so the post-processing path can
//! be exercised without hardware.

use crate::{
    channel::{Direction, Timestamp, TransferChannel, WaitOutcome, MAX_DMA_BUFFERS},
    error::{Error, Result},
};
use std::{
    collections::VecDeque,
    fmt,
    slice::from_raw_parts_mut,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, trace, warn};

/// Completion timestamps kept for [`TransferChannel::timestamp_of`].
const TIMESTAMP_HISTORY: usize = 1024;

/// Marker for free-running acquisition.
const CONTINUOUS: u64 = u64::MAX;

type FrameFiller = Box<dyn FnMut(u64, &mut [u8]) + Send>;

#[derive(Copy, Clone, Debug)]
struct Registration {
    // Stored as an integer so the state stays `Send`.
    address: usize,
    size: usize,
    direction: Direction,
}

#[derive(Default)]
struct State {
    buffers: Vec<Option<Registration>>,
    numbufs: u32,
    done: u64,
    todo: u64,
    timestamps: VecDeque<(u64, Timestamp)>,
    filler: Option<FrameFiller>,
    failing: Option<&'static str>,
}

impl State {
    fn check(&self, command: &'static str) -> Result<()> {
        match self.failing {
            Some(failing) if failing == command => Err(Error::command(command, "injected failure")),
            _ => Ok(()),
        }
    }
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    max_buffers: u32,
}

/// In-process [`TransferChannel`] with manually or clock driven completions.
///
/// Clones share the same device state, so a test can hand one clone to a
/// [`Ring`](crate::ring::Ring) and drive completions with another.
#[derive(Clone)]
pub struct DummyChannel {
    shared: Arc<Shared>,
}

impl Default for DummyChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyChannel {
    pub fn new() -> Self {
        Self::with_max_buffers(MAX_DMA_BUFFERS)
    }

    pub fn with_max_buffers(max_buffers: u32) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                cond: Condvar::new(),
                max_buffers,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking filler must not wedge the device.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Installs a generator called with the transfer number and the slot
    /// memory for every completed device-to-memory transfer.
    pub fn set_frame_filler(&self, filler: impl FnMut(u64, &mut [u8]) + Send + 'static) {
        self.lock().filler = Some(Box::new(filler));
    }

    /// Makes the next `command` fail with [`Error::HardwareCommandFailed`]
    /// until cleared with `None`. Command names match the trait methods.
    pub fn fail_command(&self, command: Option<&'static str>) {
        self.lock().failing = command;
    }

    /// Completes up to `n` queued transfers and wakes any waiter. Returns the
    /// number actually completed, which is less than `n` when fewer were
    /// queued.
    pub fn complete(&self, n: u64) -> u64 {
        let mut state = self.lock();
        let mut completed = 0;
        while completed < n && state.todo > state.done && state.numbufs > 0 {
            let number = state.done;
            let slot = (number % u64::from(state.numbufs)) as usize;
            let registration = state.buffers.get(slot).copied().flatten();
            if let (Some(reg), Some(filler)) = (registration, state.filler.as_mut()) {
                if reg.direction == Direction::Read {
                    let buf = unsafe { from_raw_parts_mut(reg.address as *mut u8, reg.size) };
                    filler(number, buf);
                }
            }
            if state.timestamps.len() == TIMESTAMP_HISTORY {
                state.timestamps.pop_front();
            }
            state.timestamps.push_back((number, now()));
            state.done += 1;
            completed += 1;
        }
        if completed > 0 {
            trace!(done = state.done, completed, "transfers completed");
            self.shared.cond.notify_all();
        }
        completed
    }

    /// Starts a clock thread completing one transfer every `interval` until
    /// the returned handle is dropped.
    pub fn run(&self, interval: Duration) -> DummyClock {
        let stop = Arc::new(AtomicBool::new(false));
        let channel = self.clone();
        let flag = stop.clone();
        let handle = thread::spawn(move || {
            let mut next = Instant::now() + interval;
            while !flag.load(Ordering::Relaxed) {
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                }
                next += interval;
                channel.complete(1);
            }
        });
        debug!(?interval, "dummy clock started");
        DummyClock {
            stop,
            handle: Some(handle),
        }
    }

    /// Size and direction registered for slot `index`.
    pub fn registered(&self, index: u32) -> Option<(usize, Direction)> {
        self.lock()
            .buffers
            .get(index as usize)
            .copied()
            .flatten()
            .map(|reg| (reg.size, reg.direction))
    }

    pub fn registered_address(&self, index: u32) -> Option<*mut u8> {
        self.lock()
            .buffers
            .get(index as usize)
            .copied()
            .flatten()
            .map(|reg| reg.address as *mut u8)
    }

    /// Number of slots currently registered.
    pub fn registered_count(&self) -> usize {
        self.lock().buffers.iter().flatten().count()
    }

    pub fn buffer_count(&self) -> u32 {
        self.lock().numbufs
    }
}

fn now() -> Timestamp {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp::new(elapsed.as_secs() as i64, elapsed.subsec_nanos())
}

impl TransferChannel for DummyChannel {
    fn register_buffer(
        &self,
        index: u32,
        address: *mut u8,
        size: usize,
        direction: Direction,
    ) -> Result<()> {
        let mut state = self.lock();
        state.check("register_buffer")?;
        if index >= self.shared.max_buffers {
            return Err(Error::command(
                "register_buffer",
                format!("index {index} beyond {} buffers", self.shared.max_buffers),
            ));
        }
        if address.is_null() {
            return Err(Error::command("register_buffer", "null address"));
        }
        let index = index as usize;
        if state.buffers.len() <= index {
            state.buffers.resize(index + 1, None);
        }
        state.buffers[index] = Some(Registration {
            address: address as usize,
            size,
            direction,
        });
        Ok(())
    }

    fn set_buffer_count(&self, n: u32) -> Result<()> {
        let mut state = self.lock();
        state.check("set_buffer_count")?;
        // A new ring starts a new acquisition session.
        state.numbufs = n;
        state.done = 0;
        state.todo = 0;
        state.timestamps.clear();
        self.shared.cond.notify_all();
        Ok(())
    }

    fn start(&self, n: u32) -> Result<()> {
        let mut state = self.lock();
        state.check("start")?;
        if state.numbufs == 0 {
            return Err(Error::command("start", "no buffers configured"));
        }
        state.todo = match n {
            0 => CONTINUOUS,
            n if state.todo == CONTINUOUS => {
                debug!(n, "already free-running");
                CONTINUOUS
            }
            n => state.todo.max(state.done) + u64::from(n),
        };
        Ok(())
    }

    fn stop_after_current(&self) -> Result<()> {
        let mut state = self.lock();
        state.check("stop_after_current")?;
        if state.todo > state.done {
            state.todo = state.done + 1;
        }
        Ok(())
    }

    fn abort_now(&self) -> Result<()> {
        let mut state = self.lock();
        state.check("abort_now")?;
        state.todo = state.done;
        self.shared.cond.notify_all();
        Ok(())
    }

    fn completion_count(&self) -> u64 {
        self.lock().done
    }

    fn todo_count(&self) -> u64 {
        self.lock().todo
    }

    fn set_next_buffer(&self, n: u64) -> Result<()> {
        let mut state = self.lock();
        state.check("set_next_buffer")?;
        state.done = n;
        state.todo = n;
        self.shared.cond.notify_all();
        Ok(())
    }

    fn block_until(&self, target: u64, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let state = self.lock();
        state.check("block_until")?;
        let cond = &self.shared.cond;
        let state = match timeout {
            Some(timeout) => {
                let (state, result) = cond
                    .wait_timeout_while(state, timeout, |s| s.done < target)
                    .map_err(|_| Error::command("block_until", "device state poisoned"))?;
                if result.timed_out() && state.done < target {
                    return Ok(WaitOutcome::TimedOut);
                }
                state
            }
            None => cond
                .wait_while(state, |s| s.done < target)
                .map_err(|_| Error::command("block_until", "device state poisoned"))?,
        };
        trace!(completion = target, done = state.done, "wait satisfied");
        Ok(WaitOutcome::Completed)
    }

    fn timestamp_of(&self, n: u64) -> Result<Timestamp> {
        let state = self.lock();
        state.check("timestamp_of")?;
        state
            .timestamps
            .iter()
            .rev()
            .find(|(number, _)| *number == n)
            .map(|(_, ts)| *ts)
            .ok_or_else(|| Error::command("timestamp_of", format!("no timestamp for transfer {n}")))
    }

    fn release_buffer(&self, index: u32) -> Result<()> {
        let mut state = self.lock();
        state.check("release_buffer")?;
        if let Some(reg) = state.buffers.get_mut(index as usize) {
            *reg = None;
        }
        Ok(())
    }

    fn max_buffers(&self) -> u32 {
        self.shared.max_buffers
    }
}

impl fmt::Debug for DummyChannel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("DummyChannel")
            .field("numbufs", &state.numbufs)
            .field("done", &state.done)
            .field("todo", &state.todo)
            .finish()
    }
}

/// Frame clock started by [`DummyChannel::run`]. Stops on drop.
pub struct DummyClock {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for DummyClock {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("dummy clock thread panicked");
            }
        }
        debug!("dummy clock stopped");
    }
}
