// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::{Args, WaitMode};
use clap::Parser;
use edgefirst_grabber::{
    channel::Direction,
    dummy::DummyChannel,
    memory::{Allocator, DmaHeapKind},
    postproc::{BayerParams, Method, PostProcParams, Registry, SharedLibraryLoader, TransformHandle},
    ring::Ring,
    Error as GrabberError,
};
use kanal::{Receiver, Sender};
use std::{
    error::Error,
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer};

fn update_fps(prev: &mut Instant, history: &mut [i64], index: &mut usize) -> i64 {
    let now = Instant::now();

    let elapsed = now.duration_since(*prev);
    *prev = now;

    history[*index] = 1e9 as i64 / elapsed.as_nanos().max(1) as i64;
    *index = (*index + 1) % history.len();

    (history.iter().sum::<i64>() as f64 / history.len() as f64).round() as i64
}

fn init_logging(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let stdout_log = tracing_subscriber::fmt::layer().with_filter(level);
    let journald = tracing_journald::layer()
        .ok()
        .map(|layer| layer.with_filter(level));
    let tracy = if args.tracy {
        let _client = tracy_client::Client::start();
        Some(tracing_tracy::TracyLayer::default())
    } else {
        None
    };

    let subscriber = tracing_subscriber::registry()
        .with(stdout_log)
        .with(journald)
        .with(tracy);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;
    Ok(())
}

/// Binds the requested transform. `None` passes frames through unchanged.
fn build_transform(args: &Args) -> Result<Option<TransformHandle>, Box<dyn Error>> {
    let bayer = BayerParams {
        order: args.bayer_order.into(),
        scale: [args.bayer_scale[0], args.bayer_scale[1], args.bayer_scale[2]],
        gamma: args.gamma,
        black_offset: args.black_offset,
    };
    let params = PostProcParams::new(args.width(), args.height(), args.depth, args.output_depth())
        .with_bayer(bayer)
        .with_interlace(args.interlace, args.offset)
        .with_taps(args.taps.clone());

    let mut registry = Registry::new();
    let method = match &args.module {
        Some(module) => {
            let mut loader = SharedLibraryLoader::new().with_symbol(args.module_symbol.clone());
            if let Some(path) = &args.module_path {
                loader = loader.with_search_path(path.clone());
            }
            let method = Method::Custom(0);
            registry.load_module(
                &loader,
                module,
                method,
                params.src_kind(),
                params.dst_kind(),
            )?;
            method
        }
        None => match args.method.method() {
            Some(method) => method,
            None => return Ok(None),
        },
    };

    match registry.instantiate(method, &params) {
        Ok(handle) => {
            info!(?method, src = ?handle.src(), dst = ?handle.dst(), "post-processing enabled");
            Ok(Some(handle))
        }
        Err(GrabberError::UnsupportedCombination { method, src, dst }) => {
            warn!(?method, ?src, ?dst, "no transform available, frames passed through");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Transforms or copies one frame into `frame`. A frame the transform
/// rejects is reported as `Ok(Err(reason))` so the run can continue.
fn process_frame(
    transform: Option<&TransformHandle>,
    src: &[u8],
    frame: &mut [u8],
) -> Result<Result<(), String>, GrabberError> {
    match transform {
        Some(transform) => match transform.apply(src, frame) {
            Ok(()) => Ok(Ok(())),
            Err(GrabberError::TransformFailed(reason)) => Ok(Err(reason)),
            Err(e) => Err(e),
        },
        None => {
            let len = frame.len();
            frame.copy_from_slice(&src[..len]);
            Ok(Ok(()))
        }
    }
}

fn write_frames(
    frames: Receiver<Vec<u8>>,
    recycle: Sender<Vec<u8>>,
    output: Option<PathBuf>,
) -> io::Result<u64> {
    let mut file = match output {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };
    let mut written = 0;
    while let Ok(frame) = frames.recv() {
        if let Some(file) = &mut file {
            file.write_all(&frame)?;
        }
        written += 1;
        // Dropped when the grab loop already holds enough spare buffers.
        let _ = recycle.try_send(frame);
    }
    if let Some(file) = &mut file {
        file.flush()?;
    }
    Ok(written)
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args)?;
    info!("EdgeFirst Frame Grabber");

    let channel = DummyChannel::new();
    channel.set_frame_filler(|n, buf| {
        for (i, px) in buf.iter_mut().enumerate() {
            *px = (i as u64).wrapping_add(n) as u8;
        }
    });

    let allocator = if args.dma_heap {
        Allocator::DmaHeap(DmaHeapKind::Cma)
    } else {
        Allocator::System
    };
    let mut ring = Ring::with_allocator(channel.clone(), allocator);
    let bufsize = args.frame_bytes();
    if args.block {
        ring.configure_block(
            bufsize,
            args.buffers,
            Direction::Read,
            args.header_size,
            args.header_before,
            None,
        )?;
    } else {
        ring.configure_separate(bufsize, args.buffers, Direction::Read, None)?;
    }

    let transform = build_transform(&args)?;
    let frame_len = transform
        .as_ref()
        .map_or(bufsize, TransformHandle::output_len);

    let (tx, rx) = kanal::bounded::<Vec<u8>>(args.buffers as usize);
    let (recycle_tx, recycle_rx) = kanal::bounded::<Vec<u8>>(args.buffers as usize);
    let output = args.output.clone();
    let writer = thread::Builder::new()
        .name("writer".to_string())
        .spawn(move || write_frames(rx, recycle_tx, output))?;

    let clock = channel.run(Duration::from_secs_f64(1.0 / args.fps.max(0.1)));
    let timeout = Some(Duration::from_millis(args.timeout));

    if args.frames == 0 {
        ring.start_continuous()?;
    } else {
        ring.start(u32::try_from(args.frames).unwrap_or(u32::MAX))?;
    }

    let first = ring.consumed_count();
    let mut prev = Instant::now();
    let mut history = vec![0; 30];
    let mut index = 0;
    let (mut grabbed, mut timeouts, mut overruns, mut skipped_total) = (0u64, 0u64, 0u64, 0u64);
    let mut failed = 0u64;

    while args.frames == 0 || ring.consumed_count() - first < args.frames {
        let mut frame = recycle_rx.try_recv().ok().flatten().unwrap_or_default();
        frame.resize(frame_len, 0);

        let mut skipped = 0;
        let slot = match args.wait_mode {
            WaitMode::Count => ring.wait_for(1, timeout),
            WaitMode::Next => ring.wait_for_next_timeout(timeout),
            WaitMode::Latest => ring.peek_latest(Some(&mut skipped)),
        };
        let slot = match slot {
            Ok(slot) => slot,
            Err(GrabberError::TimedOut { target, slot }) => {
                timeouts += 1;
                warn!(completion = target, slot, "frame timed out");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let (completion, slot_index) = (slot.completion(), slot.index());
        if let Some(header) = slot.header() {
            debug!(len = header.len(), "frame header");
        }
        if let Err(reason) = process_frame(transform.as_ref(), &slot, &mut frame)? {
            failed += 1;
            warn!(completion, slot = slot_index, "frame dropped: {reason}");
            continue;
        }

        if ring.overrun() {
            overruns += 1;
            warn!(
                done = ring.done_count(),
                consumed = ring.consumed_count(),
                "ring overrun, frame {completion} may be corrupt"
            );
        }

        skipped_total += u64::from(skipped);
        grabbed += 1;
        let fps = update_fps(&mut prev, &mut history, &mut index);
        debug!(completion, slot = slot_index, skipped, fps, "frame acquired");

        if tx.send(frame).is_err() {
            error!("frame writer exited early");
            break;
        }
    }

    ring.stop_after_current()?;
    drop(clock);
    drop(tx);

    let written = match writer.join() {
        Ok(result) => result?,
        Err(_) => return Err("frame writer panicked".into()),
    };
    ring.disable();

    info!(
        grabbed,
        written, timeouts, overruns, failed, skipped_total, "acquisition finished"
    );
    Ok(())
}
