// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_grabber::postproc::{BayerOrder, InterleaveTap, Method};
use std::path::PathBuf;

/// How the acquisition loop waits for frames.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum WaitMode {
    /// Consume every frame in completion order
    Count,
    /// Skip to the first frame completed after each wait
    Next,
    /// Consume everything done and keep only the newest frame
    Latest,
}

/// Post-processing applied to each frame.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum MethodSetting {
    /// Leave frames as acquired
    None,
    /// 8-bit row pair interleave
    ByteInterleave,
    /// 8-bit row pair interleave followed by Bayer demosaic
    Es10Bggr,
    /// 16-bit row pair interleave
    WordInterleave,
    /// 16-bit row pair interleave, odd row first
    WordInterleaveOdd,
    /// 16-bit row pairs split into top and bottom halves
    WordInterleaveHiLo,
    /// Merge two interlaced fields, see --interlace and --offset
    FieldInterlace,
    /// Reorder each line from the taps given by --taps
    LineTaps,
    /// 8-bit Bayer demosaic
    Bggr,
    /// 16-bit Bayer demosaic
    BggrWord,
    /// Four tap quarter bands
    Dalsa4Channel,
    /// Right tap read right to left
    InvertRight,
    /// Inverted right tap followed by Bayer demosaic
    InvertRightBggr,
    /// Alternating left and right half taps
    EvenRight,
    /// Two taps, two pixels each, from both edges
    Piranha4Channel,
    /// Four ports from the corners
    SpecInst4Port,
    /// Four interleaved quadrants
    Quadrant,
    /// Four corner taps
    Illunis,
    /// Packed 12-bit, inverted right tap
    InvertRight24To12,
    /// Packed 12-bit, in order
    Interleave24To12,
    /// One bit per pixel, MSB first
    OneBitMsb7,
    /// One bit per pixel, LSB first
    OneBitMsb0,
    /// Swap blue and red
    BgrToRgb,
    /// Stretch 16-bit frames to 8 bits
    AutoScale,
}

impl MethodSetting {
    pub fn method(self) -> Option<Method> {
        let method = match self {
            MethodSetting::None => return None,
            MethodSetting::ByteInterleave => Method::ByteInterleave,
            MethodSetting::Es10Bggr => Method::Es10Bggr,
            MethodSetting::WordInterleave => Method::WordInterleave,
            MethodSetting::WordInterleaveOdd => Method::WordInterleaveOdd,
            MethodSetting::WordInterleaveHiLo => Method::WordInterleaveHiLo,
            MethodSetting::FieldInterlace => Method::FieldInterlace,
            MethodSetting::LineTaps => Method::LineTaps,
            MethodSetting::Bggr => Method::Bggr,
            MethodSetting::BggrWord => Method::BggrWord,
            MethodSetting::Dalsa4Channel => Method::Dalsa4Channel,
            MethodSetting::InvertRight => Method::InvertRight,
            MethodSetting::InvertRightBggr => Method::InvertRightBggr,
            MethodSetting::EvenRight => Method::EvenRight,
            MethodSetting::Piranha4Channel => Method::Piranha4Channel,
            MethodSetting::SpecInst4Port => Method::SpecInst4Port,
            MethodSetting::Quadrant => Method::Quadrant,
            MethodSetting::Illunis => Method::Illunis,
            MethodSetting::InvertRight24To12 => Method::InvertRight24To12,
            MethodSetting::Interleave24To12 => Method::Interleave24To12,
            MethodSetting::OneBitMsb7 => Method::OneBitMsb7,
            MethodSetting::OneBitMsb0 => Method::OneBitMsb0,
            MethodSetting::BgrToRgb => Method::BgrToRgb,
            MethodSetting::AutoScale => Method::AutoScale,
        };
        Some(method)
    }
}

/// Parses a line tap given as `start:delta`, e.g. `7:-1`.
fn parse_tap(s: &str) -> Result<InterleaveTap, String> {
    let (start, delta) = s
        .split_once(':')
        .ok_or_else(|| format!("tap {s:?} is not start:delta"))?;
    let start = start.parse().map_err(|e| format!("tap start {start:?}: {e}"))?;
    let delta = delta.parse().map_err(|e| format!("tap delta {delta:?}: {e}"))?;
    Ok(InterleaveTap { start, delta })
}

/// Colour filter order of the sensor's first two rows.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum BayerSetting {
    Bggr,
    Gbrg,
    Rggb,
    Grbg,
}

impl From<BayerSetting> for BayerOrder {
    fn from(setting: BayerSetting) -> Self {
        match setting {
            BayerSetting::Bggr => BayerOrder::Bggr,
            BayerSetting::Gbrg => BayerOrder::Gbrg,
            BayerSetting::Rggb => BayerOrder::Rggb,
            BayerSetting::Grbg => BayerOrder::Grbg,
        }
    }
}

/// Command-line arguments for the EdgeFirst frame grabber.
///
/// Runs ring-buffer acquisition against the software transfer channel,
/// post-processes every frame and optionally writes the result to a file.
/// Arguments can be specified via command line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-grabber --buffers 8 --frames 300 --method bggr --output frames.bgr
///
/// # Via environment variables
/// export BUFFERS=8
/// export METHOD=bggr
/// edgefirst-grabber
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of ring buffers
    #[arg(short, long, env = "BUFFERS", default_value = "4")]
    pub buffers: u32,

    /// Frame size in pixels (width height)
    #[arg(
        long,
        env = "FRAME_SIZE",
        default_value = "640 480",
        value_delimiter = ' ',
        num_args = 2
    )]
    pub frame_size: Vec<u32>,

    /// Bits per raw pixel
    #[arg(short, long, env = "DEPTH", default_value = "8")]
    pub depth: u32,

    /// Bits per processed pixel, defaults to the raw depth
    #[arg(long, env = "OUTPUT_DEPTH")]
    pub output_depth: Option<u32>,

    /// Frames to acquire, 0 runs continuously
    #[arg(short, long, env = "FRAMES", default_value = "100")]
    pub frames: u64,

    /// Wait timeout per frame in milliseconds
    #[arg(long, env = "TIMEOUT", default_value = "1000")]
    pub timeout: u64,

    /// Frame wait strategy
    #[arg(long, env = "WAIT_MODE", default_value = "count", value_enum)]
    pub wait_mode: WaitMode,

    /// Post-processing method
    #[arg(short, long, env = "METHOD", default_value = "none", value_enum)]
    pub method: MethodSetting,

    /// Bayer filter order for demosaic methods
    #[arg(long, env = "BAYER_ORDER", default_value = "bggr", value_enum)]
    pub bayer_order: BayerSetting,

    /// Red, green and blue gains for demosaic methods (r g b)
    #[arg(
        long,
        env = "BAYER_SCALE",
        default_value = "1 1 1",
        value_delimiter = ' ',
        num_args = 3
    )]
    pub bayer_scale: Vec<f64>,

    /// Gamma for demosaic methods
    #[arg(long, env = "GAMMA", default_value = "1.0")]
    pub gamma: f64,

    /// Black level subtracted before gain, 8-bit scale
    #[arg(long, env = "BLACK_OFFSET", default_value = "0")]
    pub black_offset: u32,

    /// Byte offset of the odd field for field-interlace, 0 follows the even field
    #[arg(long, env = "INTERLACE", default_value = "0")]
    pub interlace: usize,

    /// Pixels the even field is shifted right by for field-interlace
    #[arg(long, env = "OFFSET", default_value = "0")]
    pub offset: usize,

    /// Line taps for line-taps as start:delta pairs (e.g. "0:1 7:-1")
    #[arg(
        long,
        env = "TAPS",
        value_delimiter = ' ',
        value_parser = parse_tap,
        allow_hyphen_values = true
    )]
    pub taps: Vec<InterleaveTap>,

    /// Shared library providing an external transform, replaces --method
    #[arg(long, env = "MODULE")]
    pub module: Option<String>,

    /// Directory searched for --module
    #[arg(long, env = "MODULE_PATH")]
    pub module_path: Option<PathBuf>,

    /// Symbol resolved in --module
    #[arg(long, env = "MODULE_SYMBOL", default_value = "grabber_transform")]
    pub module_symbol: String,

    /// Carve all buffers from one contiguous block
    #[arg(long, env = "BLOCK")]
    pub block: bool,

    /// Header bytes reserved per buffer in block mode
    #[arg(long, env = "HEADER_SIZE", default_value = "0")]
    pub header_size: usize,

    /// Place the header before the frame instead of after it
    #[arg(long, env = "HEADER_BEFORE")]
    pub header_before: bool,

    /// Allocate buffers from the CMA DMA heap
    #[arg(long, env = "DMA_HEAP")]
    pub dma_heap: bool,

    /// Frame rate of the simulated camera
    #[arg(long, env = "FPS", default_value = "30")]
    pub fps: f64,

    /// Append processed frames to this file
    #[arg(short, long, env = "OUTPUT")]
    pub output: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    pub fn width(&self) -> u32 {
        self.frame_size[0]
    }

    pub fn height(&self) -> u32 {
        self.frame_size[1]
    }

    pub fn output_depth(&self) -> u32 {
        self.output_depth.unwrap_or(self.depth)
    }

    /// Raw frame size in bytes, rounded up to the even transfer size.
    pub fn frame_bytes(&self) -> usize {
        let bits = self.width() as usize * self.height() as usize * self.depth as usize;
        bits.div_ceil(8).next_multiple_of(2)
    }
}
