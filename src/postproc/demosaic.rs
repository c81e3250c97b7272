// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Bayer demosaic to BGR with per-channel gamma correction.

use super::deinterlace;
use crate::error::{Error, Result};
use bayer::{BayerDepth, Demosaic, RasterDepth, RasterMut, CFA};
use std::io::Cursor;
use tracing::debug;

/// Colour filter layout of the first two sensor rows.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum BayerOrder {
    #[default]
    Bggr,
    Gbrg,
    Rggb,
    Grbg,
}

impl BayerOrder {
    /// Order from the sensor description bits: red on the first row and
    /// green as the first pixel.
    pub fn from_flags(red_row_first: bool, green_pixel_first: bool) -> Self {
        match (red_row_first, green_pixel_first) {
            (false, false) => BayerOrder::Bggr,
            (false, true) => BayerOrder::Gbrg,
            (true, false) => BayerOrder::Rggb,
            (true, true) => BayerOrder::Grbg,
        }
    }
}

impl From<BayerOrder> for CFA {
    fn from(order: BayerOrder) -> Self {
        match order {
            BayerOrder::Bggr => CFA::BGGR,
            BayerOrder::Gbrg => CFA::GBRG,
            BayerOrder::Rggb => CFA::RGGB,
            BayerOrder::Grbg => CFA::GRBG,
        }
    }
}

/// Colour correction applied after interpolation.
#[derive(Clone, Debug, PartialEq)]
pub struct BayerParams {
    pub order: BayerOrder,
    /// Red, green and blue gains.
    pub scale: [f64; 3],
    pub gamma: f64,
    /// Black level on the 8-bit scale, subtracted before gain.
    pub black_offset: u32,
}

impl Default for BayerParams {
    fn default() -> Self {
        Self {
            order: BayerOrder::default(),
            scale: [1.0; 3],
            gamma: 1.0,
            black_offset: 0,
        }
    }
}

/// Gamma tables mapping raw samples to 8-bit output, one per channel.
#[derive(Clone, Debug)]
pub struct GammaLut {
    red: Vec<u8>,
    green: Vec<u8>,
    blue: Vec<u8>,
}

impl GammaLut {
    /// Builds `2^src_depth` entries per channel.
    pub fn new(src_depth: u32, params: &BayerParams) -> Self {
        let size = 1usize << src_depth.clamp(1, 16);
        let table = |scale| gamma_table(size, scale, params.gamma, params.black_offset);
        Self {
            red: table(params.scale[0]),
            green: table(params.scale[1]),
            blue: table(params.scale[2]),
        }
    }

    pub fn red(&self) -> &[u8] {
        &self.red
    }

    pub fn green(&self) -> &[u8] {
        &self.green
    }

    pub fn blue(&self) -> &[u8] {
        &self.blue
    }
}

fn gamma_table(size: usize, scale: f64, gamma: f64, black_offset: u32) -> Vec<u8> {
    let step = 256.0 / size as f64;
    let exponent = if gamma > 0.0 { 1.0 / gamma } else { 1.0 };
    (0..size)
        .map(|i| {
            let v = (i as f64 * step - f64::from(black_offset)).max(0.0);
            let v = 255.0 * (scale * v / 255.0).powf(exponent);
            v.clamp(0.0, 255.0) as u8
        })
        .collect()
}

#[inline]
fn lookup(lut: &[u8], value: usize) -> u8 {
    lut[value.min(lut.len() - 1)]
}

/// Reordering applied to the raw mosaic before interpolation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Prepass {
    None,
    /// 8-bit row pairs, odd row first.
    RowPairs,
    /// Inverted right tap.
    InvertRight,
}

/// Demosaics a Bayer mosaic into packed BGR.
#[derive(Clone, Debug)]
pub struct Demosaicer {
    order: BayerOrder,
    wide: bool,
    prepass: Prepass,
    lut: GammaLut,
}

impl Demosaicer {
    pub fn new(src_depth: u32, params: &BayerParams, prepass: Prepass) -> Self {
        debug!(src_depth, ?params, ?prepass, "bayer lut computed");
        Self {
            order: params.order,
            wide: src_depth > 8,
            prepass,
            lut: GammaLut::new(src_depth, params),
        }
    }

    pub fn lut(&self) -> &GammaLut {
        &self.lut
    }

    pub fn apply(&self, src: &[u8], w: usize, h: usize, dst: &mut [u8]) -> Result<()> {
        let bytes = if self.wide { 2 } else { 1 };
        let raw = &src[..w * h * bytes];
        let reordered;
        let raw = match self.prepass {
            Prepass::None => raw,
            Prepass::RowPairs => {
                let mut buf = vec![0u8; raw.len()];
                deinterlace::es10_8(raw, w, h, &mut buf);
                reordered = buf;
                &reordered[..]
            }
            Prepass::InvertRight => {
                let mut buf = vec![0u8; raw.len()];
                if self.wide {
                    deinterlace::inv_rt::<2>(raw, w, h, &mut buf);
                } else {
                    deinterlace::inv_rt::<1>(raw, w, h, &mut buf);
                }
                reordered = buf;
                &reordered[..]
            }
        };

        let (bayer_depth, raster_depth) = if self.wide {
            (BayerDepth::Depth16LE, RasterDepth::Depth16)
        } else {
            (BayerDepth::Depth8, RasterDepth::Depth8)
        };
        let mut rgb = vec![0u8; w * h * 3 * bytes];
        {
            let mut raster = RasterMut::new(w, h, raster_depth, &mut rgb);
            bayer::run_demosaic(
                &mut Cursor::new(raw),
                bayer_depth,
                self.order.into(),
                Demosaic::Linear,
                &mut raster,
            )
            .map_err(|e| Error::TransformFailed(format!("demosaic failed: {e:?}")))?;
        }

        let out = dst[..w * h * 3].chunks_exact_mut(3);
        if self.wide {
            for (px, rgb) in out.zip(rgb.chunks_exact(6)) {
                let r = u16::from_le_bytes([rgb[0], rgb[1]]) as usize;
                let g = u16::from_le_bytes([rgb[2], rgb[3]]) as usize;
                let b = u16::from_le_bytes([rgb[4], rgb[5]]) as usize;
                px[0] = lookup(&self.lut.blue, b);
                px[1] = lookup(&self.lut.green, g);
                px[2] = lookup(&self.lut.red, r);
            }
        } else {
            for (px, rgb) in out.zip(rgb.chunks_exact(3)) {
                px[0] = lookup(&self.lut.blue, rgb[2] as usize);
                px[1] = lookup(&self.lut.green, rgb[1] as usize);
                px[2] = lookup(&self.lut.red, rgb[0] as usize);
            }
        }
        Ok(())
    }
}
