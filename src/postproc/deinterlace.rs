// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel reorder kernels for multi-tap and interlaced sensors.
//!
//! Kernels take the image geometry in pixels and assume the caller already
//! checked that both buffers are large enough. Generic kernels are
//! parameterised by the number of bytes per pixel `B`.

use super::InterleaveTap;
use crate::error::{Error, Result};

#[inline]
fn put<const B: usize>(dst: &mut [u8], d: usize, src: &[u8], s: usize) {
    dst[d * B..(d + 1) * B].copy_from_slice(&src[s * B..(s + 1) * B]);
}

#[inline]
fn put16(dst: &mut [u8], d: usize, value: u16) {
    dst[d * 2..d * 2 + 2].copy_from_slice(&value.to_ne_bytes());
}

#[inline]
fn get16(src: &[u8], s: usize) -> u16 {
    u16::from_ne_bytes([src[s * 2], src[s * 2 + 1]])
}

/// Two rows arrive interleaved one pixel at a time.
fn row_pairs<const B: usize>(src: &[u8], w: usize, h: usize, dst: &mut [u8], odd_first: bool) {
    let mut s = 0;
    for y in (0..h.saturating_sub(1)).step_by(2) {
        let (first, second) = if odd_first { (y + 1, y) } else { (y, y + 1) };
        for x in 0..w {
            put::<B>(dst, first * w + x, src, s);
            put::<B>(dst, second * w + x, src, s + 1);
            s += 2;
        }
    }
}

/// 8-bit row pairs, odd row first.
pub fn es10_8(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    row_pairs::<1>(src, w, h, dst, true);
}

pub fn es10_16(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    row_pairs::<2>(src, w, h, dst, false);
}

pub fn es10_16_odd(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    row_pairs::<2>(src, w, h, dst, true);
}

/// Row pairs split into the top (even rows) and bottom (odd rows) halves
/// of the output.
pub fn es10_16_hilo(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let half = (h / 2) * w;
    for k in 0..half {
        put::<2>(dst, k, src, 2 * k);
        put::<2>(dst, half + k, src, 2 * k + 1);
    }
}

/// Two taps per row, one reading from the left edge and one from the right,
/// two pixels each.
pub fn piranha_8(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    for y in 0..h {
        let row = y * w;
        for q in 0..w / 4 {
            let s = row + 4 * q;
            dst[row + 2 * q] = src[s];
            dst[row + 2 * q + 1] = src[s + 1];
            dst[row + w - 2 - 2 * q] = src[s + 2];
            dst[row + w - 1 - 2 * q] = src[s + 3];
        }
    }
}

/// Four taps, each covering a quarter band of the row.
pub fn dalsa_4ch_8(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let band = w / 4;
    for y in 0..h {
        let row = y * w;
        for q in 0..band {
            let s = row + 4 * q;
            for tap in 0..4 {
                dst[row + tap * band + q] = src[s + tap];
            }
        }
    }
}

/// Four ports reading from the four corners towards the centre row.
pub fn specinst_4ch_16(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let mut s = 0;
    for y in 0..h / 2 {
        let ul = y * w;
        let ll = (h - y - 1) * w;
        for x in 0..w / 2 {
            put::<2>(dst, ll + x, src, s);
            put::<2>(dst, ll + w - 1 - x, src, s + 1);
            put::<2>(dst, ul + x, src, s + 2);
            put::<2>(dst, ul + w - 1 - x, src, s + 3);
            s += 4;
        }
    }
}

fn quadrant(
    src: &[u8],
    dst: &mut [u8],
    w: usize,
    rows: impl Iterator<Item = usize>,
    cols: impl Iterator<Item = usize> + Clone,
    first: usize,
) {
    let total = src.len() / 2;
    let mut i = first;
    for r in rows {
        for c in cols.clone() {
            if i < total {
                put::<2>(dst, r * w + c, src, i);
            }
            i += 4;
        }
    }
}

/// Four quadrants, each read from the outer corner inwards, samples
/// interleaved.
pub fn quad_16(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let (qrows, qcols) = (h / 2, w / 2);
    let src = &src[..w * h * 2];
    quadrant(src, dst, w, 0..qrows, 0..qcols, 0);
    quadrant(src, dst, w, 0..qrows, (qcols..w).rev(), 1);
    quadrant(src, dst, w, (qrows..h).rev(), 0..qcols, 2);
    quadrant(src, dst, w, (qrows..h).rev(), (qcols..w).rev(), 3);
}

/// Four corner taps, 16-bit, delivered lower-right first.
pub fn illunis_16(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let mut s = 0;
    for y in 0..h / 2 {
        let ul = y * w;
        let ll = (h - y - 1) * w;
        for x in 0..w / 2 {
            put::<2>(dst, ll + w - 1 - x, src, s);
            put::<2>(dst, ul + w - 1 - x, src, s + 1);
            put::<2>(dst, ll + x, src, s + 2);
            put::<2>(dst, ul + x, src, s + 3);
            s += 4;
        }
    }
}

/// Four corner taps, 8-bit, delivered upper-left first.
pub fn illunis_8(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let mut s = 0;
    for y in 0..h / 2 {
        let ul = y * w;
        let ll = (h - y - 1) * w;
        for x in 0..w / 2 {
            dst[ul + x] = src[s];
            dst[ll + x] = src[s + 1];
            dst[ul + w - 1 - x] = src[s + 2];
            dst[ll + w - 1 - x] = src[s + 3];
            s += 4;
        }
    }
}

fn inv_rt_row<const B: usize>(src: &[u8], w: usize, dst: &mut [u8]) {
    let (mut l, mut r, mut s) = (0, w.saturating_sub(1), 0);
    while l < r {
        put::<B>(dst, l, src, s);
        put::<B>(dst, r, src, s + 1);
        s += 2;
        l += 1;
        r -= 1;
    }
    if l == r && w > 0 {
        put::<B>(dst, l, src, w - 1);
    }
}

/// Left tap reads left to right, right tap reads right to left.
pub fn inv_rt<const B: usize>(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let stride = w * B;
    for y in 0..h {
        let row = y * stride..(y + 1) * stride;
        inv_rt_row::<B>(&src[row.clone()], w, &mut dst[row]);
    }
}

/// [`inv_rt`] through a one-line buffer.
pub fn inv_rt_in_place<const B: usize>(buf: &mut [u8], w: usize, h: usize) {
    let stride = w * B;
    let mut line = vec![0u8; stride];
    for y in 0..h {
        let row = y * stride..(y + 1) * stride;
        line.copy_from_slice(&buf[row.clone()]);
        inv_rt_row::<B>(&line, w, &mut buf[row]);
    }
}

/// Left tap fills the left half, right tap the right half, alternating.
pub fn even_rt<const B: usize>(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let half = w / 2;
    for y in 0..h {
        let row = y * w;
        for k in 0..half {
            put::<B>(dst, row + k, src, row + 2 * k);
            put::<B>(dst, row + half + k, src, row + 2 * k + 1);
        }
        if w % 2 == 1 {
            put::<B>(dst, row + w - 1, src, row + w - 1);
        }
    }
}

#[inline]
fn unpack12(p: &[u8]) -> (u16, u16) {
    let (a, b, c) = (u16::from(p[0]), u16::from(p[1]), u16::from(p[2]));
    (a | ((b & 0xf0) << 4), c | ((b & 0x0f) << 8))
}

/// Two 12-bit pixels packed in three bytes, inverted right tap.
pub fn inv_rt_24_12(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let mut s = 0;
    for y in 0..h {
        let row = y * w;
        let (mut l, mut r) = (0, w.saturating_sub(1));
        while l < r {
            let (right, left) = unpack12(&src[s..s + 3]);
            put16(dst, row + r, right);
            put16(dst, row + l, left);
            s += 3;
            l += 1;
            r -= 1;
        }
    }
}

/// Two 12-bit pixels packed in three bytes, in order.
pub fn interleave_24_12(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let mut s = 0;
    for y in 0..h {
        let row = y * w;
        for x in (0..w.saturating_sub(1)).step_by(2) {
            let (first, second) = unpack12(&src[s..s + 3]);
            put16(dst, row + x, first);
            put16(dst, row + x + 1, second);
            s += 3;
        }
    }
}

fn unpack_bits(src: &[u8], w: usize, h: usize, dst: &mut [u8], msb_first: bool) {
    let mut s = 0;
    for y in 0..h {
        let row = y * w;
        for x in (0..w / 8).map(|x| x * 8) {
            let byte = src[s];
            s += 1;
            for bit in 0..8 {
                let mask = if msb_first { 0x80 >> bit } else { 1 << bit };
                dst[row + x + bit] = if byte & mask != 0 { 0xff } else { 0 };
            }
        }
    }
}

/// One bit per pixel, most significant bit first.
pub fn one_bit_msb7(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    unpack_bits(src, w, h, dst, true);
}

/// One bit per pixel, least significant bit first.
pub fn one_bit_msb0(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    unpack_bits(src, w, h, dst, false);
}

pub fn bgr_to_rgb(src: &[u8], w: usize, h: usize, dst: &mut [u8]) {
    let n = w * h * 3;
    for (d, s) in dst[..n].chunks_exact_mut(3).zip(src[..n].chunks_exact(3)) {
        d[0] = s[2];
        d[1] = s[1];
        d[2] = s[0];
    }
}

pub fn bgr_to_rgb_in_place(buf: &mut [u8], w: usize, h: usize) {
    for px in buf[..w * h * 3].chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// Merges two fields into a progressive frame.
///
/// The odd field starts `interlace` bytes into `src`. A non-zero `offset`
/// shifts the even field right by that many pixels: the first line is
/// padded on the left and the last `offset` pixels of the field are dropped.
pub fn merge_fields(
    src: &[u8],
    w: usize,
    h: usize,
    dst: &mut [u8],
    bytes_per_pixel: usize,
    interlace: usize,
    offset: usize,
) -> Result<()> {
    let width = w * bytes_per_pixel;
    let offset = offset * bytes_per_pixel;
    let mut rows = h & !1;
    let field = (rows / 2) * width;
    if src.len() < interlace + field || interlace < field {
        return Err(Error::GeometryMismatch {
            which: "field",
            width: w as u32,
            height: h as u32,
            len: src.len(),
            needed: field * 2,
        });
    }
    if offset > 0 && offset >= width {
        return Err(Error::TransformFailed(format!(
            "field offset of {offset} bytes exceeds the line"
        )));
    }

    let (mut even, mut odd, mut d) = (0, interlace, 0);
    if offset > 0 && rows >= 2 {
        dst[..offset].fill(0);
        dst[offset..width].copy_from_slice(&src[..width - offset]);
        d += width;
        even += width - offset;
        dst[d..d + width].copy_from_slice(&src[odd..odd + width]);
        d += width;
        odd += width;
        rows -= 2;
    }

    while rows > 0 {
        dst[d..d + width].copy_from_slice(&src[even..even + width]);
        d += width;
        even += width;
        dst[d..d + width].copy_from_slice(&src[odd..odd + width]);
        d += width;
        odd += width;
        rows -= 2;
    }
    Ok(())
}

/// Checks every tap of a line-tap layout stays within the line.
pub fn check_line_taps(taps: &[InterleaveTap], width: usize) -> Result<()> {
    if taps.len() != 4 {
        return Err(Error::TransformFailed(format!(
            "line tap reorder needs 4 taps, got {}",
            taps.len()
        )));
    }
    let tap_width = (width / taps.len()) as isize;
    if tap_width == 0 {
        return Err(Error::TransformFailed(format!(
            "line of {width} pixels is too short for 4 taps"
        )));
    }
    for (i, tap) in taps.iter().enumerate() {
        let first = tap.start as isize;
        let last = first + (tap_width - 1) * tap.delta;
        let line = 0..width as isize;
        if !line.contains(&first) || !line.contains(&last) {
            return Err(Error::TransformFailed(format!(
                "tap {i} walks from {first} to {last}, outside a line of {width}"
            )));
        }
    }
    Ok(())
}

fn line_taps_row(src: &[u8], w: usize, dst: &mut [u8], taps: &[InterleaveTap]) {
    let mut index: Vec<isize> = taps.iter().map(|tap| tap.start as isize).collect();
    for x in (0..w / 4).map(|x| x * 4) {
        for (t, tap) in taps.iter().enumerate() {
            dst[index[t] as usize] = src[x + t];
            index[t] += tap.delta;
        }
    }
}

/// Four 8-bit taps with arbitrary start and direction. `taps` must have
/// passed [`check_line_taps`].
pub fn line_taps_8x4(src: &[u8], w: usize, h: usize, dst: &mut [u8], taps: &[InterleaveTap]) {
    for y in 0..h {
        let row = y * w..(y + 1) * w;
        line_taps_row(&src[row.clone()], w, &mut dst[row], taps);
    }
}

pub fn line_taps_8x4_in_place(buf: &mut [u8], w: usize, h: usize, taps: &[InterleaveTap]) {
    let mut line = vec![0u8; w];
    for y in 0..h {
        let row = y * w..(y + 1) * w;
        line.copy_from_slice(&buf[row.clone()]);
        line_taps_row(&line, w, &mut buf[row], taps);
    }
}

/// Stretches 16-bit samples to the full 8-bit range.
pub fn auto_scale(src: &[u8], w: usize, h: usize, dst: &mut [u8]) -> Result<()> {
    let n = w * h;
    let (min, max) = (0..n)
        .map(|i| get16(src, i))
        .fold((u16::MAX, u16::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if n == 0 || max <= min {
        return Err(Error::TransformFailed(
            "degenerate histogram: zero dynamic range".to_string(),
        ));
    }
    let range = u32::from(max - min);
    for (i, out) in dst[..n].iter_mut().enumerate() {
        *out = (u32::from(get16(src, i) - min) * 255 / range) as u8;
    }
    Ok(())
}
