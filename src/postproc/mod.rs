// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Post-processing of acquired frames.
//!
//! Transforms are looked up by `(Method, source PixelKind, destination
//! PixelKind)`, bound to the session geometry with [`instantiate`] and then
//! applied to each frame. A lookup miss means the raw slot is already in its
//! final form.
//!
//! Most transforms read the source while writing a separate destination.
//! The few that can run on a single buffer expose it through
//! [`TransformHandle::in_place`], so an in-place call on any other transform
//! does not compile.
//!
//! ```no_run
//! # use edgefirst_grabber::postproc::{instantiate, Method, PostProcParams};
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let params = PostProcParams::new(640, 480, 8, 24);
//! let debayer = instantiate(Method::Bggr, &params)?;
//! let raw = vec![0u8; 640 * 480];
//! let mut bgr = vec![0u8; debayer.output_len()];
//! debayer.apply(&raw, &mut bgr)?;
//! # Ok(())
//! # }
//! ```

pub mod deinterlace;
pub mod demosaic;
pub mod module;

pub use demosaic::{BayerOrder, BayerParams, GammaLut};
pub use module::{ModuleLoader, SharedLibraryLoader};

use crate::error::{Error, Result};
use demosaic::{Demosaicer, Prepass};
use std::{fmt, sync::Arc};
use tracing::debug;

/// Pixel storage class derived from the bit depth.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PixelKind {
    Byte,
    UShort,
    Bgr,
    Bgra,
}

impl PixelKind {
    pub fn from_depth(depth: u32) -> Self {
        match depth {
            0..=8 => PixelKind::Byte,
            9..=16 => PixelKind::UShort,
            17..=24 => PixelKind::Bgr,
            _ => PixelKind::Bgra,
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            PixelKind::Byte => 1,
            PixelKind::UShort => 2,
            PixelKind::Bgr => 3,
            PixelKind::Bgra => 4,
        }
    }
}

/// Post-processing method. `Custom` identifies externally registered
/// transforms.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    ByteInterleave,
    Es10Bggr,
    WordInterleave,
    WordInterleaveOdd,
    WordInterleaveHiLo,
    FieldInterlace,
    Bggr,
    BggrWord,
    Dalsa4Channel,
    InvertRight,
    InvertRightBggr,
    EvenRight,
    Piranha4Channel,
    SpecInst4Port,
    Quadrant,
    Illunis,
    InvertRight24To12,
    Interleave24To12,
    OneBitMsb7,
    OneBitMsb0,
    BgrToRgb,
    LineTaps,
    AutoScale,
    Custom(u32),
}

/// One tap of a line-tap layout: first pixel written and step per sample.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct InterleaveTap {
    pub start: usize,
    pub delta: isize,
}

/// Session parameters a transform is bound to.
#[derive(Clone, Debug, PartialEq)]
pub struct PostProcParams {
    pub width: u32,
    pub height: u32,
    pub src_depth: u32,
    pub dst_depth: u32,
    /// Overrides `height` for transforms, e.g. when several frames are
    /// grabbed into one buffer.
    pub frame_height: Option<u32>,
    /// Byte offset of the odd field; zero places it right after the even
    /// field.
    pub interlace: usize,
    /// Pixels the even field is shifted right by.
    pub offset: usize,
    pub bayer: BayerParams,
    pub taps: Vec<InterleaveTap>,
}

impl PostProcParams {
    pub fn new(width: u32, height: u32, src_depth: u32, dst_depth: u32) -> Self {
        Self {
            width,
            height,
            src_depth,
            dst_depth,
            frame_height: None,
            interlace: 0,
            offset: 0,
            bayer: BayerParams::default(),
            taps: Vec::new(),
        }
    }

    pub fn with_frame_height(mut self, frame_height: u32) -> Self {
        self.frame_height = Some(frame_height);
        self
    }

    pub fn with_interlace(mut self, interlace: usize, offset: usize) -> Self {
        self.interlace = interlace;
        self.offset = offset;
        self
    }

    pub fn with_bayer(mut self, bayer: BayerParams) -> Self {
        self.bayer = bayer;
        self
    }

    pub fn with_taps(mut self, taps: Vec<InterleaveTap>) -> Self {
        self.taps = taps;
        self
    }

    pub fn src_kind(&self) -> PixelKind {
        PixelKind::from_depth(self.src_depth)
    }

    pub fn dst_kind(&self) -> PixelKind {
        PixelKind::from_depth(self.dst_depth)
    }

    /// Height the transform works on.
    pub fn effective_height(&self) -> u32 {
        self.frame_height.unwrap_or(self.height)
    }
}

/// A frame transform reading `src` and writing a distinct `dst`.
///
/// Closures with the matching signature implement this trait, so
/// application transforms can be registered directly.
pub trait Transform: Send + Sync {
    fn apply(&self, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()>;
}

/// A transform that may also run with source and destination in one buffer.
pub trait InPlaceTransform: Transform {
    fn apply_in_place(&self, buf: &mut [u8], width: u32, height: u32) -> Result<()>;
}

impl<F> Transform for F
where
    F: Fn(&[u8], u32, u32, &mut [u8]) -> Result<()> + Send + Sync,
{
    fn apply(&self, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()> {
        self(src, width, height, dst)
    }
}

type ReorderFn = fn(&[u8], usize, usize, &mut [u8]);
type InPlaceFn = fn(&mut [u8], usize, usize);

#[derive(Clone)]
enum Kernel {
    Reorder(ReorderFn),
    ReorderInPlace(ReorderFn, InPlaceFn),
    Fields,
    Bayer(Prepass),
    LineTaps,
    AutoScale,
    External(Arc<dyn Transform>),
    ExternalInPlace(Arc<dyn InPlaceTransform>),
}

/// Table entry describing one transform.
#[derive(Clone)]
pub struct TransformDescriptor {
    method: Method,
    src: PixelKind,
    dst: PixelKind,
    src_bits: u32,
    dst_bits: u32,
    kernel: Kernel,
}

impl TransformDescriptor {
    const fn new(
        method: Method,
        src: PixelKind,
        dst: PixelKind,
        src_bits: u32,
        dst_bits: u32,
        kernel: Kernel,
    ) -> Self {
        Self {
            method,
            src,
            dst,
            src_bits,
            dst_bits,
            kernel,
        }
    }

    fn external(method: Method, src: PixelKind, dst: PixelKind, kernel: Kernel) -> Self {
        let src_bits = src.bytes() as u32 * 8;
        let dst_bits = dst.bytes() as u32 * 8;
        Self::new(method, src, dst, src_bits, dst_bits, kernel)
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn src(&self) -> PixelKind {
        self.src
    }

    pub fn dst(&self) -> PixelKind {
        self.dst
    }

    /// Bits per source pixel, used to validate buffer sizes.
    pub fn src_bits(&self) -> u32 {
        self.src_bits
    }

    pub fn dst_bits(&self) -> u32 {
        self.dst_bits
    }

    /// Whether the transform may run on a single buffer.
    pub fn in_place_safe(&self) -> bool {
        matches!(
            self.kernel,
            Kernel::ReorderInPlace(..) | Kernel::LineTaps | Kernel::ExternalInPlace(_)
        )
    }

    pub fn is_external(&self) -> bool {
        matches!(self.kernel, Kernel::External(_) | Kernel::ExternalInPlace(_))
    }

    fn matches(&self, method: Method, src: PixelKind, dst: PixelKind) -> bool {
        self.method == method && self.src == src && self.dst == dst
    }

    /// Binds the transform to the session geometry. Lookup tables are
    /// computed here, once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransformFailed`] when the parameters are unusable
    /// for this transform, such as a tap layout walking off the line.
    pub fn instantiate(&self, params: &PostProcParams) -> Result<TransformHandle> {
        let width = params.width as usize;
        let height = params.effective_height() as usize;
        let op = match &self.kernel {
            Kernel::Reorder(f) => Op::Reorder(*f),
            Kernel::ReorderInPlace(f, g) => Op::ReorderInPlace(*f, *g),
            Kernel::Fields => {
                let bytes_per_pixel = self.src.bytes();
                let interlace = match params.interlace {
                    0 => (height / 2) * width * bytes_per_pixel,
                    n => n,
                };
                Op::Fields {
                    bytes_per_pixel,
                    interlace,
                    offset: params.offset,
                }
            }
            Kernel::Bayer(prepass) => Op::Bayer(Arc::new(Demosaicer::new(
                params.src_depth,
                &params.bayer,
                *prepass,
            ))),
            Kernel::LineTaps => {
                deinterlace::check_line_taps(&params.taps, width)?;
                Op::LineTaps(params.taps.clone().into())
            }
            Kernel::AutoScale => Op::AutoScale,
            Kernel::External(t) => Op::External(t.clone()),
            Kernel::ExternalInPlace(t) => Op::ExternalInPlace(t.clone()),
        };
        debug!(method = ?self.method, width, height, "transform instantiated");
        Ok(TransformHandle {
            method: self.method,
            src: self.src,
            dst: self.dst,
            src_bits: self.src_bits,
            dst_bits: self.dst_bits,
            width: params.width,
            height: params.effective_height(),
            src_depth: params.src_depth,
            dst_depth: params.dst_depth,
            op,
        })
    }
}

impl fmt::Debug for TransformDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransformDescriptor")
            .field("method", &self.method)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("in_place_safe", &self.in_place_safe())
            .field("external", &self.is_external())
            .finish()
    }
}

use Method as M;
use PixelKind::{Bgr, Byte, UShort};

#[rustfmt::skip]
static BUILTIN: &[TransformDescriptor] = &[
    TransformDescriptor::new(M::ByteInterleave, Byte, Byte, 8, 8, Kernel::Reorder(deinterlace::es10_8)),
    TransformDescriptor::new(M::Es10Bggr, Byte, Bgr, 8, 24, Kernel::Bayer(Prepass::RowPairs)),
    TransformDescriptor::new(M::WordInterleave, UShort, UShort, 16, 16, Kernel::Reorder(deinterlace::es10_16)),
    TransformDescriptor::new(M::WordInterleaveOdd, UShort, UShort, 16, 16, Kernel::Reorder(deinterlace::es10_16_odd)),
    TransformDescriptor::new(M::WordInterleaveHiLo, UShort, UShort, 16, 16, Kernel::Reorder(deinterlace::es10_16_hilo)),
    TransformDescriptor::new(M::FieldInterlace, Byte, Byte, 8, 8, Kernel::Fields),
    TransformDescriptor::new(M::FieldInterlace, UShort, UShort, 16, 16, Kernel::Fields),
    TransformDescriptor::new(M::Bggr, Byte, Bgr, 8, 24, Kernel::Bayer(Prepass::None)),
    TransformDescriptor::new(M::BggrWord, UShort, Bgr, 16, 24, Kernel::Bayer(Prepass::None)),
    TransformDescriptor::new(M::Dalsa4Channel, Byte, Byte, 8, 8, Kernel::Reorder(deinterlace::dalsa_4ch_8)),
    TransformDescriptor::new(
        M::InvertRight,
        Byte,
        Byte,
        8,
        8,
        Kernel::ReorderInPlace(deinterlace::inv_rt::<1>, deinterlace::inv_rt_in_place::<1>),
    ),
    TransformDescriptor::new(
        M::InvertRight,
        UShort,
        UShort,
        16,
        16,
        Kernel::ReorderInPlace(deinterlace::inv_rt::<2>, deinterlace::inv_rt_in_place::<2>),
    ),
    TransformDescriptor::new(M::InvertRightBggr, Byte, Bgr, 8, 24, Kernel::Bayer(Prepass::InvertRight)),
    TransformDescriptor::new(M::InvertRightBggr, UShort, Bgr, 16, 24, Kernel::Bayer(Prepass::InvertRight)),
    TransformDescriptor::new(M::EvenRight, Byte, Byte, 8, 8, Kernel::Reorder(deinterlace::even_rt::<1>)),
    TransformDescriptor::new(M::EvenRight, UShort, UShort, 16, 16, Kernel::Reorder(deinterlace::even_rt::<2>)),
    TransformDescriptor::new(M::Piranha4Channel, Byte, Byte, 8, 8, Kernel::Reorder(deinterlace::piranha_8)),
    TransformDescriptor::new(M::SpecInst4Port, UShort, UShort, 16, 16, Kernel::Reorder(deinterlace::specinst_4ch_16)),
    TransformDescriptor::new(M::Quadrant, UShort, UShort, 16, 16, Kernel::Reorder(deinterlace::quad_16)),
    TransformDescriptor::new(M::Illunis, Byte, Byte, 8, 8, Kernel::Reorder(deinterlace::illunis_8)),
    TransformDescriptor::new(M::Illunis, UShort, UShort, 16, 16, Kernel::Reorder(deinterlace::illunis_16)),
    TransformDescriptor::new(M::InvertRight24To12, Bgr, UShort, 12, 16, Kernel::Reorder(deinterlace::inv_rt_24_12)),
    TransformDescriptor::new(M::Interleave24To12, Bgr, UShort, 12, 16, Kernel::Reorder(deinterlace::interleave_24_12)),
    TransformDescriptor::new(M::OneBitMsb7, Byte, Byte, 1, 8, Kernel::Reorder(deinterlace::one_bit_msb7)),
    TransformDescriptor::new(M::OneBitMsb0, Byte, Byte, 1, 8, Kernel::Reorder(deinterlace::one_bit_msb0)),
    TransformDescriptor::new(
        M::BgrToRgb,
        Bgr,
        Bgr,
        24,
        24,
        Kernel::ReorderInPlace(deinterlace::bgr_to_rgb, deinterlace::bgr_to_rgb_in_place),
    ),
    TransformDescriptor::new(M::LineTaps, Byte, Byte, 8, 8, Kernel::LineTaps),
    TransformDescriptor::new(M::AutoScale, UShort, Byte, 16, 8, Kernel::AutoScale),
];

/// Built-in transform table.
pub fn builtins() -> &'static [TransformDescriptor] {
    BUILTIN
}

/// Finds the built-in transform for a key.
pub fn lookup(
    method: Method,
    src: PixelKind,
    dst: PixelKind,
) -> Option<&'static TransformDescriptor> {
    BUILTIN.iter().find(|d| d.matches(method, src, dst))
}

/// Looks up the built-in transform for `params` and binds it.
///
/// # Errors
///
/// Returns [`Error::UnsupportedCombination`] when no built-in matches, or
/// the binding error of [`TransformDescriptor::instantiate`].
pub fn instantiate(method: Method, params: &PostProcParams) -> Result<TransformHandle> {
    Registry::default().instantiate(method, params)
}

/// Built-in transforms plus transforms registered by the application.
/// Registered entries take precedence.
#[derive(Clone, Default)]
pub struct Registry {
    external: Vec<TransformDescriptor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, descriptor: TransformDescriptor) {
        let (method, src, dst) = (descriptor.method, descriptor.src, descriptor.dst);
        self.external.retain(|d| !d.matches(method, src, dst));
        debug!(?method, ?src, ?dst, "transform registered");
        self.external.push(descriptor);
    }

    /// Registers an out-of-place transform under `(method, src, dst)`,
    /// replacing any earlier registration of the same key.
    pub fn register(
        &mut self,
        method: Method,
        src: PixelKind,
        dst: PixelKind,
        transform: Arc<dyn Transform>,
    ) {
        self.insert(TransformDescriptor::external(
            method,
            src,
            dst,
            Kernel::External(transform),
        ));
    }

    pub fn register_in_place(
        &mut self,
        method: Method,
        src: PixelKind,
        dst: PixelKind,
        transform: Arc<dyn InPlaceTransform>,
    ) {
        self.insert(TransformDescriptor::external(
            method,
            src,
            dst,
            Kernel::ExternalInPlace(transform),
        ));
    }

    /// Loads `name` through `loader` and registers it.
    pub fn load_module(
        &mut self,
        loader: &dyn ModuleLoader,
        name: &str,
        method: Method,
        src: PixelKind,
        dst: PixelKind,
    ) -> Result<()> {
        let transform = loader.load(name)?;
        self.register(method, src, dst, transform);
        Ok(())
    }

    pub fn lookup(
        &self,
        method: Method,
        src: PixelKind,
        dst: PixelKind,
    ) -> Option<&TransformDescriptor> {
        self.external
            .iter()
            .find(|d| d.matches(method, src, dst))
            .or_else(|| lookup(method, src, dst))
    }

    /// Binds the transform matching `method` and the depths in `params`.
    pub fn instantiate(&self, method: Method, params: &PostProcParams) -> Result<TransformHandle> {
        let (src, dst) = (params.src_kind(), params.dst_kind());
        self.lookup(method, src, dst)
            .ok_or(Error::UnsupportedCombination { method, src, dst })?
            .instantiate(params)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.external.iter()).finish()
    }
}

#[derive(Clone)]
enum Op {
    Reorder(ReorderFn),
    ReorderInPlace(ReorderFn, InPlaceFn),
    Fields {
        bytes_per_pixel: usize,
        interlace: usize,
        offset: usize,
    },
    Bayer(Arc<Demosaicer>),
    LineTaps(Arc<[InterleaveTap]>),
    AutoScale,
    External(Arc<dyn Transform>),
    ExternalInPlace(Arc<dyn InPlaceTransform>),
}

/// A transform bound to one session's geometry, reusable for every frame.
#[derive(Clone)]
pub struct TransformHandle {
    method: Method,
    src: PixelKind,
    dst: PixelKind,
    src_bits: u32,
    dst_bits: u32,
    width: u32,
    height: u32,
    src_depth: u32,
    dst_depth: u32,
    op: Op,
}

fn bytes_for(width: u32, height: u32, bits: u32) -> usize {
    (width as usize * height as usize * bits as usize).div_ceil(8)
}

impl TransformHandle {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn src(&self) -> PixelKind {
        self.src
    }

    pub fn dst(&self) -> PixelKind {
        self.dst
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Minimum source buffer length.
    pub fn input_len(&self) -> usize {
        bytes_for(self.width, self.height, self.src_bits)
    }

    /// Minimum destination buffer length.
    pub fn output_len(&self) -> usize {
        bytes_for(self.width, self.height, self.dst_bits)
    }

    /// True when `params` describe a different geometry or depth and the
    /// transform must be instantiated again.
    pub fn needs_rebind(&self, params: &PostProcParams) -> bool {
        self.width != params.width
            || self.height != params.effective_height()
            || self.src_depth != params.src_depth
            || self.dst_depth != params.dst_depth
    }

    fn check(&self, which: &'static str, len: usize, needed: usize) -> Result<()> {
        if len < needed {
            return Err(Error::GeometryMismatch {
                which,
                width: self.width,
                height: self.height,
                len,
                needed,
            });
        }
        Ok(())
    }

    /// Transforms `src` into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GeometryMismatch`] when either buffer is too small
    /// for the bound geometry, or the transform's own failure.
    pub fn apply(&self, src: &[u8], dst: &mut [u8]) -> Result<()> {
        self.check("source", src.len(), self.input_len())?;
        self.check("destination", dst.len(), self.output_len())?;
        let (w, h) = (self.width as usize, self.height as usize);
        match &self.op {
            Op::Reorder(f) | Op::ReorderInPlace(f, _) => {
                f(src, w, h, dst);
                Ok(())
            }
            Op::Fields {
                bytes_per_pixel,
                interlace,
                offset,
            } => deinterlace::merge_fields(src, w, h, dst, *bytes_per_pixel, *interlace, *offset),
            Op::Bayer(demosaicer) => demosaicer.apply(src, w, h, dst),
            Op::LineTaps(taps) => {
                deinterlace::line_taps_8x4(src, w, h, dst, taps);
                Ok(())
            }
            Op::AutoScale => deinterlace::auto_scale(src, w, h, dst),
            Op::External(t) => t.apply(src, self.width, self.height, dst),
            Op::ExternalInPlace(t) => t.apply(src, self.width, self.height, dst),
        }
    }

    /// Single-buffer view of the transform, `None` unless it is safe to run
    /// with source and destination aliased.
    pub fn in_place(&self) -> Option<InPlace<'_>> {
        match self.op {
            Op::ReorderInPlace(..) | Op::LineTaps(_) | Op::ExternalInPlace(_) => {
                Some(InPlace { handle: self })
            }
            _ => None,
        }
    }
}

impl fmt::Debug for TransformHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TransformHandle")
            .field("method", &self.method)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// In-place form of a [`TransformHandle`].
#[derive(Copy, Clone, Debug)]
pub struct InPlace<'a> {
    handle: &'a TransformHandle,
}

impl InPlace<'_> {
    /// Transforms `buf` in place.
    pub fn apply(&self, buf: &mut [u8]) -> Result<()> {
        let handle = self.handle;
        let needed = handle.input_len().max(handle.output_len());
        handle.check("in-place", buf.len(), needed)?;
        let (w, h) = (handle.width as usize, handle.height as usize);
        match &handle.op {
            Op::ReorderInPlace(_, g) => {
                g(buf, w, h);
                Ok(())
            }
            Op::LineTaps(taps) => {
                deinterlace::line_taps_8x4_in_place(buf, w, h, taps);
                Ok(())
            }
            Op::ExternalInPlace(t) => t.apply_in_place(buf, handle.width, handle.height),
            _ => Err(Error::TransformFailed(format!(
                "{:?} cannot run in place",
                handle.method
            ))),
        }
    }
}
