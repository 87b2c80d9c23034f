//! Rendering contexts that draw a source frame through an affine transform.
//!
//! A [`RenderBackend`] creates contexts; GPU backends plug in here. The crate ships a CPU
//! backend that resamples bilinearly and converts between the two 8-bit RGBA orderings.

use std::fmt;

use thiserror::Error;

use super::buffer::{BufferFormat, PixelBuffer, PixelFormat};
use crate::models::geometry::Point;

/// 2x3 affine matrix mapping `(x, y)` to `(a*x + c*y + tx, b*x + d*y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine2 {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Affine2 {
    pub const IDENTITY: Affine2 = Affine2 {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translate(dx: f64, dy: f64) -> Self {
        Affine2 {
            tx: dx,
            ty: dy,
            ..Self::IDENTITY
        }
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Affine2 {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    /// `self` first, then `next`.
    pub fn then(self, next: Affine2) -> Affine2 {
        Affine2 {
            a: next.a * self.a + next.c * self.b,
            b: next.b * self.a + next.d * self.b,
            c: next.a * self.c + next.c * self.d,
            d: next.b * self.c + next.d * self.d,
            tx: next.a * self.tx + next.c * self.ty + next.tx,
            ty: next.b * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn apply(&self, p: Point) -> Point {
        Point {
            x: self.a * p.x + self.c * p.y + self.tx,
            y: self.b * p.x + self.d * p.y + self.ty,
        }
    }

    pub fn inverse(&self) -> Option<Affine2> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let a = self.d * inv_det;
        let b = -self.b * inv_det;
        let c = -self.c * inv_det;
        let d = self.a * inv_det;
        Some(Affine2 {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + c * self.ty),
            ty: -(b * self.tx + d * self.ty),
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// No rotation or shear.
    pub fn is_axis_aligned(&self) -> bool {
        self.b == 0.0 && self.c == 0.0
    }

    pub fn is_finite(&self) -> bool {
        [self.a, self.b, self.c, self.d, self.tx, self.ty]
            .iter()
            .all(|v| v.is_finite())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The underlying device went away; a new context may succeed.
    #[error("render context lost: {0}")]
    ContextLost(String),

    #[error("render failed: {0}")]
    Failed(String),
}

pub trait RenderContext: Send {
    /// Renders `source` mapped through `transform` into `target`, cropped to the target
    /// extent.
    fn render(
        &mut self,
        source: &dyn PixelBuffer,
        transform: &Affine2,
        target: &mut dyn PixelBuffer,
    ) -> Result<(), RenderError>;
}

pub trait RenderBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn create_context(&self, format: BufferFormat) -> Result<Box<dyn RenderContext>, RenderError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuBackend;

impl RenderBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn create_context(&self, format: BufferFormat) -> Result<Box<dyn RenderContext>, RenderError> {
        if format.is_empty() {
            return Err(RenderError::Failed(format!(
                "cannot render into {}x{}",
                format.width, format.height
            )));
        }
        Ok(Box::new(CpuRenderContext::default()))
    }
}

/// Column or row lookup for separable bilinear sampling.
#[derive(Debug, Clone, Copy)]
struct Tap {
    lo: usize,
    hi: usize,
    frac: f32,
}

#[derive(Default)]
pub struct CpuRenderContext {
    x_taps: Vec<Tap>,
    y_taps: Vec<Tap>,
}

impl CpuRenderContext {
    fn build_taps(taps: &mut Vec<Tap>, out_len: u32, src_len: u32, scale: f64, offset: f64) {
        taps.clear();
        let max_index = src_len.saturating_sub(1) as f64;
        for out in 0..out_len {
            // Pixel centers sit at +0.5.
            let src = scale * (out as f64 + 0.5) + offset - 0.5;
            let clamped = src.clamp(0.0, max_index);
            let lo = clamped.floor();
            let frac = (clamped - lo) as f32;
            let lo = lo as usize;
            let hi = (lo + 1).min(src_len.saturating_sub(1) as usize);
            taps.push(Tap { lo, hi, frac });
        }
    }
}

impl RenderContext for CpuRenderContext {
    fn render(
        &mut self,
        source: &dyn PixelBuffer,
        transform: &Affine2,
        target: &mut dyn PixelBuffer,
    ) -> Result<(), RenderError> {
        if !source.is_well_formed() {
            return Err(RenderError::Failed("source buffer is empty or truncated".to_string()));
        }
        if !target.is_well_formed() {
            return Err(RenderError::Failed("target buffer is empty or truncated".to_string()));
        }
        if !transform.is_finite() {
            return Err(RenderError::Failed("transform is not finite".to_string()));
        }

        let src_format = source.format();
        let dst_format = target.format();
        let swap_rb = src_format.pixel_format != dst_format.pixel_format;
        let src_stride = source.stride();
        let dst_stride = target.stride();
        let row_bytes = dst_format.stride();

        if transform.is_identity()
            && src_format.width == dst_format.width
            && src_format.height == dst_format.height
        {
            let src = source.data();
            let dst = target.data_mut();
            for row in 0..dst_format.height as usize {
                let s = &src[row * src_stride..row * src_stride + row_bytes];
                let d = &mut dst[row * dst_stride..row * dst_stride + row_bytes];
                d.copy_from_slice(s);
                if swap_rb {
                    swap_red_blue(d);
                }
            }
            return Ok(());
        }

        let inverse = transform
            .inverse()
            .ok_or_else(|| RenderError::Failed("transform is not invertible".to_string()))?;

        if !inverse.is_axis_aligned() {
            return render_general(source, &inverse, target, swap_rb);
        }

        Self::build_taps(
            &mut self.x_taps,
            dst_format.width,
            src_format.width,
            inverse.a,
            inverse.tx,
        );
        Self::build_taps(
            &mut self.y_taps,
            dst_format.height,
            src_format.height,
            inverse.d,
            inverse.ty,
        );

        let src = source.data();
        let dst = target.data_mut();
        for (out_y, ty) in self.y_taps.iter().enumerate() {
            let row0 = &src[ty.lo * src_stride..];
            let row1 = &src[ty.hi * src_stride..];
            let out_row = &mut dst[out_y * dst_stride..out_y * dst_stride + row_bytes];
            for (out_x, tx) in self.x_taps.iter().enumerate() {
                let px = blend(
                    &row0[tx.lo * 4..tx.lo * 4 + 4],
                    &row0[tx.hi * 4..tx.hi * 4 + 4],
                    &row1[tx.lo * 4..tx.lo * 4 + 4],
                    &row1[tx.hi * 4..tx.hi * 4 + 4],
                    tx.frac,
                    ty.frac,
                );
                write_pixel(&mut out_row[out_x * 4..out_x * 4 + 4], px, swap_rb);
            }
        }

        Ok(())
    }
}

fn render_general(
    source: &dyn PixelBuffer,
    inverse: &Affine2,
    target: &mut dyn PixelBuffer,
    swap_rb: bool,
) -> Result<(), RenderError> {
    let src_format = source.format();
    let dst_format = target.format();
    let src_stride = source.stride();
    let dst_stride = target.stride();
    let max_x = src_format.width.saturating_sub(1) as f64;
    let max_y = src_format.height.saturating_sub(1) as f64;
    let src = source.data();
    let dst = target.data_mut();

    for out_y in 0..dst_format.height as usize {
        for out_x in 0..dst_format.width as usize {
            let s = inverse.apply(Point::new(out_x as f64 + 0.5, out_y as f64 + 0.5));
            let sx = (s.x - 0.5).clamp(0.0, max_x);
            let sy = (s.y - 0.5).clamp(0.0, max_y);
            let x0 = sx.floor() as usize;
            let y0 = sy.floor() as usize;
            let x1 = (x0 + 1).min(max_x as usize);
            let y1 = (y0 + 1).min(max_y as usize);
            let px = blend(
                &src[y0 * src_stride + x0 * 4..y0 * src_stride + x0 * 4 + 4],
                &src[y0 * src_stride + x1 * 4..y0 * src_stride + x1 * 4 + 4],
                &src[y1 * src_stride + x0 * 4..y1 * src_stride + x0 * 4 + 4],
                &src[y1 * src_stride + x1 * 4..y1 * src_stride + x1 * 4 + 4],
                (sx - x0 as f64) as f32,
                (sy - y0 as f64) as f32,
            );
            let idx = out_y * dst_stride + out_x * 4;
            write_pixel(&mut dst[idx..idx + 4], px, swap_rb);
        }
    }
    Ok(())
}

fn blend(p00: &[u8], p10: &[u8], p01: &[u8], p11: &[u8], fx: f32, fy: f32) -> [u8; 4] {
    let mut out = [0u8; 4];
    for ch in 0..4 {
        let top = p00[ch] as f32 * (1.0 - fx) + p10[ch] as f32 * fx;
        let bottom = p01[ch] as f32 * (1.0 - fx) + p11[ch] as f32 * fx;
        out[ch] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

fn write_pixel(dst: &mut [u8], px: [u8; 4], swap_rb: bool) {
    if swap_rb {
        dst.copy_from_slice(&[px[2], px[1], px[0], px[3]]);
    } else {
        dst.copy_from_slice(&px);
    }
}

fn swap_red_blue(row: &mut [u8]) {
    for px in row.chunks_exact_mut(4) {
        px.swap(0, 2);
    }
}

/// True when the two formats can be converted by the CPU context.
pub fn is_convertible(from: PixelFormat, to: PixelFormat) -> bool {
    from.bytes_per_pixel() == 4 && to.bytes_per_pixel() == 4
}
