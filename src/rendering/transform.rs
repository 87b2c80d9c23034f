//! Applies the camera to a captured frame.
//!
//! The focus-zone center is moved to the frame center while scaling by the zoom level:
//! `translate(-focus_center) -> scale(zoom) -> translate(+extent_center)`, cropped back to
//! the source extent. Output lands in a buffer checked out from the [`BufferPool`].

use std::sync::Arc;

use thiserror::Error;

use super::buffer::{BufferFormat, PixelBuffer};
use super::context::{is_convertible, Affine2, RenderBackend, RenderContext, RenderError};
use super::pool::{BufferPool, PoolError, PooledBuffer};
use crate::algorithm::camera_engine::CameraFrame;
use crate::models::geometry::Point;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// No context means no further frames; ends the session.
    #[error("render context creation failed: {0}")]
    ContextCreationFailed(String),

    /// Skip this frame's transform and pass the raw frame through.
    #[error("no output buffer available")]
    BufferPoolExhausted,

    #[error("transform failed: {0}")]
    TransformFailed(String),
}

impl TransformError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransformError::ContextCreationFailed(_))
    }
}

/// Builds the camera transform for a `width` x `height` source.
///
/// The focus center is clamped so the visible window (`extent / zoom`) never leaves the
/// source frame; at zoom 1.0 this pins the center to the frame center.
pub fn focus_transform(view: &CameraFrame, width: u32, height: u32) -> Affine2 {
    let zoom = if view.zoom.is_finite() {
        view.zoom.max(1.0)
    } else {
        1.0
    };
    let extent_center = Point::new(width as f64 * 0.5, height as f64 * 0.5);
    let half_w = extent_center.x / zoom;
    let half_h = extent_center.y / zoom;

    let focus = view.zone.center();
    let focus = if focus.is_finite() {
        Point::new(
            focus.x.clamp(half_w, width as f64 - half_w),
            focus.y.clamp(half_h, height as f64 - half_h),
        )
    } else {
        extent_center
    };

    Affine2::translate(-focus.x, -focus.y)
        .then(Affine2::scale(zoom, zoom))
        .then(Affine2::translate(extent_center.x, extent_center.y))
}

pub struct FrameTransformer {
    backend: Arc<dyn RenderBackend>,
    context: Box<dyn RenderContext>,
    pool: BufferPool,
    format: BufferFormat,
}

impl FrameTransformer {
    /// Creates a render context for the pool's current format.
    pub fn new(backend: Arc<dyn RenderBackend>, pool: BufferPool) -> Result<Self, TransformError> {
        let format = pool.format().ok_or_else(|| {
            TransformError::TransformFailed("buffer pool is not configured".to_string())
        })?;
        let context = create_context(backend.as_ref(), format)?;
        log::info!(
            "frame transformer: context ready backend={} {}x{}",
            backend.name(),
            format.width,
            format.height
        );
        Ok(Self {
            backend,
            context,
            pool,
            format,
        })
    }

    pub fn format(&self) -> BufferFormat {
        self.format
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Must be called after the pool is reconfigured with a new format.
    pub fn rebind(&mut self) -> Result<(), TransformError> {
        let format = self.pool.format().ok_or_else(|| {
            TransformError::TransformFailed("buffer pool is not configured".to_string())
        })?;
        if format != self.format {
            self.context = create_context(self.backend.as_ref(), format)?;
            self.format = format;
        }
        Ok(())
    }

    /// Acquires exactly one buffer on success; the caller releases it after encoding.
    pub fn apply(
        &mut self,
        source: &dyn PixelBuffer,
        view: &CameraFrame,
    ) -> Result<PooledBuffer, TransformError> {
        if !source.is_well_formed() {
            return Err(TransformError::TransformFailed(
                "source frame is empty or truncated".to_string(),
            ));
        }
        let src_format = source.format();
        if src_format.width != self.format.width || src_format.height != self.format.height {
            return Err(TransformError::TransformFailed(format!(
                "source {}x{} does not match output {}x{}",
                src_format.width, src_format.height, self.format.width, self.format.height
            )));
        }
        if !is_convertible(src_format.pixel_format, self.format.pixel_format) {
            return Err(TransformError::TransformFailed(format!(
                "cannot convert {:?} to {:?}",
                src_format.pixel_format, self.format.pixel_format
            )));
        }

        let mut output = self.pool.acquire().map_err(|err| match err {
            PoolError::Exhausted { .. } => TransformError::BufferPoolExhausted,
            other => TransformError::TransformFailed(other.to_string()),
        })?;

        let transform = focus_transform(view, self.format.width, self.format.height);
        match self.context.render(source, &transform, &mut output) {
            Ok(()) => Ok(output),
            Err(RenderError::ContextLost(reason)) => {
                log::warn!("frame transformer: context lost ({reason}), recreating");
                self.context = create_context(self.backend.as_ref(), self.format)?;
                self.context
                    .render(source, &transform, &mut output)
                    .map_err(|err| match err {
                        RenderError::ContextLost(reason) => {
                            TransformError::ContextCreationFailed(reason)
                        }
                        RenderError::Failed(reason) => TransformError::TransformFailed(reason),
                    })?;
                Ok(output)
            }
            Err(RenderError::Failed(reason)) => Err(TransformError::TransformFailed(reason)),
        }
    }
}

fn create_context(
    backend: &dyn RenderBackend,
    format: BufferFormat,
) -> Result<Box<dyn RenderContext>, TransformError> {
    backend.create_context(format).map_err(|err| {
        log::error!("frame transformer: {} backend failed: {err}", backend.name());
        TransformError::ContextCreationFailed(err.to_string())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::models::geometry::Rect;
    use crate::models::settings::ExhaustionPolicy;
    use crate::rendering::buffer::{FrameBuffer, PixelFormat};
    use crate::rendering::context::CpuBackend;

    fn source_frame(width: u32, height: u32) -> FrameBuffer {
        let format = BufferFormat::new(width, height, PixelFormat::Bgra8);
        let mut pixels = Vec::with_capacity(format.byte_len());
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x * 7 % 256) as u8, (y * 5 % 256) as u8, 90, 255]);
            }
        }
        FrameBuffer::from_pixels(format, pixels).expect("frame pixels")
    }

    fn pool(width: u32, height: u32, policy: ExhaustionPolicy) -> BufferPool {
        let pool = BufferPool::with_policy(policy);
        pool.configure(width, height, PixelFormat::Bgra8, 3)
            .expect("configure pool");
        pool
    }

    fn view(zone: Rect, zoom: f64) -> CameraFrame {
        CameraFrame {
            zone,
            zoom,
            is_transitioning: false,
            progress: 1.0,
        }
    }

    #[test]
    fn unit_zoom_on_full_extent_is_pixel_identical() {
        let source = source_frame(32, 18);
        let mut transformer =
            FrameTransformer::new(Arc::new(CpuBackend), pool(32, 18, ExhaustionPolicy::FailFast))
                .expect("transformer");
        let output = transformer
            .apply(&source, &view(Rect::extent(32, 18), 1.0))
            .expect("transform");
        assert_eq!(output.data(), source.data());
    }

    #[test]
    fn focus_center_moves_to_frame_center() {
        let view = view(Rect::new(800.0, 400.0, 400.0, 400.0), 2.0);
        let t = focus_transform(&view, 1_920, 1_080);
        let mapped = t.apply(view.zone.center());
        assert!((mapped.x - 960.0).abs() < 1e-9);
        assert!((mapped.y - 540.0).abs() < 1e-9);
    }

    #[test]
    fn focus_near_edge_is_clamped_inside_source() {
        let view = view(Rect::new(0.0, 0.0, 100.0, 100.0), 2.0);
        let t = focus_transform(&view, 1_920, 1_080);
        // Top-left source corner must land on the top-left output corner, not inside it.
        let corner = t.apply(Point::new(0.0, 0.0));
        assert!(corner.x.abs() < 1e-9);
        assert!(corner.y.abs() < 1e-9);
    }

    #[test]
    fn zoomed_output_magnifies_focus_region() {
        let source = source_frame(16, 16);
        let mut transformer =
            FrameTransformer::new(Arc::new(CpuBackend), pool(16, 16, ExhaustionPolicy::FailFast))
                .expect("transformer");
        let output = transformer
            .apply(&source, &view(Rect::new(4.0, 4.0, 8.0, 8.0), 2.0))
            .expect("transform");
        // Output center samples the source center at 2x: neighbours differ by half a step.
        let a = output.buffer().pixel(8, 8).expect("pixel")[0] as i32;
        let b = output.buffer().pixel(9, 8).expect("pixel")[0] as i32;
        assert!((b - a - 4).abs() <= 1, "expected a half step of 7, got {}", b - a);
    }

    #[test]
    fn exhausted_pool_is_recoverable() {
        let source = source_frame(8, 8);
        let mut transformer =
            FrameTransformer::new(Arc::new(CpuBackend), pool(8, 8, ExhaustionPolicy::FailFast))
                .expect("transformer");
        let full = view(Rect::extent(8, 8), 1.0);
        let _held: Vec<PooledBuffer> = (0..3)
            .map(|_| transformer.apply(&source, &full).expect("transform"))
            .collect();
        let err = transformer
            .apply(&source, &full)
            .expect_err("pool should be exhausted");
        assert_eq!(err, TransformError::BufferPoolExhausted);
        assert!(!err.is_fatal());
    }

    #[test]
    fn mismatched_source_fails_without_leaking_a_buffer() {
        let source = source_frame(10, 8);
        let pool = pool(8, 8, ExhaustionPolicy::FailFast);
        let mut transformer =
            FrameTransformer::new(Arc::new(CpuBackend), pool.clone()).expect("transformer");
        let err = transformer
            .apply(&source, &view(Rect::extent(8, 8), 1.0))
            .expect_err("size mismatch");
        assert!(matches!(err, TransformError::TransformFailed(_)));
        assert_eq!(pool.stats().available, 3);
    }

    #[derive(Debug)]
    struct BrokenBackend;

    impl RenderBackend for BrokenBackend {
        fn name(&self) -> &str {
            "broken"
        }

        fn create_context(
            &self,
            _format: BufferFormat,
        ) -> Result<Box<dyn RenderContext>, RenderError> {
            Err(RenderError::Failed("no graphics device".to_string()))
        }
    }

    #[test]
    fn context_creation_failure_is_fatal() {
        let err = FrameTransformer::new(
            Arc::new(BrokenBackend),
            pool(8, 8, ExhaustionPolicy::FailFast),
        )
        .err()
        .expect("context creation should fail");
        assert!(err.is_fatal());
    }

    /// Loses its context on the first render of every context it creates.
    #[derive(Debug, Default)]
    struct FlakyBackend {
        created: Arc<AtomicUsize>,
    }

    struct FlakyContext {
        lose_next: bool,
    }

    impl RenderContext for FlakyContext {
        fn render(
            &mut self,
            source: &dyn PixelBuffer,
            _transform: &Affine2,
            target: &mut dyn PixelBuffer,
        ) -> Result<(), RenderError> {
            if self.lose_next {
                self.lose_next = false;
                return Err(RenderError::ContextLost("device reset".to_string()));
            }
            target.data_mut().copy_from_slice(source.data());
            Ok(())
        }
    }

    impl RenderBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }

        fn create_context(
            &self,
            _format: BufferFormat,
        ) -> Result<Box<dyn RenderContext>, RenderError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FlakyContext { lose_next: n == 0 }))
        }
    }

    #[test]
    fn lost_context_is_recreated_once() {
        let backend = FlakyBackend::default();
        let created = backend.created.clone();
        let source = source_frame(8, 8);
        let mut transformer =
            FrameTransformer::new(Arc::new(backend), pool(8, 8, ExhaustionPolicy::FailFast))
                .expect("transformer");
        let output = transformer
            .apply(&source, &view(Rect::extent(8, 8), 1.0))
            .expect("transform after recreate");
        assert_eq!(output.data(), source.data());
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }
}
