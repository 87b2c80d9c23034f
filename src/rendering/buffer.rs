//! Pixel buffer abstraction.
//!
//! Platform capture/encode buffers (GPU surfaces, mapped textures) implement
//! [`PixelBuffer`]; the pipeline itself only needs dimensions, format and raw bytes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Bgra8,
    Rgba8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
        }
    }
}

/// Dimensions and format fixed for the lifetime of a pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl BufferFormat {
    pub const fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    /// Tightly packed row length.
    pub fn stride(&self) -> usize {
        self.width as usize * self.pixel_format.bytes_per_pixel()
    }

    pub fn byte_len(&self) -> usize {
        self.stride().saturating_mul(self.height as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

pub trait PixelBuffer: Send {
    fn format(&self) -> BufferFormat;

    /// Bytes per row; may exceed `width * bpp` for padded platform buffers.
    fn stride(&self) -> usize {
        self.format().stride()
    }

    fn data(&self) -> &[u8];

    fn data_mut(&mut self) -> &mut [u8];

    fn width(&self) -> u32 {
        self.format().width
    }

    fn height(&self) -> u32 {
        self.format().height
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format().pixel_format
    }

    /// Checks that the backing memory covers every row.
    fn is_well_formed(&self) -> bool {
        let format = self.format();
        if format.is_empty() {
            return false;
        }
        let stride = self.stride();
        stride >= format.stride()
            && self.data().len()
                >= stride.saturating_mul(format.height as usize - 1) + format.stride()
    }
}

/// Heap-backed, tightly packed buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    format: BufferFormat,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    /// Zero-filled buffer.
    pub fn new(format: BufferFormat) -> Self {
        Self {
            format,
            pixels: vec![0u8; format.byte_len()],
        }
    }

    /// Wraps existing bytes; `None` when the length does not match the format.
    pub fn from_pixels(format: BufferFormat, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != format.byte_len() {
            return None;
        }
        Some(Self { format, pixels })
    }

    /// Zero-sized placeholder; owns no allocation.
    pub fn empty() -> Self {
        Self {
            format: BufferFormat::new(0, 0, PixelFormat::default()),
            pixels: Vec::new(),
        }
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.format.width || y >= self.format.height {
            return None;
        }
        let idx = y as usize * self.format.stride() + x as usize * 4;
        let px = self.pixels.get(idx..idx + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl PixelBuffer for FrameBuffer {
    fn format(&self) -> BufferFormat {
        self.format
    }

    fn data(&self) -> &[u8] {
        &self.pixels
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}
