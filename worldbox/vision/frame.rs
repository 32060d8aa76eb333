use thiserror::Error;

/// Errors raised by the vision module.
#[derive(Debug, Error)]
pub enum VisionError {
    /// Frame buffer length does not match the declared dimensions.
    #[error("frame data length {actual} does not match {width}x{height} RGBA ({expected})")]
    BadDimensions {
        /// Declared width.
        width: u32,
        /// Declared height.
        height: u32,
        /// Expected byte length (`width * height * 4`).
        expected: usize,
        /// Actual byte length supplied.
        actual: usize,
    },
    /// Two frames with different dimensions cannot be compared.
    #[error("cannot compare {a_width}x{a_height} frame against {b_width}x{b_height} reference")]
    DimensionMismatch {
        /// Reference width.
        a_width: u32,
        /// Reference height.
        a_height: u32,
        /// Sample width.
        b_width: u32,
        /// Sample height.
        b_height: u32,
    },
}

/// A single captured video frame in RGBA8 layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wraps raw RGBA bytes, validating the length invariant.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, VisionError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(VisionError::BadDimensions {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Builds a frame of a uniform color, mostly useful in tests.
    #[must_use]
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Frame width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels.
    #[must_use]
    pub const fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw RGBA bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Overwrites one pixel, ignoring out-of-bounds coordinates.
    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 4;
        self.data[offset..offset + 4].copy_from_slice(&rgba);
    }
}
