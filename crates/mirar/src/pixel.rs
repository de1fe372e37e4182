//! Pixel-level screenshot comparison.
//!
//! Deterministic, pure-Rust image diffing: decode, normalize dimensions,
//! walk pixels with a normalized Euclidean RGB distance, and render a
//! side-by-side composite with differences highlighted in red. This engine
//! is the first stage of every comparison; AI analysis only ever runs on
//! top of its output.

use crate::result::{MirarError, MirarResult};
use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageEncoder, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Per-image payload ceiling in bytes (20 MB)
pub const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Default mismatch threshold as a percentage
pub const DEFAULT_DIFF_THRESHOLD: f64 = 5.0;

/// Distance between opposite corners of the unit RGB cube, sqrt(3)
const MAX_RGB_DISTANCE: f64 = 1.732_050_807_568_877_2;

/// Height of the label bands rendered above the composite panes
const HEADER_BAND_PX: u32 = 24;

/// Band color for the baseline pane (slate)
const BASELINE_BAND: Rgba<u8> = Rgba([71, 85, 105, 255]);

/// Band color for the current pane (amber)
const CURRENT_BAND: Rgba<u8> = Rgba([202, 138, 4, 255]);

/// Highlight color for differing pixels
const DIFF_HIGHLIGHT: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Rectangular region excluded from comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRegion {
    /// X coordinate of top-left corner
    pub x: u32,
    /// Y coordinate of top-left corner
    pub y: u32,
    /// Width of mask region
    pub width: u32,
    /// Height of mask region
    pub height: u32,
}

impl MaskRegion {
    /// Create a new mask region
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Check if a point is within this mask region
    #[must_use]
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }
}

/// Options for a single pixel comparison
#[derive(Debug, Clone)]
pub struct PixelCompareOptions {
    /// Threshold as a percentage. Applied twice: a pixel differs when its
    /// normalized color distance exceeds `threshold / 100`, and the whole
    /// comparison is a regression when the differing-pixel percentage
    /// exceeds `threshold`.
    pub threshold: f64,
    /// Regions excluded from comparison
    pub mask_regions: Vec<MaskRegion>,
}

impl Default for PixelCompareOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_DIFF_THRESHOLD,
            mask_regions: Vec::new(),
        }
    }
}

impl PixelCompareOptions {
    /// Create options with the default threshold and no masks
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the threshold percentage
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Add a mask region to exclude from comparison
    #[must_use]
    pub fn with_mask(mut self, mask: MaskRegion) -> Self {
        self.mask_regions.push(mask);
        self
    }
}

/// Result of comparing two screenshots pixel by pixel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelDiffResult {
    /// Percentage of compared pixels that differ (0.0-100.0)
    pub mismatch_percentage: f64,
    /// Number of pixels that differ
    pub diff_pixels: usize,
    /// Total number of pixels compared, masked pixels included
    pub total_pixels: usize,
    /// Whether the mismatch percentage exceeds the threshold
    pub is_different: bool,
    /// True when the inputs had different dimensions and both were resized
    /// to the larger common size before comparison
    pub dimensions_resized: bool,
    /// Side-by-side composite PNG, present when the comparison is a
    /// regression. Never serialized with the record; callers that need it
    /// on the wire encode it separately.
    #[serde(skip)]
    pub diff_image: Option<Vec<u8>>,
}

impl PixelDiffResult {
    /// Check if the screenshots are identical (no differing pixels)
    #[must_use]
    pub const fn is_identical(&self) -> bool {
        self.diff_pixels == 0
    }
}

/// Deterministic pixel comparison engine
#[derive(Debug, Clone)]
pub struct PixelDiffEngine {
    max_image_bytes: usize,
}

impl Default for PixelDiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelDiffEngine {
    /// Create an engine with the standard payload ceiling
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_image_bytes: MAX_IMAGE_BYTES,
        }
    }

    /// Override the per-image payload ceiling
    #[must_use]
    pub const fn with_max_image_bytes(mut self, bytes: usize) -> Self {
        self.max_image_bytes = bytes;
        self
    }

    /// Compare two encoded screenshots.
    ///
    /// Inputs with mismatched dimensions are both resized to the larger
    /// common dimension with Lanczos3 resampling before comparison, which
    /// means interpolated pixels are compared; `dimensions_resized` flags
    /// this so callers can surface it.
    ///
    /// # Errors
    ///
    /// [`MirarError::PayloadTooLarge`] when either input exceeds the
    /// ceiling, [`MirarError::Decode`] when either input cannot be decoded.
    pub fn compare(
        &self,
        baseline: &[u8],
        current: &[u8],
        options: &PixelCompareOptions,
    ) -> MirarResult<PixelDiffResult> {
        self.check_size(baseline)?;
        self.check_size(current)?;

        let baseline_img =
            image::load_from_memory(baseline).map_err(|e| MirarError::Decode {
                message: format!("Failed to decode baseline image: {e}"),
            })?;
        let current_img = image::load_from_memory(current).map_err(|e| MirarError::Decode {
            message: format!("Failed to decode current image: {e}"),
        })?;

        Ok(compare_decoded(&baseline_img, &current_img, options))
    }

    fn check_size(&self, bytes: &[u8]) -> MirarResult<()> {
        if bytes.len() > self.max_image_bytes {
            return Err(MirarError::PayloadTooLarge {
                bytes: bytes.len(),
                limit: self.max_image_bytes,
            });
        }
        Ok(())
    }
}

/// Compare two decoded images, resizing to a common size first if needed
fn compare_decoded(
    baseline: &DynamicImage,
    current: &DynamicImage,
    options: &PixelCompareOptions,
) -> PixelDiffResult {
    let (bw, bh) = baseline.dimensions();
    let (cw, ch) = current.dimensions();
    let dimensions_resized = (bw, bh) != (cw, ch);
    let width = bw.max(cw);
    let height = bh.max(ch);

    let baseline_rgba = if (bw, bh) == (width, height) {
        baseline.to_rgba8()
    } else {
        baseline
            .resize_exact(width, height, FilterType::Lanczos3)
            .to_rgba8()
    };
    let current_rgba = if (cw, ch) == (width, height) {
        current.to_rgba8()
    } else {
        current
            .resize_exact(width, height, FilterType::Lanczos3)
            .to_rgba8()
    };

    let pixel_cutoff = options.threshold / 100.0;
    let total_pixels = (width as usize) * (height as usize);
    let mut diff_pixels = 0usize;

    // Composite: label bands on top, baseline pane left, current pane right
    // with differing pixels highlighted.
    let mut composite = RgbaImage::new(width * 2, height + HEADER_BAND_PX);
    for y in 0..HEADER_BAND_PX {
        for x in 0..width {
            composite.put_pixel(x, y, BASELINE_BAND);
            composite.put_pixel(width + x, y, CURRENT_BAND);
        }
    }

    for y in 0..height {
        for x in 0..width {
            let baseline_pixel = *baseline_rgba.get_pixel(x, y);
            let current_pixel = *current_rgba.get_pixel(x, y);

            let masked = options.mask_regions.iter().any(|m| m.contains(x, y));
            let differs =
                !masked && normalized_distance(baseline_pixel, current_pixel) > pixel_cutoff;
            if differs {
                diff_pixels += 1;
            }

            composite.put_pixel(x, y + HEADER_BAND_PX, baseline_pixel);
            let shown = if differs { DIFF_HIGHLIGHT } else { current_pixel };
            composite.put_pixel(width + x, y + HEADER_BAND_PX, shown);
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let mismatch_percentage = if total_pixels > 0 {
        (diff_pixels as f64 / total_pixels as f64) * 100.0
    } else {
        0.0
    };
    let is_different = mismatch_percentage > options.threshold;

    let diff_image = if is_different {
        encode_png(composite.width(), composite.height(), composite.as_raw()).ok()
    } else {
        None
    };

    PixelDiffResult {
        mismatch_percentage,
        diff_pixels,
        total_pixels,
        is_different,
        dimensions_resized,
        diff_image,
    }
}

/// Euclidean distance between two pixels in RGB space, normalized to [0, 1].
/// Alpha is ignored; screenshots are opaque.
fn normalized_distance(a: Rgba<u8>, b: Rgba<u8>) -> f64 {
    let Rgba([r1, g1, b1, _]) = a;
    let Rgba([r2, g2, b2, _]) = b;

    let dr = (f64::from(r1) - f64::from(r2)) / 255.0;
    let dg = (f64::from(g1) - f64::from(g2)) / 255.0;
    let db = (f64::from(b1) - f64::from(b2)) / 255.0;

    (dr * dr + dg * dg + db * db).sqrt() / MAX_RGB_DISTANCE
}

/// Encode raw RGBA pixels as PNG
///
/// # Errors
///
/// Returns [`MirarError::Decode`] if encoding fails
pub fn encode_png(width: u32, height: u32, rgba: &[u8]) -> MirarResult<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buffer);
    encoder
        .write_image(rgba, width, height, image::ExtendedColorType::Rgba8)
        .map_err(|e| MirarError::Decode {
            message: format!("Failed to encode PNG: {e}"),
        })?;
    Ok(buffer)
}
