use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::Deserialize;
use tracing::debug;

use crate::camera::RawCapture;
use crate::error::PreprocessingError;
use crate::telemetry::ImageMetadata;

/// Multiplier applied around mid-grey by [`enhance_contrast`].
pub const CONTRAST_FACTOR: f32 = 1.3;

const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// How an image is fitted into a target canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizePolicy {
    /// Keep the aspect ratio; the larger dimension fits the bound. Never upscales.
    #[default]
    UniformScale,
    /// Scale each axis independently to land on the exact canvas.
    ExactFit,
}

impl FromStr for ResizePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uniform" | "uniform_scale" => Ok(ResizePolicy::UniformScale),
            "exact" | "exact_fit" => Ok(ResizePolicy::ExactFit),
            other => Err(format!("unknown resize policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFormat {
    #[default]
    Jpeg,
    Png,
}

impl EncodeFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "image/jpeg",
            EncodeFormat::Png => "image/png",
        }
    }
}

impl FromStr for EncodeFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(EncodeFormat::Jpeg),
            "png" => Ok(EncodeFormat::Png),
            other => Err(format!("unknown encode format '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Size of the image before normalization, carried through for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMetrics {
    pub dims: Dimensions,
    pub byte_size: usize,
}

/// Canonical image handed to extraction backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub width: u32,
    pub height: u32,
    pub encoded_bytes: Vec<u8>,
    pub format: EncodeFormat,
    /// Quality the encoder actually used; `None` for PNG.
    pub quality: Option<u8>,
    pub original_dims: Dimensions,
    pub original_byte_size: usize,
}

impl NormalizedImage {
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    pub fn metadata(&self) -> ImageMetadata {
        ImageMetadata {
            width: self.width,
            height: self.height,
            byte_size: self.encoded_bytes.len(),
            original_width: self.original_dims.width,
            original_height: self.original_dims.height,
            original_byte_size: self.original_byte_size,
            format: self.mime_type(),
            quality: self.quality,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub target_width: u32,
    pub target_height: u32,
    pub policy: ResizePolicy,
    pub enhance_contrast: bool,
    pub format: EncodeFormat,
    pub quality: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            target_width: 1280,
            target_height: 1280,
            policy: ResizePolicy::UniformScale,
            enhance_contrast: true,
            format: EncodeFormat::Jpeg,
            quality: 80,
        }
    }
}

/// Decode a raw capture and run resize, contrast and encode over it.
pub fn normalize(
    raw: &RawCapture,
    options: &NormalizeOptions,
) -> Result<NormalizedImage, PreprocessingError> {
    let img = image::load_from_memory_with_format(&raw.bytes, raw.format.image_format())
        .map_err(|e| PreprocessingError::InvalidImageData(format!("Failed to decode image: {e}")))?;

    let (width, height) = img.dimensions();
    let source = SourceMetrics {
        dims: Dimensions { width, height },
        byte_size: raw.bytes.len(),
    };

    let img = resize(
        &img,
        options.target_width,
        options.target_height,
        options.policy,
    )?;
    let img = if options.enhance_contrast {
        enhance_contrast(&img)
    } else {
        img
    };

    let normalized = encode(&img, source, options.format, options.quality)?;
    debug!(
        capture_id = %raw.id,
        original = %format!("{width}x{height}"),
        output = %format!("{}x{}", normalized.width, normalized.height),
        bytes = normalized.encoded_bytes.len(),
        "Normalized capture"
    );
    Ok(normalized)
}

/// Resize an image into `target_width` x `target_height` according to `policy`.
pub fn resize(
    img: &DynamicImage,
    target_width: u32,
    target_height: u32,
    policy: ResizePolicy,
) -> Result<DynamicImage, PreprocessingError> {
    if target_width == 0 || target_height == 0 {
        return Err(PreprocessingError::ResizeFailed(format!(
            "Invalid target size {target_width}x{target_height}"
        )));
    }

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessingError::InvalidImageData(
            "Image has no pixels".to_string(),
        ));
    }

    let (new_width, new_height) = match policy {
        ResizePolicy::ExactFit => (target_width, target_height),
        ResizePolicy::UniformScale => {
            uniform_dimensions(width, height, target_width, target_height)
        }
    };

    if (new_width, new_height) == (width, height) {
        return Ok(img.clone());
    }

    Ok(img.resize_exact(new_width, new_height, RESIZE_FILTER))
}

/// Output size for [`ResizePolicy::UniformScale`].
pub fn uniform_dimensions(width: u32, height: u32, bound_w: u32, bound_h: u32) -> (u32, u32) {
    let scale = (bound_w as f64 / width as f64)
        .min(bound_h as f64 / height as f64)
        .min(1.0);

    let new_width = ((width as f64 * scale).round() as u32).clamp(1, bound_w);
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, bound_h);
    (new_width, new_height)
}

/// Push every channel away from mid-grey by [`CONTRAST_FACTOR`].
pub fn enhance_contrast(img: &DynamicImage) -> DynamicImage {
    let mut rgb = img.to_rgb8();
    for pixel in rgb.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            let stretched = (*channel as f32 - 128.0) * CONTRAST_FACTOR + 128.0;
            *channel = stretched.round().clamp(0.0, 255.0) as u8;
        }
    }
    DynamicImage::ImageRgb8(rgb)
}

/// Encode `img` at `quality` (1-100; ignored for PNG).
pub fn encode(
    img: &DynamicImage,
    source: SourceMetrics,
    format: EncodeFormat,
    quality: u8,
) -> Result<NormalizedImage, PreprocessingError> {
    let quality = quality.clamp(1, 100);
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let (width, height) = rgb.dimensions();

    let mut encoded = Vec::new();
    let quality = match format {
        EncodeFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut encoded, quality);
            rgb.write_with_encoder(encoder)
                .map_err(|e| PreprocessingError::EncodingFailed(format!("JPEG: {e}")))?;
            Some(quality)
        }
        EncodeFormat::Png => {
            let encoder = PngEncoder::new(&mut encoded);
            rgb.write_with_encoder(encoder)
                .map_err(|e| PreprocessingError::EncodingFailed(format!("PNG: {e}")))?;
            None
        }
    };

    if encoded.is_empty() {
        return Err(PreprocessingError::EncodingFailed(
            "Encoder produced no output".to_string(),
        ));
    }

    Ok(NormalizedImage {
        width,
        height,
        encoded_bytes: encoded,
        format,
        quality,
        original_dims: source.dims,
        original_byte_size: source.byte_size,
    })
}
