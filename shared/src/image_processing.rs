use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder as _, ImageReader, Limits};
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use crate::config::EncoderConfig;
use crate::model::ImageRef;

#[derive(Debug, Error)]
pub enum ImageProcessingError {
    #[error("failed to decode image: {source}")]
    Decode {
        #[from]
        source: image::ImageError,
    },

    #[error("jpeg encoding failed: width={width}, height={height}, quality={quality}, reason={reason}")]
    Encode {
        width: u32,
        height: u32,
        quality: u8,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("image too large: {width}x{height} exceeds max dimension {max_dimension}")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_dimension: u32,
    },

    #[error("input too large: {size} bytes, max {max_size}")]
    InputTooLarge { size: usize, max_size: usize },

    #[error("input bytes empty")]
    EmptyInput,

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("encoding worker failed")]
    WorkerFailed,

    #[error("service overloaded, try again later")]
    Overloaded,
}

/// Maximum output box. Images already inside it are never upscaled.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub max_width: u32,
    pub max_height: u32,
}

impl Bounds {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self {
            max_width: max_width.max(1),
            max_height: max_height.max(1),
        }
    }
}

/// The codec the encoder drives. Output size is expected, not guaranteed, to
/// shrink as quality drops.
pub trait ImageCodec: Send + Sync + 'static {
    type Image: Send;

    fn decode(&self, raw: &[u8], config: &EncoderConfig) -> Result<Self::Image, ImageProcessingError>;

    fn dimensions(&self, image: &Self::Image) -> (u32, u32);

    fn resize(&self, image: &Self::Image, width: u32, height: u32) -> Self::Image;

    fn encode(&self, image: &Self::Image, quality: u8) -> Result<Vec<u8>, ImageProcessingError>;
}

/// Production codec: any format `image` can read in, baseline JPEG out.
#[derive(Clone, Copy, Debug, Default)]
pub struct JpegCodec;

impl ImageCodec for JpegCodec {
    type Image = DynamicImage;

    fn decode(&self, raw: &[u8], config: &EncoderConfig) -> Result<DynamicImage, ImageProcessingError> {
        decode_image(config, raw)
    }

    fn dimensions(&self, image: &DynamicImage) -> (u32, u32) {
        image.dimensions()
    }

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        image.resize_exact(width, height, FilterType::Triangle)
    }

    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageProcessingError> {
        encode_jpeg(image, quality)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Bytes,
    width: u32,
    height: u32,
    original_width: u32,
    original_height: u32,
    quality: u8,
    attempts: u32,
    within_budget: bool,
}

impl EncodedImage {
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn original_dimensions(&self) -> (u32, u32) {
        (self.original_width, self.original_height)
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// False when even the floor quality could not meet the byte budget.
    pub fn within_budget(&self) -> bool {
        self.within_budget
    }

    /// Hex blake3 digest of the encoded bytes.
    pub fn digest(&self) -> String {
        hex::encode(blake3::hash(&self.bytes).as_bytes())
    }

    pub fn to_image_ref(&self) -> ImageRef {
        ImageRef::Pending {
            bytes: self.bytes.to_vec(),
        }
    }
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncodedImage")
            .field("len", &self.bytes.len())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("quality", &self.quality)
            .field("attempts", &self.attempts)
            .field("within_budget", &self.within_budget)
            .finish()
    }
}

#[derive(Clone, Copy, Debug)]
struct EncodePlan {
    bounds: Option<Bounds>,
    max_bytes: usize,
    initial_quality: u8,
}

pub struct ImageEncoder<C: ImageCodec = JpegCodec> {
    config: EncoderConfig,
    codec: Arc<C>,
    semaphore: Arc<Semaphore>,
}

impl ImageEncoder<JpegCodec> {
    pub fn new(config: EncoderConfig) -> Self {
        Self::with_codec(config, JpegCodec)
    }

    pub fn with_defaults() -> Self {
        Self::new(EncoderConfig::default())
    }
}

impl<C: ImageCodec> ImageEncoder<C> {
    pub fn with_codec(config: EncoderConfig, codec: C) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_ops.max(1)));
        Self {
            config,
            codec: Arc::new(codec),
            semaphore,
        }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Resize into the configured box and compress under the configured budget.
    pub async fn encode_for_upload(&self, raw_bytes: Vec<u8>) -> Result<EncodedImage, ImageProcessingError> {
        let bounds = Bounds::new(self.config.max_width, self.config.max_height);
        self.encode(raw_bytes, bounds, self.config.max_bytes).await
    }

    #[instrument(skip(self, raw_bytes), fields(input_size = raw_bytes.len()))]
    pub async fn encode(
        &self,
        raw_bytes: Vec<u8>,
        bounds: Bounds,
        max_bytes: usize,
    ) -> Result<EncodedImage, ImageProcessingError> {
        let plan = EncodePlan {
            bounds: Some(bounds),
            max_bytes,
            initial_quality: self.config.initial_quality,
        };
        self.run("encode", raw_bytes, plan).await
    }

    /// Compression-only path: keeps native dimensions.
    #[instrument(skip(self, raw_bytes), fields(input_size = raw_bytes.len()))]
    pub async fn compress(
        &self,
        raw_bytes: Vec<u8>,
        max_bytes: usize,
    ) -> Result<EncodedImage, ImageProcessingError> {
        let plan = EncodePlan {
            bounds: None,
            max_bytes,
            initial_quality: self.config.compress_quality,
        };
        self.run("compress", raw_bytes, plan).await
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn encode_file(&self, path: impl AsRef<Path>) -> Result<EncodedImage, ImageProcessingError> {
        let path = path.as_ref();
        let raw_bytes = tokio::fs::read(path)
            .await
            .map_err(|source| ImageProcessingError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        self.encode_for_upload(raw_bytes).await
    }

    async fn run(
        &self,
        op: &'static str,
        raw_bytes: Vec<u8>,
        plan: EncodePlan,
    ) -> Result<EncodedImage, ImageProcessingError> {
        let start = Instant::now();
        counter!("image.encode.requests", "op" => op).increment(1);

        let _permit = self.semaphore.try_acquire().map_err(|_| {
            counter!("image.encode.rejected", "op" => op).increment(1);
            ImageProcessingError::Overloaded
        })?;

        let config = self.config.clone();
        let codec = Arc::clone(&self.codec);
        let result = tokio::task::spawn_blocking(move || {
            encode_within_budget(codec.as_ref(), &config, &raw_bytes, plan)
        })
        .await
        .map_err(|_| ImageProcessingError::WorkerFailed)?;

        histogram!("image.encode.duration_ms", "op" => op).record(start.elapsed().as_millis() as f64);

        match &result {
            Ok(encoded) => {
                histogram!("image.encode.output_size", "op" => op).record(encoded.len() as f64);
                counter!("image.encode.attempts", "op" => op).increment(u64::from(encoded.attempts));
                if !encoded.within_budget {
                    counter!("image.encode.budget_missed", "op" => op).increment(1);
                    warn!(
                        len = encoded.len(),
                        max_bytes = plan.max_bytes,
                        quality = encoded.quality,
                        "byte budget not met at floor quality, returning smallest result"
                    );
                }
            }
            Err(e) => {
                counter!("image.encode.errors", "op" => op).increment(1);
                warn!(error = %e, "{op} failed");
            }
        }

        result
    }
}

/// Largest size inside `bounds` keeping the aspect ratio; never larger than the input.
pub fn fit_within(width: u32, height: u32, bounds: Bounds) -> (u32, u32) {
    // A zero-sized box is treated as 1x1.
    let bounds = Bounds::new(bounds.max_width, bounds.max_height);
    if width <= bounds.max_width && height <= bounds.max_height {
        return (width, height);
    }
    let scale = f64::min(
        f64::from(bounds.max_width) / f64::from(width),
        f64::from(bounds.max_height) / f64::from(height),
    );
    let scaled = |dim: u32, max: u32| -> u32 {
        let value = (f64::from(dim) * scale).floor() as u32;
        value.clamp(1, max.min(dim))
    };
    (scaled(width, bounds.max_width), scaled(height, bounds.max_height))
}

/// Qualities tried in order. The last entry is always `floor`, so the ladder
/// length is the iteration cap.
pub fn quality_ladder(initial: u8, step: u8, floor: u8) -> Vec<u8> {
    let initial = initial.min(100);
    let floor = floor.min(initial);
    let step = step.max(1);

    let span = initial - floor;
    let cap = usize::from(span.div_ceil(step)) + 1;

    let mut ladder = Vec::with_capacity(cap);
    let mut quality = initial;
    while ladder.len() < cap {
        ladder.push(quality);
        if quality == floor {
            break;
        }
        quality = quality.saturating_sub(step).max(floor);
    }
    ladder
}

fn encode_within_budget<C: ImageCodec>(
    codec: &C,
    config: &EncoderConfig,
    raw_bytes: &[u8],
    plan: EncodePlan,
) -> Result<EncodedImage, ImageProcessingError> {
    if raw_bytes.is_empty() {
        return Err(ImageProcessingError::EmptyInput);
    }
    if raw_bytes.len() > config.max_input_bytes {
        return Err(ImageProcessingError::InputTooLarge {
            size: raw_bytes.len(),
            max_size: config.max_input_bytes,
        });
    }

    let decoded = codec.decode(raw_bytes, config)?;
    let (original_width, original_height) = codec.dimensions(&decoded);

    let image = match plan.bounds {
        Some(bounds) => {
            let (width, height) = fit_within(original_width, original_height, bounds);
            if (width, height) == (original_width, original_height) {
                decoded
            } else {
                debug!(original_width, original_height, width, height, "resizing");
                codec.resize(&decoded, width, height)
            }
        }
        None => decoded,
    };
    let (width, height) = codec.dimensions(&image);

    let mut smallest: Option<(Vec<u8>, u8)> = None;
    let mut attempts = 0u32;

    for quality in quality_ladder(plan.initial_quality, config.quality_step, config.floor_quality) {
        attempts += 1;
        let encoded = codec.encode(&image, quality)?;
        debug!(quality, len = encoded.len(), "encode attempt");

        if encoded.len() <= plan.max_bytes {
            return Ok(EncodedImage {
                bytes: Bytes::from(encoded),
                width,
                height,
                original_width,
                original_height,
                quality,
                attempts,
                within_budget: true,
            });
        }

        let is_smaller = smallest
            .as_ref()
            .map_or(true, |(best, _)| encoded.len() <= best.len());
        if is_smaller {
            smallest = Some((encoded, quality));
        }
    }

    let (bytes, quality) = smallest.ok_or(ImageProcessingError::Encode {
        width,
        height,
        quality: config.floor_quality,
        reason: "no quality level attempted".into(),
    })?;

    Ok(EncodedImage {
        bytes: Bytes::from(bytes),
        width,
        height,
        original_width,
        original_height,
        quality,
        attempts,
        within_budget: false,
    })
}

fn decode_image(config: &EncoderConfig, raw_bytes: &[u8]) -> Result<DynamicImage, ImageProcessingError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(config.max_dimension);
    limits.max_image_height = Some(config.max_dimension);
    limits.max_alloc = Some(config.max_alloc_bytes);

    let mut reader = ImageReader::new(Cursor::new(raw_bytes))
        .with_guessed_format()
        .map_err(|e| ImageProcessingError::Decode { source: e.into() })?;

    if reader.format().is_none() {
        return Err(ImageProcessingError::UnsupportedFormat);
    }

    reader.limits(limits);

    let img = reader.decode()?;
    let (w, h) = img.dimensions();
    if w > config.max_dimension || h > config.max_dimension {
        return Err(ImageProcessingError::ImageTooLarge {
            width: w,
            height: h,
            max_dimension: config.max_dimension,
        });
    }

    Ok(img)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ImageProcessingError> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let quality = quality.clamp(1, 100);

    if width == 0 || height == 0 {
        return Err(ImageProcessingError::Encode {
            width,
            height,
            quality,
            reason: "zero dimension".into(),
        });
    }

    let mut buffer = Vec::with_capacity((width * height) as usize / 4);
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);

    encoder
        .write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| ImageProcessingError::Encode {
            width,
            height,
            quality,
            reason: e.to_string(),
        })?;

    if buffer.len() < 4 || buffer[0..2] != [0xFF, 0xD8] {
        return Err(ImageProcessingError::Encode {
            width,
            height,
            quality,
            reason: "invalid jpeg magic bytes".into(),
        });
    }

    Ok(buffer)
}
