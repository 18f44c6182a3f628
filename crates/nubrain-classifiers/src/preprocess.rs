//! Image preprocessing: decode, color conversion, resize, normalization and
//! batching into the tensor layout an artifact was trained on.

use candle_core::{Device, Tensor};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, RgbImage};
use nubrain_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Color mode the decoded image is converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Three-channel RGB
    #[default]
    Rgb,
    /// Single-channel 8-bit luma
    Grayscale,
}

impl ColorMode {
    /// Number of channels in this mode
    pub fn channels(&self) -> usize {
        match self {
            Self::Rgb => 3,
            Self::Grayscale => 1,
        }
    }
}

/// Resampling filter used by the forced resize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeFilter {
    Nearest,
    Triangle,
    /// Bicubic
    #[default]
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeFilter {
    fn filter_type(&self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// Pixel normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Normalization {
    /// Keep raw 0..255 intensities as floats
    Raw,

    /// Rescale to [0, 1] by dividing by 255
    #[default]
    Unit,

    /// Per-channel `(x * scale - mean[c]) / std[c]`
    MeanStd {
        #[serde(default = "default_scale")]
        scale: f32,
        mean: Vec<f32>,
        std: Vec<f32>,
    },
}

fn default_scale() -> f32 {
    1.0 / 255.0
}

/// Memory layout of the batched tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// `(1, H, W, C)`
    #[default]
    Nhwc,
    /// `(1, C, H, W)`
    Nchw,
    /// `(1, H * W * C)` in row-major HWC order
    Flat,
}

/// Preprocessing configuration (for YAML/config files)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessConfig {
    /// Color mode applied right after decoding
    #[serde(default)]
    pub color_mode: ColorMode,

    /// Target width in pixels
    #[serde(default = "default_size")]
    pub width: u32,

    /// Target height in pixels
    #[serde(default = "default_size")]
    pub height: u32,

    /// Resampling filter
    #[serde(default)]
    pub filter: ResizeFilter,

    /// Pixel normalization
    #[serde(default)]
    pub normalization: Normalization,

    /// Batched tensor layout
    #[serde(default)]
    pub layout: TensorLayout,
}

fn default_size() -> u32 {
    224
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self::color_224()
    }
}

impl PreprocessConfig {
    /// RGB, 224×224, [0, 1], NHWC: the input of the end-to-end CNN
    pub fn color_224() -> Self {
        Self {
            color_mode: ColorMode::Rgb,
            width: 224,
            height: 224,
            filter: ResizeFilter::default(),
            normalization: Normalization::Unit,
            layout: TensorLayout::Nhwc,
        }
    }

    /// Grayscale, 64×64, raw intensities, flattened: the input of the
    /// raw-pixel nearest-neighbor classifier
    pub fn grayscale_64() -> Self {
        Self {
            color_mode: ColorMode::Grayscale,
            width: 64,
            height: 64,
            filter: ResizeFilter::default(),
            normalization: Normalization::Raw,
            layout: TensorLayout::Flat,
        }
    }
}

/// Turns encoded image bytes into a batch-of-one tensor
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
    /// Per-channel multiplier
    alpha: Vec<f32>,
    /// Per-channel offset
    beta: Vec<f32>,
}

impl Preprocessor {
    /// Validate a configuration and precompute normalization coefficients
    pub fn new(config: PreprocessConfig) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(Error::config(format!(
                "Resize target must be non-zero, got {}x{}",
                config.width, config.height
            )));
        }

        let channels = config.color_mode.channels();
        let (alpha, beta) = match &config.normalization {
            Normalization::Raw => (vec![1.0; channels], vec![0.0; channels]),
            Normalization::Unit => (vec![1.0 / 255.0; channels], vec![0.0; channels]),
            Normalization::MeanStd { scale, mean, std } => {
                if *scale <= 0.0 {
                    return Err(Error::config("Normalization scale must be greater than 0"));
                }
                if mean.len() != channels || std.len() != channels {
                    return Err(Error::config(format!(
                        "Mean and std must have {} elements for {:?}, got {} and {}",
                        channels,
                        config.color_mode,
                        mean.len(),
                        std.len()
                    )));
                }
                if let Some(s) = std.iter().find(|s| **s <= 0.0) {
                    return Err(Error::config(format!(
                        "Standard deviation must be greater than 0, got {}",
                        s
                    )));
                }

                let alpha = std.iter().map(|s| scale / s).collect();
                let beta = mean.iter().zip(std).map(|(m, s)| -m / s).collect();
                (alpha, beta)
            }
        };

        Ok(Self {
            config,
            alpha,
            beta,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    /// Shape of one prepared sample, excluding the batch dimension
    pub fn output_shape(&self) -> Vec<usize> {
        let h = self.config.height as usize;
        let w = self.config.width as usize;
        let c = self.config.color_mode.channels();

        match self.config.layout {
            TensorLayout::Nhwc => vec![h, w, c],
            TensorLayout::Nchw => vec![c, h, w],
            TensorLayout::Flat => vec![h * w * c],
        }
    }

    /// Decode encoded bytes and convert to the configured color mode
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(Error::decode("empty image buffer"));
        }

        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::decode(format!("Failed to decode image: {}", e)))?;

        Ok(self.convert_color(&image))
    }

    /// Convert an already decoded image to the configured color mode
    pub fn convert_color(&self, image: &DynamicImage) -> DynamicImage {
        match self.config.color_mode {
            ColorMode::Rgb => DynamicImage::ImageRgb8(image.to_rgb8()),
            ColorMode::Grayscale => DynamicImage::ImageLuma8(to_luma_601(&image.to_rgb8())),
        }
    }

    /// Force-resize to the target resolution, ignoring aspect ratio
    pub fn resize(&self, image: &DynamicImage) -> DynamicImage {
        let (width, height) = (self.config.width, self.config.height);
        if image.dimensions() == (width, height) {
            return image.clone();
        }

        image.resize_exact(width, height, self.config.filter.filter_type())
    }

    /// Normalize pixel values into a row-major HWC buffer
    pub fn normalize(&self, image: &DynamicImage) -> Vec<f32> {
        let channels = self.config.color_mode.channels();
        let raw: Vec<u8> = match self.config.color_mode {
            ColorMode::Rgb => image.to_rgb8().into_raw(),
            ColorMode::Grayscale => image.to_luma8().into_raw(),
        };

        raw.iter()
            .enumerate()
            .map(|(i, &v)| {
                let c = i % channels;
                v as f32 * self.alpha[c] + self.beta[c]
            })
            .collect()
    }

    /// Arrange a normalized HWC buffer into the configured batched layout
    pub fn to_tensor(&self, hwc: Vec<f32>, device: &Device) -> Result<Tensor> {
        let h = self.config.height as usize;
        let w = self.config.width as usize;
        let c = self.config.color_mode.channels();

        if hwc.len() != h * w * c {
            return Err(Error::shape("preprocess", &[h * w * c], &[hwc.len()]));
        }

        let tensor = match self.config.layout {
            TensorLayout::Nhwc => Tensor::from_vec(hwc, (1, h, w, c), device),
            TensorLayout::Flat => Tensor::from_vec(hwc, (1, h * w * c), device),
            TensorLayout::Nchw => {
                let mut chw = vec![0.0f32; hwc.len()];
                for (i, v) in hwc.into_iter().enumerate() {
                    let pixel = i / c;
                    let channel = i % c;
                    chw[channel * h * w + pixel] = v;
                }
                Tensor::from_vec(chw, (1, c, h, w), device)
            }
        };

        tensor.map_err(|e| Error::inference(format!("Failed to build input tensor: {}", e)))
    }

    /// Run the full transform on an already decoded image
    pub fn prepare_image(&self, image: &DynamicImage, device: &Device) -> Result<Tensor> {
        let converted = self.convert_color(image);
        let resized = self.resize(&converted);
        self.to_tensor(self.normalize(&resized), device)
    }

    /// Run the full transform on encoded bytes
    pub fn prepare(&self, bytes: &[u8], device: &Device) -> Result<Tensor> {
        let image = self.decode(bytes)?;
        let resized = self.resize(&image);
        self.to_tensor(self.normalize(&resized), device)
    }
}

/// ITU-R 601-2 luma, the grayscale transform the reference artifacts were
/// fitted on. Fixed-point weights sum to 65536, so gray inputs map to
/// themselves exactly.
fn to_luma_601(rgb: &RgbImage) -> GrayImage {
    let (width, height) = rgb.dimensions();
    let data = rgb
        .pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            let l = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
            l as u8
        })
        .collect();

    GrayImage::from_raw(width, height, data).unwrap_or_else(|| GrayImage::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Luma, Rgb};
    use std::io::Cursor;

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn solid_rgb(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_black_image_normalizes_to_zero() {
        let bytes = encode(&solid_rgb(300, 300, [0, 0, 0]), ImageFormat::Png);
        let pre = Preprocessor::new(PreprocessConfig::color_224()).unwrap();

        let tensor = pre.prepare(&bytes, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 224, 224, 3]);

        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values.len(), 224 * 224 * 3);
        assert!(values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_white_image_unit_range() {
        let bytes = encode(&solid_rgb(50, 80, [255, 255, 255]), ImageFormat::Png);
        let pre = Preprocessor::new(PreprocessConfig::color_224()).unwrap();

        let values = pre
            .prepare(&bytes, &Device::Cpu)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(values.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_grayscale_raw_flat() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([200])));
        let bytes = encode(&gray, ImageFormat::Png);
        let pre = Preprocessor::new(PreprocessConfig::grayscale_64()).unwrap();

        let tensor = pre.prepare(&bytes, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 64 * 64]);
        assert_eq!(pre.output_shape(), vec![4096]);

        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|&v| v == 200.0));
    }

    #[test]
    fn test_luma_601_weights() {
        let pre = Preprocessor::new(PreprocessConfig::grayscale_64()).unwrap();
        let red = pre.convert_color(&solid_rgb(1, 1, [255, 0, 0]));
        let green = pre.convert_color(&solid_rgb(1, 1, [0, 255, 0]));
        let gray = pre.convert_color(&solid_rgb(1, 1, [77, 77, 77]));

        assert_eq!(red.to_luma8().get_pixel(0, 0).0[0], 76);
        assert_eq!(green.to_luma8().get_pixel(0, 0).0[0], 150);
        assert_eq!(gray.to_luma8().get_pixel(0, 0).0[0], 77);
    }

    #[test]
    fn test_color_mode_is_not_auto_detected() {
        // A grayscale upload still becomes three channels in RGB mode
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([10])));
        let bytes = encode(&gray, ImageFormat::Png);
        let pre = Preprocessor::new(PreprocessConfig::color_224()).unwrap();

        let tensor = pre.prepare(&bytes, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 224, 224, 3]);
    }

    #[test]
    fn test_nchw_layout_separates_channels() {
        let config = PreprocessConfig {
            width: 2,
            height: 2,
            normalization: Normalization::Raw,
            layout: TensorLayout::Nchw,
            ..PreprocessConfig::color_224()
        };
        let pre = Preprocessor::new(config).unwrap();
        let image = solid_rgb(2, 2, [1, 2, 3]);

        let tensor = pre.prepare_image(&image, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[1, 3, 2, 2]);

        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(
            values,
            vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0, 3.0, 3.0, 3.0, 3.0]
        );
    }

    #[test]
    fn test_mean_std_normalization() {
        let config = PreprocessConfig {
            width: 1,
            height: 1,
            normalization: Normalization::MeanStd {
                scale: 1.0 / 255.0,
                mean: vec![0.5, 0.5, 0.5],
                std: vec![0.5, 0.5, 0.5],
            },
            ..PreprocessConfig::color_224()
        };
        let pre = Preprocessor::new(config).unwrap();
        let values = pre.normalize(&solid_rgb(1, 1, [0, 255, 0]));

        assert!((values[0] + 1.0).abs() < 1e-6);
        assert!((values[1] - 1.0).abs() < 1e-6);
        assert!((values[2] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_configs() {
        let zero = PreprocessConfig {
            width: 0,
            ..PreprocessConfig::color_224()
        };
        assert!(Preprocessor::new(zero).is_err());

        let wrong_channels = PreprocessConfig {
            normalization: Normalization::MeanStd {
                scale: 1.0,
                mean: vec![0.5],
                std: vec![0.5],
            },
            ..PreprocessConfig::color_224()
        };
        assert!(Preprocessor::new(wrong_channels).is_err());

        let zero_std = PreprocessConfig {
            normalization: Normalization::MeanStd {
                scale: 1.0,
                mean: vec![0.0; 3],
                std: vec![1.0, 0.0, 1.0],
            },
            ..PreprocessConfig::color_224()
        };
        assert!(Preprocessor::new(zero_std).is_err());
    }

    #[test]
    fn test_decode_errors() {
        let pre = Preprocessor::new(PreprocessConfig::color_224()).unwrap();

        assert!(matches!(pre.decode(&[]), Err(Error::Decode(_))));
        assert!(matches!(
            pre.decode(b"definitely not an image"),
            Err(Error::Decode(_))
        ));

        // Valid PNG signature followed by garbage
        let mut truncated = encode(&solid_rgb(8, 8, [9, 9, 9]), ImageFormat::Png);
        truncated.truncate(20);
        assert!(matches!(pre.decode(&truncated), Err(Error::Decode(_))));
    }

    #[test]
    fn test_resize_is_idempotent_at_target() {
        let pre = Preprocessor::new(PreprocessConfig::color_224()).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::from_fn(300, 200, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        }));

        let once = pre.resize(&image);
        let twice = pre.resize(&once);
        assert_eq!(once.dimensions(), (224, 224));
        assert_eq!(once.to_rgb8().into_raw(), twice.to_rgb8().into_raw());
    }

    #[test]
    fn test_config_yaml() {
        let yaml = r#"
color_mode: grayscale
width: 64
height: 64
filter: lanczos3
normalization:
  type: raw
layout: flat
"#;
        let config: PreprocessConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config,
            PreprocessConfig {
                filter: ResizeFilter::Lanczos3,
                ..PreprocessConfig::grayscale_64()
            }
        );

        let defaults: PreprocessConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(defaults, PreprocessConfig::color_224());

        let mean_std: PreprocessConfig = serde_yaml::from_str(
            "normalization: {type: mean-std, \
             mean: [0.485, 0.456, 0.406], std: [0.229, 0.224, 0.225]}",
        )
        .unwrap();
        match mean_std.normalization {
            Normalization::MeanStd { scale, .. } => assert!((scale - 1.0 / 255.0).abs() < 1e-9),
            other => panic!("Expected mean-std, got {other:?}"),
        }
    }
}
