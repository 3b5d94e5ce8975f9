//! Image preprocessing shared by image-input models.

use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use infera_launcher::{InputTensor, NetworkInfo, TensorMap};
use ndarray::Array4;
use serde_json::json;
use tracing::debug;

use crate::error::{ModelError, ParameterError};
use crate::params::{Parameter, ParameterSchema, ResolvedParameters};
use crate::Result;

/// How an image is fitted to the model input size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeType {
    /// Stretch to the input size.
    Standard,
    /// Scale the shorter side to fit, then center crop.
    Crop,
    /// Scale the longer side to fit, then pad bottom/right with zeros.
    FitToWindow,
}

impl FromStr for ResizeType {
    type Err = ParameterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "standard" => Ok(ResizeType::Standard),
            "crop" => Ok(ResizeType::Crop),
            "fit_to_window" => Ok(ResizeType::FitToWindow),
            other => Err(ParameterError::InvalidParameter {
                name: "resize_type".to_string(),
                reason: format!("unknown resize type '{}'", other),
            }),
        }
    }
}

/// Axis order of the image input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    Nchw,
    Nhwc,
}

/// Sizes recorded while preprocessing one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMeta {
    /// Width and height of the original image.
    pub original_size: (u32, u32),
    /// Width and height after resizing, before cropping or padding.
    pub resized_size: (u32, u32),
}

/// Converts images into the tensor the model's image input expects.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    input_name: String,
    layout: ImageLayout,
    channels: usize,
    width: u32,
    height: u32,
    resize_type: ResizeType,
    mean_values: Vec<f32>,
    scale_values: Vec<f32>,
    reverse_input_channels: bool,
}

impl ImagePreprocessor {
    /// Parameters every image model accepts.
    pub fn parameters() -> ParameterSchema {
        ParameterSchema::new()
            .with(
                "resize_type",
                Parameter::string()
                    .with_default(json!("standard"))
                    .with_choices(&["standard", "crop", "fit_to_window"])
                    .with_description("Type of input image resizing"),
            )
            .with(
                "mean_values",
                Parameter::list().with_description("Per-channel values subtracted from each pixel"),
            )
            .with(
                "scale_values",
                Parameter::list().with_description("Per-channel divisors applied after mean subtraction"),
            )
            .with(
                "reverse_input_channels",
                Parameter::boolean()
                    .with_default(json!(false))
                    .with_description("Feed channels in BGR order"),
            )
    }

    /// Bind to the model's 4-D image input.
    pub fn new(info: &NetworkInfo, params: &ResolvedParameters) -> Result<Self> {
        let (input_name, meta) = info
            .inputs_info
            .iter()
            .find(|(_, meta)| meta.rank() == 4)
            .ok_or_else(|| ModelError::Topology("expected a 4D image input".to_string()))?;

        let layout = if meta.layout == "NHWC" {
            ImageLayout::Nhwc
        } else {
            ImageLayout::Nchw
        };
        let (batch, channels, height, width) = match layout {
            ImageLayout::Nchw => (meta.shape[0], meta.shape[1], meta.shape[2], meta.shape[3]),
            ImageLayout::Nhwc => (meta.shape[0], meta.shape[3], meta.shape[1], meta.shape[2]),
        };

        if batch > 1 {
            return Err(ModelError::UnsupportedTopology(format!(
                "image input '{}' has batch size {}, expected 1",
                input_name, batch
            ))
            .into());
        }
        if channels != 1 && channels != 3 {
            return Err(ModelError::UnsupportedTopology(format!(
                "image input '{}' has {} channels, expected 1 or 3",
                input_name, channels
            ))
            .into());
        }
        if height <= 0 || width <= 0 {
            return Err(ModelError::UnsupportedTopology(format!(
                "image input '{}' has dynamic spatial dimensions {:?}; reshape the model first",
                input_name, meta.shape
            ))
            .into());
        }
        let channels = channels as usize;

        let resize_type: ResizeType = params.get_str("resize_type").unwrap_or("standard").parse()?;
        let mean_values = channel_values(params, "mean_values", channels, 0.0)?;
        let scale_values = channel_values(params, "scale_values", channels, 1.0)?;
        if let Some(zero) = scale_values.iter().position(|&s| s == 0.0) {
            return Err(ParameterError::InvalidParameter {
                name: "scale_values".to_string(),
                reason: format!("channel {} has a zero scale", zero),
            }
            .into());
        }

        Ok(Self {
            input_name: input_name.clone(),
            layout,
            channels,
            width: width as u32,
            height: height as u32,
            resize_type,
            mean_values,
            scale_values,
            reverse_input_channels: params.get_bool("reverse_input_channels").unwrap_or(false),
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// Target (width, height).
    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Build the input tensor map for one image.
    pub fn preprocess(&self, image: &DynamicImage) -> Result<(TensorMap, ImageMeta)> {
        let original_size = image.dimensions();
        if original_size.0 == 0 || original_size.1 == 0 {
            return Err(ModelError::Preprocessing("image is empty".to_string()).into());
        }

        let (resized, resized_size) = self.resize(image);
        debug!(
            "Resized image {:?} -> {:?} for '{}'",
            original_size, resized_size, self.input_name
        );

        let (w, h) = (self.width as usize, self.height as usize);
        let mut tensor = match self.layout {
            ImageLayout::Nchw => Array4::<f32>::zeros((1, self.channels, h, w)),
            ImageLayout::Nhwc => Array4::<f32>::zeros((1, h, w, self.channels)),
        };

        let pixels: Vec<Vec<u8>> = match self.channels {
            1 => {
                let gray = resized.to_luma8();
                vec![gray.into_raw()]
            }
            _ => {
                let rgb = resized.to_rgb8();
                let raw = rgb.as_raw();
                (0..3)
                    .map(|c| {
                        let src = if self.reverse_input_channels { 2 - c } else { c };
                        raw.iter().skip(src).step_by(3).copied().collect()
                    })
                    .collect()
            }
        };
        let (rw, rh) = resized.dimensions();

        for y in 0..h {
            for x in 0..w {
                for c in 0..self.channels {
                    // Pixels outside the resized image are padding.
                    let value = if (x as u32) < rw && (y as u32) < rh {
                        pixels[c][y * rw as usize + x] as f32
                    } else {
                        0.0
                    };
                    let value = (value - self.mean_values[c]) / self.scale_values[c];
                    match self.layout {
                        ImageLayout::Nchw => tensor[[0, c, y, x]] = value,
                        ImageLayout::Nhwc => tensor[[0, y, x, c]] = value,
                    }
                }
            }
        }

        let inputs = TensorMap::from([(
            self.input_name.clone(),
            InputTensor::Float32(tensor.into_dyn()),
        )]);

        Ok((
            inputs,
            ImageMeta {
                original_size,
                resized_size,
            },
        ))
    }

    fn resize(&self, image: &DynamicImage) -> (DynamicImage, (u32, u32)) {
        let (w, h) = image.dimensions();
        let (tw, th) = (self.width, self.height);

        match self.resize_type {
            ResizeType::Standard => {
                let resized = image.resize_exact(tw, th, FilterType::Lanczos3);
                (resized, (tw, th))
            }
            ResizeType::Crop => {
                let scale = (tw as f32 / w as f32).max(th as f32 / h as f32);
                let nw = ((w as f32 * scale).round() as u32).max(tw);
                let nh = ((h as f32 * scale).round() as u32).max(th);
                let resized = image.resize_exact(nw, nh, FilterType::Lanczos3);
                let cropped = resized.crop_imm((nw - tw) / 2, (nh - th) / 2, tw, th);
                (cropped, (nw, nh))
            }
            ResizeType::FitToWindow => {
                let scale = (tw as f32 / w as f32).min(th as f32 / h as f32);
                let nw = ((w as f32 * scale).round() as u32).clamp(1, tw);
                let nh = ((h as f32 * scale).round() as u32).clamp(1, th);
                let resized = image.resize_exact(nw, nh, FilterType::Lanczos3);
                (resized, (nw, nh))
            }
        }
    }
}

fn channel_values(
    params: &ResolvedParameters,
    name: &str,
    channels: usize,
    fallback: f32,
) -> std::result::Result<Vec<f32>, ParameterError> {
    match params.get_f32_list(name)? {
        None => Ok(vec![fallback; channels]),
        Some(values) if values.len() == 1 => Ok(vec![values[0]; channels]),
        Some(values) if values.len() == channels => Ok(values),
        Some(values) => Err(ParameterError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected {} values, got {}", channels, values.len()),
        }),
    }
}
