use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_ASPECT_RATIO: &str = "16:9";
pub const DEFAULT_IMAGE_SIZE: &str = "1344*768";
pub const DEFAULT_GUIDANCE_SCALE: f64 = 4.0;
pub const DEFAULT_OUTPUT_DIR: &str = "./images";
/// Backends treat a negative seed as "pick one at random".
pub const RANDOM_SEED: i64 = -1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Performance {
    #[serde(rename = "Extreme Speed")]
    ExtremeSpeed,
    #[default]
    Speed,
    Quality,
}

impl Performance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExtremeSpeed => "Extreme Speed",
            Self::Speed => "Speed",
            Self::Quality => "Quality",
        }
    }
}

impl fmt::Display for Performance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job paint settings. Every field is optional so configs can be layered; the
/// accessor methods supply the effective value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaintConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub styles: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(alias = "N_images", skip_serializing_if = "Option::is_none")]
    pub n_images: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<Performance>,
    #[serde(alias = "output_folder", skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

impl PaintConfig {
    /// Field-wise merge where any value set in `over` wins.
    pub fn merge(&self, over: &PaintConfig) -> PaintConfig {
        PaintConfig {
            aspect_ratio: over
                .aspect_ratio
                .clone()
                .or_else(|| self.aspect_ratio.clone()),
            image_size: over.image_size.clone().or_else(|| self.image_size.clone()),
            styles: over.styles.clone().or_else(|| self.styles.clone()),
            negative_prompt: over
                .negative_prompt
                .clone()
                .or_else(|| self.negative_prompt.clone()),
            guidance_scale: over.guidance_scale.or(self.guidance_scale),
            seed: over.seed.or(self.seed),
            n_images: over.n_images.or(self.n_images),
            performance: over.performance.or(self.performance),
            output_dir: over.output_dir.clone().or_else(|| self.output_dir.clone()),
        }
    }

    pub fn n_images(&self) -> u32 {
        self.n_images.unwrap_or(1).max(1)
    }

    pub fn seed(&self) -> i64 {
        self.seed.unwrap_or(RANDOM_SEED)
    }

    pub fn aspect_ratio(&self) -> &str {
        self.aspect_ratio.as_deref().unwrap_or(DEFAULT_ASPECT_RATIO)
    }

    pub fn image_size(&self) -> &str {
        self.image_size.as_deref().unwrap_or(DEFAULT_IMAGE_SIZE)
    }

    pub fn styles(&self) -> &[String] {
        self.styles.as_deref().unwrap_or_default()
    }

    pub fn negative_prompt(&self) -> &str {
        self.negative_prompt.as_deref().unwrap_or_default()
    }

    pub fn guidance_scale(&self) -> f64 {
        self.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE)
    }

    pub fn performance(&self) -> Performance {
        self.performance.unwrap_or_default()
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir
            .as_deref()
            .unwrap_or_else(|| Path::new(DEFAULT_OUTPUT_DIR))
    }
}
