use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use atelier_contracts::configs::PaintConfig;
use atelier_contracts::ideas::DEFAULT_CATEGORY;
use atelier_contracts::ledger::LedgerLayout;
use atelier_engine::artists::{
    DEFAULT_FOOOCUS_CHECKPOINT, DEFAULT_FOOOCUS_PATH, DEFAULT_FOOOCUS_URL,
    DEFAULT_GEMINI_IMAGE_MODEL,
};
use atelier_engine::brains::{
    DEFAULT_GEMINI_TEXT_MODEL, DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_TEMPERATURE,
    DEFAULT_OLLAMA_URL,
};
use atelier_engine::{ArtistKind, ArtistSettings, BrainKind, BrainSettings, UnknownKind};
use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "atelier.toml";

/// Where batch templates come from and how they reach the brain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Complete brain instructions, one file per niche.
    Meta,
    /// Wildcard templates wrapped in a named instruction.
    #[default]
    Wildcard,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Wildcard => "wildcard",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = UnknownKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "meta" => Ok(Self::Meta),
            "wildcard" => Ok(Self::Wildcard),
            _ => Err(UnknownKind {
                kind: "pipeline",
                value: raw.to_string(),
                expected: "meta, wildcard",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WildcardMode {
    #[default]
    Random,
    Ordered,
}

impl WildcardMode {
    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::Ordered)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeminiSection {
    pub model: String,
    pub image_model: String,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
}

impl Default for GeminiSection {
    fn default() -> Self {
        Self {
            model: DEFAULT_GEMINI_TEXT_MODEL.to_string(),
            image_model: DEFAULT_GEMINI_IMAGE_MODEL.to_string(),
            api_base: None,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OllamaSection {
    pub url: String,
    pub model: String,
    pub temperature: f64,
}

impl Default for OllamaSection {
    fn default() -> Self {
        Self {
            url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_OLLAMA_MODEL.to_string(),
            temperature: DEFAULT_OLLAMA_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FooocusSection {
    pub url: String,
    pub checkpoint: String,
    pub path: PathBuf,
}

impl Default for FooocusSection {
    fn default() -> Self {
        Self {
            url: DEFAULT_FOOOCUS_URL.to_string(),
            checkpoint: DEFAULT_FOOOCUS_CHECKPOINT.to_string(),
            path: PathBuf::from(DEFAULT_FOOOCUS_PATH),
        }
    }
}

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub active_brain: BrainKind,
    pub active_artist: ArtistKind,
    pub active_pipeline: PipelineKind,
    pub wildcard_mode: WildcardMode,
    pub images_per_niche: u32,
    pub instruction: String,
    pub metadata_image_extension: String,
    pub default_category: u32,
    pub ledger_with_prompt: bool,

    pub csv_path: PathBuf,
    pub meta_prompts_path: PathBuf,
    pub wildcards_path: PathBuf,
    pub wildcard_prompts_path: PathBuf,
    pub niche_configs_path: PathBuf,
    pub instruction_path: PathBuf,
    pub log_path: PathBuf,

    pub gemini: GeminiSection,
    pub ollama: OllamaSection,
    pub fooocus: FooocusSection,
    pub paint: PaintConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            active_brain: BrainKind::default(),
            active_artist: ArtistKind::default(),
            active_pipeline: PipelineKind::default(),
            wildcard_mode: WildcardMode::default(),
            images_per_niche: 3,
            instruction: "default".to_string(),
            metadata_image_extension: "jpg".to_string(),
            default_category: DEFAULT_CATEGORY,
            ledger_with_prompt: false,
            csv_path: PathBuf::from("./metadata.csv"),
            meta_prompts_path: PathBuf::from("./prompts/meta_prompts"),
            wildcards_path: PathBuf::from("./prompts/wildcards"),
            wildcard_prompts_path: PathBuf::from("./prompts/wildcard_prompts"),
            niche_configs_path: PathBuf::from("./prompts/niche_configs"),
            instruction_path: PathBuf::from("./prompts/instructions"),
            log_path: PathBuf::from("./log"),
            gemini: GeminiSection::default(),
            ollama: OllamaSection::default(),
            fooocus: FooocusSection::default(),
            paint: PaintConfig::default(),
        }
    }
}

impl Settings {
    /// Reads settings from `path`, or from `atelier.toml` when present. An explicitly
    /// requested file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                if !path.is_file() {
                    bail!("settings file not found: {}", path.display());
                }
                Self::from_file(path)?
            }
            None => {
                let default_path = Path::new(DEFAULT_SETTINGS_FILE);
                if default_path.is_file() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw)?;
        if settings.images_per_niche == 0 {
            bail!("images_per_niche must be at least 1");
        }
        Ok(settings)
    }

    /// Applies environment overrides; `lookup` returns the raw variable value.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(key) = get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")) {
            self.gemini.api_key = Some(key);
        }
        if let Some(base) = get("GEMINI_API_BASE") {
            self.gemini.api_base = Some(base);
        }
        if let Some(url) = get("OLLAMA_URL") {
            self.ollama.url = url;
        }
        if let Some(url) = get("FOOOCUS_URL") {
            self.fooocus.url = url;
        }
        if let Some(path) = get("FOOOCUS_API_PATH") {
            self.fooocus.path = PathBuf::from(path);
        }
        if let Some(path) = get("ATELIER_CSV_PATH") {
            self.csv_path = PathBuf::from(path);
        }
    }

    pub fn brain_settings(&self) -> BrainSettings {
        BrainSettings {
            ollama_url: self.ollama.url.clone(),
            ollama_model: self.ollama.model.clone(),
            ollama_temperature: self.ollama.temperature,
            gemini_api_base: self.gemini.api_base.clone(),
            gemini_api_key: self.gemini.api_key.clone(),
            gemini_model: self.gemini.model.clone(),
            default_category: self.default_category,
        }
    }

    pub fn artist_settings(&self) -> ArtistSettings {
        ArtistSettings {
            fooocus_url: self.fooocus.url.clone(),
            fooocus_checkpoint: self.fooocus.checkpoint.clone(),
            fooocus_path: self.fooocus.path.clone(),
            gemini_api_base: self.gemini.api_base.clone(),
            gemini_api_key: self.gemini.api_key.clone(),
            gemini_image_model: self.gemini.image_model.clone(),
        }
    }

    pub fn ledger_layout(&self) -> LedgerLayout {
        if self.ledger_with_prompt {
            LedgerLayout::WithPrompt
        } else {
            LedgerLayout::Adobe
        }
    }

    pub fn templates_path(&self) -> &Path {
        match self.active_pipeline {
            PipelineKind::Meta => &self.meta_prompts_path,
            PipelineKind::Wildcard => &self.wildcard_prompts_path,
        }
    }
}
