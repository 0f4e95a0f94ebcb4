use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use atelier_contracts::configs::PaintConfig;
use atelier_contracts::errors::CollaboratorFailure;
use atelier_contracts::filenames::{output_stems, with_extension};
use image::{Rgb, RgbImage};
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::UnknownKind;
use crate::gemini::{extension_for_mime, extract_image_items, GeminiClient};
use crate::transport::{response_json_or_error, to_failure, trim_base_url};

pub const DEFAULT_FOOOCUS_URL: &str = "http://127.0.0.1:8888";
pub const DEFAULT_FOOOCUS_CHECKPOINT: &str = "juggernautXL_v8Rundiffusion.safetensors";
pub const DEFAULT_FOOOCUS_PATH: &str = "./Fooocus";
pub const DEFAULT_GEMINI_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

const FOOOCUS_OFFSET_LORA: &str = "sd_xl_offset_example-lora_1.0.safetensors";
const FOOOCUS_TIMEOUT_SECONDS: f64 = 900.0;

/// Image-generation collaborator.
///
/// On success the returned paths are exactly the files written for this call, one per
/// requested image, named after `name_stem` by the shared filename policy.
pub trait Artist: Send + Sync {
    fn name(&self) -> &str;
    fn paint(
        &self,
        prompt: &str,
        name_stem: &str,
        config: &PaintConfig,
    ) -> Result<Vec<PathBuf>, CollaboratorFailure>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtistKind {
    #[default]
    Banana,
    Fooocus,
    Dryrun,
}

impl ArtistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Banana => "banana",
            Self::Fooocus => "fooocus",
            Self::Dryrun => "dryrun",
        }
    }
}

impl fmt::Display for ArtistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtistKind {
    type Err = UnknownKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "banana" => Ok(Self::Banana),
            "fooocus" => Ok(Self::Fooocus),
            "dryrun" => Ok(Self::Dryrun),
            _ => Err(UnknownKind {
                kind: "artist",
                value: raw.to_string(),
                expected: "banana, fooocus, dryrun",
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtistSettings {
    pub fooocus_url: String,
    pub fooocus_checkpoint: String,
    /// Fooocus installation directory; its `outputs/files` tree holds rendered images.
    pub fooocus_path: PathBuf,
    pub gemini_api_base: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_image_model: String,
}

impl Default for ArtistSettings {
    fn default() -> Self {
        Self {
            fooocus_url: DEFAULT_FOOOCUS_URL.to_string(),
            fooocus_checkpoint: DEFAULT_FOOOCUS_CHECKPOINT.to_string(),
            fooocus_path: PathBuf::from(DEFAULT_FOOOCUS_PATH),
            gemini_api_base: None,
            gemini_api_key: None,
            gemini_image_model: DEFAULT_GEMINI_IMAGE_MODEL.to_string(),
        }
    }
}

pub struct FooocusArtist {
    url: String,
    checkpoint: String,
    root: PathBuf,
    http: HttpClient,
}

impl FooocusArtist {
    pub fn new(settings: &ArtistSettings) -> Self {
        Self {
            url: trim_base_url(&settings.fooocus_url),
            checkpoint: settings.fooocus_checkpoint.clone(),
            root: settings.fooocus_path.clone(),
            http: HttpClient::new(),
        }
    }

    fn render(&self, prompt: &str, name_stem: &str, config: &PaintConfig) -> Result<Vec<PathBuf>> {
        let endpoint = format!("{}/v1/generation/text-to-image", self.url);
        let payload = fooocus_payload(prompt, config, &self.checkpoint);
        debug!(endpoint = %endpoint, payload = %payload, "fooocus request");
        let response = self
            .http
            .post(&endpoint)
            .timeout(Duration::from_secs_f64(FOOOCUS_TIMEOUT_SECONDS))
            .json(&payload)
            .send()
            .with_context(|| format!("Fooocus request failed ({endpoint})"))?;
        let body = response_json_or_error("Fooocus", response)?;
        let urls = fooocus_result_urls(&body)?;

        let requested = config.n_images();
        ensure_count(urls.len(), requested)?;

        let output_dir = config.output_dir();
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;

        let mut written = Vec::new();
        for (stem, url) in output_stems(name_stem, requested).iter().zip(&urls) {
            let source = fooocus_output_path(&self.root, url)
                .ok_or_else(|| anyhow!("Fooocus returned an unrecognised file url: {url}"))?;
            let ext = source
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("png");
            let target = output_dir.join(with_extension(stem, ext));
            move_file(&source, &target)?;
            info!(from = %source.display(), to = %target.display(), "image stored");
            written.push(target);
        }
        Ok(written)
    }
}

impl Artist for FooocusArtist {
    fn name(&self) -> &str {
        "fooocus"
    }

    fn paint(
        &self,
        prompt: &str,
        name_stem: &str,
        config: &PaintConfig,
    ) -> Result<Vec<PathBuf>, CollaboratorFailure> {
        self.render(prompt, name_stem, config).map_err(to_failure)
    }
}

fn fooocus_payload(prompt: &str, config: &PaintConfig, checkpoint: &str) -> Value {
    json!({
        "prompt": prompt,
        "negative_prompt": config.negative_prompt(),
        "style_selections": config.styles(),
        "performance_selection": config.performance().as_str(),
        "aspect_ratios_selection": config.image_size(),
        "image_number": config.n_images(),
        "image_seed": config.seed(),
        "sharpness": 2,
        "guidance_scale": config.guidance_scale(),
        "base_model_name": checkpoint,
        "refiner_model_name": "None",
        "refiner_switch": 0.5,
        "loras": [{
            "enabled": true,
            "model_name": FOOOCUS_OFFSET_LORA,
            "weight": 0.1,
        }],
        "advanced_params": {"disable_preview": true},
        "require_base64": false,
        "async_process": false,
    })
}

fn fooocus_result_urls(body: &Value) -> Result<Vec<String>> {
    let Some(items) = body.as_array() else {
        bail!("Fooocus response is not a list of results");
    };
    Ok(items
        .iter()
        .filter_map(|item| item.get("url").and_then(Value::as_str))
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect())
}

/// Maps a Fooocus result url onto `{root}/outputs/files/{date}/{name}`.
fn fooocus_output_path(root: &Path, url: &str) -> Option<PathBuf> {
    let path = url.split(['?', '#']).next()?;
    let mut segments = path.trim_end_matches('/').rsplit('/');
    let name = segments.next().filter(|segment| !segment.is_empty())?;
    let date = segments
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))?;
    Some(root.join("outputs").join("files").join(date).join(name))
}

fn move_file(source: &Path, target: &Path) -> Result<()> {
    if fs::rename(source, target).is_ok() {
        return Ok(());
    }
    fs::copy(source, target).with_context(|| {
        format!(
            "failed to move {} to {}",
            source.display(),
            target.display()
        )
    })?;
    fs::remove_file(source)
        .with_context(|| format!("failed to remove {}", source.display()))?;
    Ok(())
}

/// Gemini image model ("nano banana").
pub struct BananaArtist {
    client: GeminiClient,
    model: String,
}

impl BananaArtist {
    pub fn new(settings: &ArtistSettings) -> Self {
        Self {
            client: GeminiClient::new(
                settings.gemini_api_base.as_deref(),
                settings.gemini_api_key.clone(),
            ),
            model: settings.gemini_image_model.clone(),
        }
    }

    fn render(&self, prompt: &str, name_stem: &str, config: &PaintConfig) -> Result<Vec<PathBuf>> {
        let requested = config.n_images();
        let output_dir = config.output_dir();
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;

        let payload = banana_payload(prompt, config);
        let mut written = Vec::new();
        for stem in output_stems(name_stem, requested) {
            let body = self.client.generate_content(&self.model, &payload)?;
            let Some(image) = extract_image_items(&body)?.into_iter().next() else {
                bail!(
                    "Gemini returned no image for {stem} ({} of {requested} written)",
                    written.len()
                );
            };
            let target = output_dir.join(with_extension(
                &stem,
                extension_for_mime(image.mime_type.as_deref()),
            ));
            fs::write(&target, &image.bytes)
                .with_context(|| format!("failed to write {}", target.display()))?;
            info!(path = %target.display(), "image stored");
            written.push(target);
        }
        Ok(written)
    }
}

impl Artist for BananaArtist {
    fn name(&self) -> &str {
        "banana"
    }

    fn paint(
        &self,
        prompt: &str,
        name_stem: &str,
        config: &PaintConfig,
    ) -> Result<Vec<PathBuf>, CollaboratorFailure> {
        self.render(prompt, name_stem, config).map_err(to_failure)
    }
}

fn banana_payload(prompt: &str, config: &PaintConfig) -> Value {
    let mut text = prompt.trim().to_string();
    let negative = config.negative_prompt().trim();
    if !negative.is_empty() {
        text.push_str(&format!("\n\nAvoid: {negative}"));
    }
    json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": text}],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
            "imageConfig": {"aspectRatio": config.aspect_ratio()},
        },
    })
}

/// Offline artist: writes solid-colour PNGs sized from the paint config.
pub struct DryrunArtist;

impl DryrunArtist {
    fn render(&self, prompt: &str, name_stem: &str, config: &PaintConfig) -> Result<Vec<PathBuf>> {
        let (width, height) = parse_dims(config.image_size());
        let output_dir = config.output_dir();
        fs::create_dir_all(output_dir)
            .with_context(|| format!("failed to create {}", output_dir.display()))?;

        let mut written = Vec::new();
        for (idx, stem) in output_stems(name_stem, config.n_images()).iter().enumerate() {
            let target = output_dir.join(with_extension(stem, "png"));
            let (r, g, b) = color_from_prompt(prompt, config.seed(), idx as u64);
            let mut image = RgbImage::new(width, height);
            for pixel in image.pixels_mut() {
                *pixel = Rgb([r, g, b]);
            }
            image
                .save(&target)
                .with_context(|| format!("failed to save {}", target.display()))?;
            written.push(target);
        }
        Ok(written)
    }
}

impl Artist for DryrunArtist {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn paint(
        &self,
        prompt: &str,
        name_stem: &str,
        config: &PaintConfig,
    ) -> Result<Vec<PathBuf>, CollaboratorFailure> {
        self.render(prompt, name_stem, config).map_err(to_failure)
    }
}

/// Accepts `1344*768` (Fooocus style) and `1344x768`.
fn parse_dims(size: &str) -> (u32, u32) {
    let raw = size.trim().to_ascii_lowercase();
    if let Some((w, h)) = raw.split_once(['*', 'x']) {
        let width = w.trim().parse::<u32>().unwrap_or(1024);
        let height = h.trim().parse::<u32>().unwrap_or(1024);
        return (width.max(1), height.max(1));
    }
    (1024, 1024)
}

fn color_from_prompt(prompt: &str, seed: i64, idx: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    hasher.update(idx.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn ensure_count(produced: usize, requested: u32) -> Result<()> {
    if produced < requested as usize {
        bail!("only {produced} of {requested} requested images were produced");
    }
    Ok(())
}

/// Closed set of artist implementations, chosen once at startup.
pub enum ArtistBackend {
    Fooocus(FooocusArtist),
    Banana(BananaArtist),
    Dryrun(DryrunArtist),
}

impl Artist for ArtistBackend {
    fn name(&self) -> &str {
        match self {
            Self::Fooocus(artist) => artist.name(),
            Self::Banana(artist) => artist.name(),
            Self::Dryrun(artist) => artist.name(),
        }
    }

    fn paint(
        &self,
        prompt: &str,
        name_stem: &str,
        config: &PaintConfig,
    ) -> Result<Vec<PathBuf>, CollaboratorFailure> {
        match self {
            Self::Fooocus(artist) => artist.paint(prompt, name_stem, config),
            Self::Banana(artist) => artist.paint(prompt, name_stem, config),
            Self::Dryrun(artist) => artist.paint(prompt, name_stem, config),
        }
    }
}

pub fn build_artist(kind: ArtistKind, settings: &ArtistSettings) -> ArtistBackend {
    match kind {
        ArtistKind::Fooocus => ArtistBackend::Fooocus(FooocusArtist::new(settings)),
        ArtistKind::Banana => ArtistBackend::Banana(BananaArtist::new(settings)),
        ArtistKind::Dryrun => ArtistBackend::Dryrun(DryrunArtist),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use atelier_contracts::configs::{PaintConfig, Performance};
    use serde_json::json;

    use super::{
        banana_payload, build_artist, fooocus_output_path, fooocus_payload, fooocus_result_urls,
        move_file, parse_dims, Artist, ArtistKind, ArtistSettings,
    };

    #[test]
    fn artist_kind_rejects_unknown_names() {
        assert_eq!("FOOOCUS".parse::<ArtistKind>(), Ok(ArtistKind::Fooocus));
        assert!("midjourney".parse::<ArtistKind>().is_err());
    }

    #[test]
    fn fooocus_payload_carries_paint_config() {
        let config = PaintConfig {
            image_size: Some("1024*1024".to_string()),
            styles: Some(vec!["Fooocus V2".to_string()]),
            negative_prompt: Some("blurry".to_string()),
            n_images: Some(2),
            seed: Some(42),
            performance: Some(Performance::Quality),
            ..PaintConfig::default()
        };
        let payload = fooocus_payload("a lighthouse", &config, "model.safetensors");
        assert_eq!(payload["prompt"], json!("a lighthouse"));
        assert_eq!(payload["negative_prompt"], json!("blurry"));
        assert_eq!(payload["style_selections"], json!(["Fooocus V2"]));
        assert_eq!(payload["performance_selection"], json!("Quality"));
        assert_eq!(payload["aspect_ratios_selection"], json!("1024*1024"));
        assert_eq!(payload["image_number"], json!(2));
        assert_eq!(payload["image_seed"], json!(42));
        assert_eq!(payload["base_model_name"], json!("model.safetensors"));
        assert_eq!(payload["require_base64"], json!(false));
    }

    #[test]
    fn fooocus_urls_map_into_outputs_tree() -> anyhow::Result<()> {
        let body = json!([
            {"url": "http://127.0.0.1:8888/files/2024-05-01/abc.png", "seed": "1"},
            {"base64": null},
        ]);
        let urls = fooocus_result_urls(&body)?;
        assert_eq!(urls.len(), 1);
        assert_eq!(
            fooocus_output_path(Path::new("/opt/Fooocus"), &urls[0]),
            Some(Path::new("/opt/Fooocus/outputs/files/2024-05-01/abc.png").to_path_buf())
        );
        assert_eq!(fooocus_output_path(Path::new("/opt"), "http://127.0.0.1:8888/"), None);
        assert!(fooocus_result_urls(&json!({"detail": "error"})).is_err());
        Ok(())
    }

    #[test]
    fn move_file_relocates_and_removes_source() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let source = temp.path().join("abc.png");
        let target = temp.path().join("out").join("cats_1.png");
        fs::create_dir_all(target.parent().unwrap_or(temp.path()))?;
        fs::write(&source, b"png")?;

        move_file(&source, &target)?;
        assert!(!source.exists());
        assert_eq!(fs::read(&target)?, b"png");
        Ok(())
    }

    #[test]
    fn banana_payload_requests_image_modality() {
        let config = PaintConfig {
            aspect_ratio: Some("1:1".to_string()),
            negative_prompt: Some("text".to_string()),
            ..PaintConfig::default()
        };
        let payload = banana_payload("a red kite", &config);
        assert_eq!(payload["generationConfig"]["responseModalities"], json!(["IMAGE"]));
        assert_eq!(
            payload["generationConfig"]["imageConfig"]["aspectRatio"],
            json!("1:1")
        );
        assert_eq!(
            payload["contents"][0]["parts"][0]["text"],
            json!("a red kite\n\nAvoid: text")
        );
    }

    #[test]
    fn parse_dims_accepts_both_separators() {
        assert_eq!(parse_dims("1344*768"), (1344, 768));
        assert_eq!(parse_dims("64x32"), (64, 32));
        assert_eq!(parse_dims("square"), (1024, 1024));
    }

    #[test]
    fn dryrun_artist_writes_requested_images() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = PaintConfig {
            image_size: Some("8*4".to_string()),
            n_images: Some(3),
            output_dir: Some(temp.path().join("images")),
            ..PaintConfig::default()
        };
        let artist = build_artist(ArtistKind::Dryrun, &ArtistSettings::default());
        let files = artist
            .paint("a quiet harbour", "harbour_1", &config)
            .map_err(|failure| anyhow::anyhow!(failure))?;

        let names: Vec<String> = files
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["harbour_1_1.png", "harbour_1_2.png", "harbour_1_3.png"]);
        let decoded = image::open(&files[0])?;
        assert_eq!((decoded.width(), decoded.height()), (8, 4));
        Ok(())
    }
}
