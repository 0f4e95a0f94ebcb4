use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use atelier_contracts::errors::CollaboratorFailure;
use atelier_contracts::ideas::{Idea, IdeaMapper, DEFAULT_CATEGORY};
use reqwest::blocking::Client as HttpClient;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::UnknownKind;
use crate::gemini::{extract_text, GeminiClient};
use crate::transport::{response_json_or_error, to_failure, trim_base_url, truncate_text};

pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.2";
pub const DEFAULT_OLLAMA_TEMPERATURE: f64 = 0.8;
pub const DEFAULT_GEMINI_TEXT_MODEL: &str = "gemini-2.5-flash";

const OLLAMA_TIMEOUT_SECONDS: f64 = 300.0;

/// Language-model collaborator: turns an instruction into an [`Idea`].
pub trait Brain: Send + Sync {
    fn name(&self) -> &str;
    fn get_idea(&self, instruction: &str) -> Result<Idea, CollaboratorFailure>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrainKind {
    #[default]
    Gemini,
    Ollama,
    Dryrun,
}

impl BrainKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::Dryrun => "dryrun",
        }
    }
}

impl fmt::Display for BrainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrainKind {
    type Err = UnknownKind;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            "dryrun" => Ok(Self::Dryrun),
            _ => Err(UnknownKind {
                kind: "brain",
                value: raw.to_string(),
                expected: "gemini, ollama, dryrun",
            }),
        }
    }
}

/// Everything the brain backends need, already resolved from settings and environment.
#[derive(Debug, Clone)]
pub struct BrainSettings {
    pub ollama_url: String,
    pub ollama_model: String,
    pub ollama_temperature: f64,
    pub gemini_api_base: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub default_category: u32,
}

impl Default for BrainSettings {
    fn default() -> Self {
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            ollama_model: DEFAULT_OLLAMA_MODEL.to_string(),
            ollama_temperature: DEFAULT_OLLAMA_TEMPERATURE,
            gemini_api_base: None,
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_TEXT_MODEL.to_string(),
            default_category: DEFAULT_CATEGORY,
        }
    }
}

pub struct OllamaBrain {
    url: String,
    model: String,
    temperature: f64,
    mapper: IdeaMapper,
    http: HttpClient,
}

impl OllamaBrain {
    pub fn new(settings: &BrainSettings) -> Self {
        Self {
            url: trim_base_url(&settings.ollama_url),
            model: settings.ollama_model.clone(),
            temperature: settings.ollama_temperature,
            mapper: IdeaMapper::new(settings.default_category),
            http: HttpClient::new(),
        }
    }

    fn request_idea(&self, instruction: &str) -> Result<Idea> {
        let endpoint = format!("{}/api/generate", self.url);
        let payload = ollama_payload(&self.model, instruction, self.temperature);
        debug!(endpoint = %endpoint, model = %self.model, "ollama request");
        let response = self
            .http
            .post(&endpoint)
            .timeout(Duration::from_secs_f64(OLLAMA_TIMEOUT_SECONDS))
            .json(&payload)
            .send()
            .with_context(|| format!("Ollama request failed ({endpoint})"))?;
        let body = response_json_or_error("Ollama", response)?;
        let text = ollama_response_text(&body)?;
        debug!(raw = %truncate_text(text, 400), "ollama answered");
        Ok(self.mapper.from_llm_text(text)?)
    }
}

impl Brain for OllamaBrain {
    fn name(&self) -> &str {
        "ollama"
    }

    fn get_idea(&self, instruction: &str) -> Result<Idea, CollaboratorFailure> {
        self.request_idea(instruction).map_err(to_failure)
    }
}

fn ollama_payload(model: &str, instruction: &str, temperature: f64) -> Value {
    json!({
        "model": model,
        "prompt": instruction,
        "stream": false,
        "format": "json",
        "options": {"temperature": temperature},
    })
}

fn ollama_response_text(body: &Value) -> Result<&str> {
    if let Some(message) = body.get("error").and_then(Value::as_str) {
        bail!("Ollama reported an error: {message}");
    }
    body.get("response")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Ollama response missing \"response\" field"))
}

pub struct GeminiBrain {
    client: GeminiClient,
    model: String,
    mapper: IdeaMapper,
}

impl GeminiBrain {
    pub fn new(settings: &BrainSettings) -> Self {
        Self {
            client: GeminiClient::new(
                settings.gemini_api_base.as_deref(),
                settings.gemini_api_key.clone(),
            ),
            model: settings.gemini_model.clone(),
            mapper: IdeaMapper::new(settings.default_category),
        }
    }

    fn request_idea(&self, instruction: &str) -> Result<Idea> {
        let payload = gemini_text_payload(instruction);
        let body = self.client.generate_content(&self.model, &payload)?;
        let text = extract_text(&body).ok_or_else(|| anyhow!("Gemini returned no text"))?;
        debug!(raw = %truncate_text(&text, 400), "gemini answered");
        Ok(self.mapper.from_llm_text(&text)?)
    }
}

impl Brain for GeminiBrain {
    fn name(&self) -> &str {
        "gemini"
    }

    fn get_idea(&self, instruction: &str) -> Result<Idea, CollaboratorFailure> {
        self.request_idea(instruction).map_err(to_failure)
    }
}

fn gemini_text_payload(instruction: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": instruction}],
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "thinkingConfig": {"thinkingBudget": 0},
        },
    })
}

/// Offline brain: derives a stable idea from the instruction text.
pub struct DryrunBrain {
    default_category: u32,
}

impl DryrunBrain {
    pub fn new(default_category: u32) -> Self {
        Self { default_category }
    }
}

impl Brain for DryrunBrain {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn get_idea(&self, instruction: &str) -> Result<Idea, CollaboratorFailure> {
        let Some(subject) = instruction
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
        else {
            return Err(CollaboratorFailure::new("dryrun brain received an empty instruction"));
        };
        let digest = Sha256::digest(instruction.as_bytes());
        let tag = hex::encode(&digest[..4]);
        Ok(Idea {
            prompt: truncate_text(subject, 400),
            title: format!("Dryrun idea {tag}"),
            keywords: format!("dryrun,{tag}"),
            category: self.default_category,
        })
    }
}

/// Closed set of brain implementations, chosen once at startup.
pub enum BrainBackend {
    Ollama(OllamaBrain),
    Gemini(GeminiBrain),
    Dryrun(DryrunBrain),
}

impl Brain for BrainBackend {
    fn name(&self) -> &str {
        match self {
            Self::Ollama(brain) => brain.name(),
            Self::Gemini(brain) => brain.name(),
            Self::Dryrun(brain) => brain.name(),
        }
    }

    fn get_idea(&self, instruction: &str) -> Result<Idea, CollaboratorFailure> {
        match self {
            Self::Ollama(brain) => brain.get_idea(instruction),
            Self::Gemini(brain) => brain.get_idea(instruction),
            Self::Dryrun(brain) => brain.get_idea(instruction),
        }
    }
}

pub fn build_brain(kind: BrainKind, settings: &BrainSettings) -> BrainBackend {
    match kind {
        BrainKind::Ollama => BrainBackend::Ollama(OllamaBrain::new(settings)),
        BrainKind::Gemini => BrainBackend::Gemini(GeminiBrain::new(settings)),
        BrainKind::Dryrun => BrainBackend::Dryrun(DryrunBrain::new(settings.default_category)),
    }
}
