use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;
use tracing::warn;

use crate::transport::{
    is_retryable_transport_error, non_empty_env, response_json_or_error, trim_base_url,
};

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const REQUEST_TIMEOUT_SECONDS: f64 = 120.0;
const TRANSPORT_RETRIES: usize = 2;
const RETRY_BACKOFF_SECONDS: f64 = 1.2;

pub(crate) struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Thin `generateContent` client shared by the Gemini brain and the image artist.
pub(crate) struct GeminiClient {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(api_base: Option<&str>, api_key: Option<String>) -> Self {
        let api_base = api_base
            .map(trim_base_url)
            .filter(|value| !value.is_empty())
            .or_else(|| non_empty_env("GEMINI_API_BASE").map(|value| trim_base_url(&value)))
            .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
        let api_key = api_key
            .filter(|value| !value.trim().is_empty())
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
            .or_else(|| non_empty_env("GOOGLE_API_KEY"));
        Self {
            api_base,
            api_key,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    pub fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(model);
        let response = self.post_with_transport_retries(&endpoint, api_key, payload)?;
        response_json_or_error("Gemini", response)
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<HttpResponse> {
        let mut attempt = 0usize;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(REQUEST_TIMEOUT_SECONDS))
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= TRANSPORT_RETRIES {
                        return Err(err);
                    }
                    attempt += 1;
                    warn!(
                        attempt,
                        max = TRANSPORT_RETRIES,
                        "Gemini transport retry after transient failure"
                    );
                    thread::sleep(Duration::from_secs_f64(
                        RETRY_BACKOFF_SECONDS * attempt as f64,
                    ));
                }
            }
        }
    }
}

fn candidate_parts(response_payload: &Value) -> Vec<Value> {
    response_payload
        .get("candidates")
        .and_then(Value::as_array)
        .map(|candidates| {
            candidates
                .iter()
                .filter_map(|candidate| {
                    candidate
                        .get("content")
                        .and_then(|content| content.get("parts"))
                        .and_then(Value::as_array)
                })
                .flatten()
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// First non-empty text part of the first candidate that has one.
pub(crate) fn extract_text(response_payload: &Value) -> Option<String> {
    candidate_parts(response_payload)
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

pub(crate) fn extract_image_items(response_payload: &Value) -> Result<Vec<ImageBytes>> {
    let mut out = Vec::new();
    for part in candidate_parts(response_payload) {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64
            .decode(data.as_bytes())
            .context("Gemini image base64 decode failed")?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        out.push(ImageBytes { bytes, mime_type });
    }
    Ok(out)
}

pub(crate) fn extension_for_mime(mime: Option<&str>) -> &'static str {
    let lowered = mime.unwrap_or_default().to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    "png"
}
