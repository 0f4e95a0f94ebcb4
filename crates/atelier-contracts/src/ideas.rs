use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::IdeaError;

/// Taxonomy code used when the model omits a category ("graphical resources").
pub const DEFAULT_CATEGORY: u32 = 8;

/// Structured output of a Brain: what to paint and how to describe it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idea {
    pub prompt: String,
    pub title: String,
    /// Comma separated, textual order preserved.
    pub keywords: String,
    pub category: u32,
}

/// Converts loosely shaped model output into a validated [`Idea`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdeaMapper {
    default_category: u32,
}

impl Default for IdeaMapper {
    fn default() -> Self {
        Self::new(DEFAULT_CATEGORY)
    }
}

impl IdeaMapper {
    pub fn new(default_category: u32) -> Self {
        Self { default_category }
    }

    pub fn default_category(&self) -> u32 {
        self.default_category
    }

    /// Parses raw model text, tolerating a surrounding Markdown code fence.
    pub fn from_llm_text(&self, raw: &str) -> Result<Idea, IdeaError> {
        let cleaned = strip_code_fence(raw);
        let value: Value = serde_json::from_str(cleaned)
            .map_err(|err| IdeaError::Malformed(format!("model output is not JSON: {err}")))?;
        self.from_llm_json(&value)
    }

    pub fn from_llm_json(&self, raw: &Value) -> Result<Idea, IdeaError> {
        let Some(obj) = raw.as_object() else {
            return Err(IdeaError::Malformed(
                "model output is not a JSON object".to_string(),
            ));
        };

        let prompt = clean_text(obj.get("prompt"));
        if prompt.is_empty() {
            return Err(IdeaError::MissingField("prompt"));
        }
        let title = clean_text(obj.get("title"));
        if title.is_empty() {
            return Err(IdeaError::MissingField("title"));
        }

        let keywords = match obj.get("keywords") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .collect::<Vec<&str>>()
                .join(","),
            other => clean_text(other),
        };

        let category = obj
            .get("category")
            .and_then(parse_category)
            .unwrap_or(self.default_category);

        Ok(Idea {
            prompt,
            title,
            keywords,
            category,
        })
    }
}

fn clean_text(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(|text| text.trim().trim_matches('"').trim().to_string())
        .unwrap_or_default()
}

fn parse_category(value: &Value) -> Option<u32> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .and_then(|raw| u32::try_from(raw).ok())
            .or_else(|| number.as_f64().and_then(whole_category)),
        Value::String(text) => text.trim().trim_matches('"').parse::<u32>().ok(),
        _ => None,
    }
}

fn whole_category(raw: f64) -> Option<u32> {
    (raw.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&raw)).then_some(raw as u32)
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{IdeaMapper, DEFAULT_CATEGORY};
    use crate::errors::IdeaError;

    #[test]
    fn maps_clean_model_output() {
        let idea = IdeaMapper::default()
            .from_llm_json(&json!({
                "prompt": "  \"a lighthouse at dusk\" ",
                "title": "Lighthouse",
                "keywords": "sea, light,dusk",
                "category": 11,
            }))
            .unwrap();
        assert_eq!(idea.prompt, "a lighthouse at dusk");
        assert_eq!(idea.title, "Lighthouse");
        assert_eq!(idea.keywords, "sea, light,dusk");
        assert_eq!(idea.category, 11);
    }

    #[test]
    fn keyword_arrays_are_joined_in_order() {
        let idea = IdeaMapper::default()
            .from_llm_json(&json!({
                "prompt": "p",
                "title": "t",
                "keywords": ["zebra", " apple ", ""],
            }))
            .unwrap();
        assert_eq!(idea.keywords, "zebra,apple");
    }

    #[test]
    fn category_falls_back_when_missing_or_not_numeric() {
        let mapper = IdeaMapper::new(3);
        let missing = mapper
            .from_llm_json(&json!({"prompt": "p", "title": "t"}))
            .unwrap();
        assert_eq!(missing.category, 3);

        let garbage = mapper
            .from_llm_json(&json!({"prompt": "p", "title": "t", "category": "photos"}))
            .unwrap();
        assert_eq!(garbage.category, 3);

        let numeric_text = mapper
            .from_llm_json(&json!({"prompt": "p", "title": "t", "category": "5"}))
            .unwrap();
        assert_eq!(numeric_text.category, 5);
        assert_eq!(IdeaMapper::default().default_category(), DEFAULT_CATEGORY);
    }

    #[test]
    fn whole_number_float_category_is_accepted() {
        let mapper = IdeaMapper::new(3);
        let whole = mapper
            .from_llm_json(&json!({"prompt": "p", "title": "t", "category": 8.0}))
            .unwrap();
        assert_eq!(whole.category, 8);

        let fractional = mapper
            .from_llm_json(&json!({"prompt": "p", "title": "t", "category": 8.5}))
            .unwrap();
        assert_eq!(fractional.category, 3);

        let negative = mapper
            .from_llm_json(&json!({"prompt": "p", "title": "t", "category": -2.0}))
            .unwrap();
        assert_eq!(negative.category, 3);
    }

    #[test]
    fn empty_prompt_or_title_is_rejected() {
        let mapper = IdeaMapper::default();
        assert_eq!(
            mapper.from_llm_json(&json!({"prompt": "  ", "title": "t"})),
            Err(IdeaError::MissingField("prompt"))
        );
        assert_eq!(
            mapper.from_llm_json(&json!({"prompt": "p"})),
            Err(IdeaError::MissingField("title"))
        );
        assert!(matches!(
            mapper.from_llm_json(&json!(["prompt"])),
            Err(IdeaError::Malformed(_))
        ));
    }

    #[test]
    fn fenced_text_is_unwrapped_before_parsing() {
        let raw = "```json\n{\"prompt\": \"fox\", \"title\": \"Fox\", \"keywords\": \"fox\", \"category\": 1}\n```";
        let idea = IdeaMapper::default().from_llm_text(raw).unwrap();
        assert_eq!(idea.prompt, "fox");
        assert!(IdeaMapper::default().from_llm_text("not json").is_err());
    }
}
