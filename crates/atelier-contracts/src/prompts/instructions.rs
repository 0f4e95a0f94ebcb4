use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, warn};

use super::wildcards::text_files;
use crate::errors::StoreError;

/// Placeholder an instruction may use to position the resolved prompt.
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

/// Named system-prompt fragments, one `*.txt` file per instruction.
#[derive(Debug, Clone)]
pub struct InstructionStore {
    path: PathBuf,
    instructions: IndexMap<String, String>,
}

impl InstructionStore {
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = dir.into();
        if !path.is_dir() {
            return Err(StoreError::MissingDirectory {
                kind: "instructions",
                path,
            });
        }
        let mut store = Self {
            path,
            instructions: IndexMap::new(),
        };
        store.reload();
        Ok(store)
    }

    /// Re-reads the directory. Never triggered implicitly.
    pub fn reload(&mut self) {
        self.instructions.clear();
        for file in text_files(&self.path) {
            let Some(name) = file.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            match fs::read_to_string(&file) {
                Ok(text) => {
                    self.instructions.insert(name.to_string(), text);
                }
                Err(err) => {
                    warn!(
                        path = %file.display(),
                        error = %err,
                        "could not read instruction file; skipping"
                    );
                }
            }
        }
        debug!(dir = %self.path.display(), count = self.instructions.len(), "loaded instructions");
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.instructions.get(name).map(String::as_str)
    }

    pub fn names(&self) -> Vec<String> {
        self.instructions.keys().cloned().collect()
    }
}

/// Wraps a resolved prompt in the instruction text the brain receives.
pub fn compose(instruction: &str, resolved_prompt: &str) -> String {
    if instruction.contains(PROMPT_PLACEHOLDER) {
        return instruction.replace(PROMPT_PLACEHOLDER, resolved_prompt);
    }
    let instruction = instruction.trim_end();
    if instruction.is_empty() {
        return resolved_prompt.to_string();
    }
    format!("{instruction}\n\n{resolved_prompt}")
}
