use std::fs;
use std::path::{Path, PathBuf};

use super::wildcards::text_files;
use crate::errors::StoreError;

/// A directory of per-niche prompt files (meta-prompts or wildcard templates).
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    path: PathBuf,
}

impl PromptTemplates {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = dir.into();
        if !path.is_dir() {
            return Err(StoreError::MissingDirectory {
                kind: "prompt templates",
                path,
            });
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `(niche, text)` pairs sorted by file name.
    pub fn templates(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut out = Vec::new();
        for file in text_files(&self.path) {
            let Some(niche) = file.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let text = fs::read_to_string(&file).map_err(|source| StoreError::Io {
                path: file.clone(),
                source,
            })?;
            out.push((niche.to_string(), text));
        }
        Ok(out)
    }
}
