use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;
use crate::ideas::Idea;

pub const ADOBE_HEADER: [&str; 5] = ["Filename", "Title", "Keywords", "Category", "Releases"];
pub const PROMPT_HEADER: [&str; 5] = ["Filename", "Title", "Keywords", "Category", "Prompt"];

/// One metadata row describing a produced image file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub filename: String,
    pub title: String,
    pub keywords: String,
    pub category: u32,
    pub prompt: String,
}

impl LedgerRow {
    pub fn from_idea(idea: &Idea, filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            title: idea.title.clone(),
            keywords: idea.keywords.clone(),
            category: idea.category,
            prompt: idea.prompt.clone(),
        }
    }
}

/// Append-only record of generated artifacts.
pub trait MetadataLedger {
    /// Creates the destination with its header if it does not exist yet.
    fn ensure_header(&self) -> Result<(), LedgerError>;
    fn append(&self, row: &LedgerRow) -> Result<(), LedgerError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LedgerLayout {
    /// Stock-site upload sheet with an empty releases column.
    #[default]
    Adobe,
    /// Same columns with the generation prompt in place of releases.
    WithPrompt,
}

impl LedgerLayout {
    pub fn header(&self) -> [&'static str; 5] {
        match self {
            Self::Adobe => ADOBE_HEADER,
            Self::WithPrompt => PROMPT_HEADER,
        }
    }

    fn record(&self, row: &LedgerRow) -> [String; 5] {
        let last = match self {
            Self::Adobe => String::new(),
            Self::WithPrompt => row.prompt.clone(),
        };
        [
            row.filename.clone(),
            row.title.clone(),
            row.keywords.clone(),
            row.category.to_string(),
            last,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct CsvLedger {
    path: PathBuf,
    layout: LedgerLayout,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>, layout: LedgerLayout) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> LedgerLayout {
        self.layout
    }

    fn open_append(&self) -> Result<csv::Writer<fs::File>, LedgerError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| LedgerError::Io {
                path: self.path.clone(),
                source,
            })?;
        Ok(csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file))
    }
}

impl MetadataLedger for CsvLedger {
    fn ensure_header(&self) -> Result<(), LedgerError> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut writer = self.open_append()?;
        writer.write_record(self.layout.header())?;
        writer.flush().map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }

    fn append(&self, row: &LedgerRow) -> Result<(), LedgerError> {
        let mut writer = self.open_append()?;
        writer.write_record(self.layout.record(row))?;
        writer.flush().map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}
