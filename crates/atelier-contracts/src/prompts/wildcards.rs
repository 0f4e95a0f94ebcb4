use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::errors::StoreError;

/// Wildcard name (file stem) to its candidate lines, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WildcardTable {
    entries: IndexMap<String, Vec<String>>,
}

impl WildcardTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty candidate lists are dropped so a name is either resolvable or absent.
    pub fn insert(&mut self, name: impl Into<String>, candidates: Vec<String>) {
        let name = name.into();
        if candidates.is_empty() {
            self.entries.shift_remove(&name);
            return;
        }
        self.entries.insert(name, candidates);
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, Vec<String>)> for WildcardTable {
    fn from_iter<T: IntoIterator<Item = (N, Vec<String>)>>(iter: T) -> Self {
        let mut table = Self::new();
        for (name, candidates) in iter {
            table.insert(name, candidates);
        }
        table
    }
}

/// Loads wildcard tables from directories of `*.txt` files.
///
/// The common set lives directly in the wildcard directory; a niche override set lives in a
/// sub-directory named after the niche.
pub struct WildcardStore;

impl WildcardStore {
    pub fn load(dir: &Path) -> Result<WildcardTable, StoreError> {
        if !dir.is_dir() {
            return Err(StoreError::MissingDirectory {
                kind: "wildcards",
                path: dir.to_path_buf(),
            });
        }
        Ok(read_table(dir))
    }

    /// A niche without an override directory simply has no overrides.
    pub fn load_override(dir: &Path, name: &str) -> WildcardTable {
        let niche_dir = dir.join(name);
        if !niche_dir.is_dir() {
            debug!(niche = name, "no wildcard overrides");
            return WildcardTable::new();
        }
        read_table(&niche_dir)
    }

    /// Every base name survives; names present in `over` take its list wholesale.
    pub fn merge(base: &WildcardTable, over: &WildcardTable) -> WildcardTable {
        let mut merged = base.clone();
        for (name, candidates) in &over.entries {
            merged.entries.insert(name.clone(), candidates.clone());
        }
        merged
    }
}

fn read_table(dir: &Path) -> WildcardTable {
    let mut table = WildcardTable::new();
    for path in text_files(dir) {
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let candidates = raw
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<String>>();
                table.insert(name, candidates);
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "could not read wildcard file; skipping"
                );
            }
        }
    }
    debug!(dir = %dir.display(), count = table.len(), "loaded wildcards");
    table
}

/// Sorted `*.txt` files directly under `dir`. Unreadable entries are logged and skipped.
pub(crate) fn text_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "could not list directory");
            return Vec::new();
        }
    };
    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => {
                let path = entry.path();
                let is_txt = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("txt"))
                    .unwrap_or(false);
                if path.is_file() && is_txt {
                    files.push(path);
                }
            }
            Err(err) => warn!(dir = %dir.display(), error = %err, "skipping unreadable entry"),
        }
    }
    files.sort();
    files
}
