use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use regex::{Captures, Regex};
use tracing::warn;

use super::wildcards::WildcardTable;

/// Maximum number of substitution passes over one template.
pub const RECURSION_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveWarning {
    /// The token had no wildcard list and was replaced with nothing.
    UnknownWildcard(String),
    /// Tokens were still present after [`RECURSION_LIMIT`] passes.
    RecursionLimit { passes: usize },
}

impl fmt::Display for ResolveWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownWildcard(name) => write!(f, "unknown wildcard __{name}__ dropped"),
            Self::RecursionLimit { passes } => {
                write!(f, "wildcards still unresolved after {passes} passes")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub text: String,
    pub warnings: Vec<ResolveWarning>,
}

impl Resolution {
    pub fn hit_recursion_limit(&self) -> bool {
        self.warnings
            .iter()
            .any(|warning| matches!(warning, ResolveWarning::RecursionLimit { .. }))
    }
}

/// Expands `__name__` tokens from a [`WildcardTable`].
///
/// Random draws come from a resolver-owned RNG. Ordered draws walk a per-name cursor that
/// survives across calls and is reset whenever a different override set is activated.
pub struct WildcardResolver {
    table: WildcardTable,
    active_set: Option<String>,
    cursors: HashMap<String, usize>,
    rng: StdRng,
}

impl WildcardResolver {
    pub fn new(table: WildcardTable) -> Self {
        Self::with_rng(table, StdRng::from_entropy())
    }

    pub fn with_seed(table: WildcardTable, seed: u64) -> Self {
        Self::with_rng(table, StdRng::seed_from_u64(seed))
    }

    pub fn with_rng(table: WildcardTable, rng: StdRng) -> Self {
        Self {
            table,
            active_set: None,
            cursors: HashMap::new(),
            rng,
        }
    }

    pub fn table(&self) -> &WildcardTable {
        &self.table
    }

    pub fn active_set(&self) -> Option<&str> {
        self.active_set.as_deref()
    }

    /// Swaps in the table for override set `name`. Cursors restart when the set changes.
    pub fn activate(&mut self, name: &str, table: WildcardTable) {
        if self.active_set.as_deref() != Some(name) {
            self.cursors.clear();
            self.active_set = Some(name.to_string());
        }
        self.table = table;
    }

    pub fn reset_cursors(&mut self) {
        self.cursors.clear();
    }

    pub fn resolve(&mut self, template: &str, ordered: bool) -> Resolution {
        let pattern = token_pattern();
        let mut text = template.to_string();
        let mut warnings = Vec::new();
        let mut settled = false;

        for _ in 0..RECURSION_LIMIT {
            if !pattern.is_match(&text) {
                settled = true;
                break;
            }
            let mut substituted = 0usize;
            let next = pattern
                .replace_all(&text, |caps: &Captures<'_>| {
                    let name = &caps[1];
                    match self.draw(name, ordered) {
                        Some(value) => {
                            substituted += 1;
                            value
                        }
                        None => {
                            push_unique_warning(
                                &mut warnings,
                                ResolveWarning::UnknownWildcard(name.to_string()),
                            );
                            String::new()
                        }
                    }
                })
                .into_owned();
            text = next;
            if substituted == 0 {
                settled = true;
                break;
            }
        }

        if !settled && pattern.is_match(&text) {
            push_unique_warning(
                &mut warnings,
                ResolveWarning::RecursionLimit {
                    passes: RECURSION_LIMIT,
                },
            );
        }

        for warning in &warnings {
            match warning {
                ResolveWarning::UnknownWildcard(name) => {
                    warn!(wildcard = %name, "unknown wildcard replaced with empty text");
                }
                ResolveWarning::RecursionLimit { passes } => {
                    warn!(passes, template, "wildcard recursion limit reached");
                }
            }
        }

        Resolution { text, warnings }
    }

    fn draw(&mut self, name: &str, ordered: bool) -> Option<String> {
        let candidates = self.table.get(name)?;
        if !ordered {
            return candidates.choose(&mut self.rng).cloned();
        }
        let len = candidates.len();
        let cursor = self.cursors.entry(name.to_string()).or_insert(0);
        let value = candidates[*cursor % len].clone();
        *cursor = (*cursor + 1) % len;
        Some(value)
    }
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"__(.*?)__").expect("wildcard token pattern is valid"))
}

fn push_unique_warning(warnings: &mut Vec<ResolveWarning>, warning: ResolveWarning) {
    if warnings.iter().any(|existing| existing == &warning) {
        return;
    }
    warnings.push(warning);
}
