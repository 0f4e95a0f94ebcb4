use atelier_contracts::errors::{CollaboratorFailure, LedgerError};
use thiserror::Error;

/// A backend selector string that names no supported implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}' (expected one of: {expected})")]
pub struct UnknownKind {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Why a single job stopped before reaching `Done`.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("instruction template not found: {0}")]
    InstructionMissing(String),

    #[error("idea generation failed: {0}")]
    Idea(CollaboratorFailure),

    #[error("image generation failed: {0}")]
    Image(CollaboratorFailure),

    #[error("metadata write failed: {0}")]
    Metadata(#[source] LedgerError),
}
