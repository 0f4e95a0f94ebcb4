//! Collaborator backends, the job state machine and the local service guard.

pub mod artists;
pub mod brains;
pub mod error;
mod gemini;
pub mod pipeline;
pub mod services;
mod transport;

pub use artists::{build_artist, Artist, ArtistBackend, ArtistKind, ArtistSettings};
pub use brains::{build_brain, Brain, BrainBackend, BrainKind, BrainSettings};
pub use error::{JobFailure, UnknownKind};
pub use gemini::DEFAULT_GEMINI_API_BASE;
pub use pipeline::{Job, JobOutcome, JobPipeline, JobReport, JobState};
pub use services::{ServiceHandle, ServiceSpec, ServiceSupervisor};
