//! Data model and file-backed stores for the atelier image pipeline.

pub mod configs;
pub mod errors;
pub mod events;
pub mod filenames;
pub mod ideas;
pub mod ledger;
pub mod prompts;
pub mod summary;
