mod instructions;
mod resolver;
mod templates;
mod wildcards;

pub use instructions::{compose, InstructionStore, PROMPT_PLACEHOLDER};
pub use resolver::{Resolution, ResolveWarning, WildcardResolver, RECURSION_LIMIT};
pub use templates::PromptTemplates;
pub use wildcards::{WildcardStore, WildcardTable};
