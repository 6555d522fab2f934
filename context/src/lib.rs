//! Token budget estimation and three-phase context trimming.
//!
//! # Architecture
//!
//! ```text
//! TokenCounter   — ceil(charCount/3.5) + per-message overhead
//! BudgetTable    — (provider, model pattern) -> { target, max } tokens
//! trim_messages  — summarize -> digest -> hard-splice, target-token gated
//! ```

mod budget;
mod token_counter;
mod trim;

pub use budget::{Budget, BudgetTable};
pub use token_counter::TokenCounter;
pub use trim::{ContextMode, ContextModeNoneExceeded, TrimResult, trim_messages};
