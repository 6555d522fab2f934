//! The token budget a provider/model pair gets before trimming kicks in.

use push_types::{ModelName, Provider};

const DEFAULT_TARGET_TOKENS: u32 = 88_000;
const DEFAULT_MAX_TOKENS: u32 = 100_000;

/// Target and hard-ceiling token counts for a context window.
///
/// `target_tokens` is where trimming stops trying to be gentle; `max_tokens`
/// is the point past which Phase 3 splices messages out regardless of cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub target_tokens: u32,
    pub max_tokens: u32,
}

impl Budget {
    #[must_use]
    pub const fn new(target_tokens: u32, max_tokens: u32) -> Self {
        Self { target_tokens, max_tokens }
    }

    #[must_use]
    pub const fn fallback() -> Self {
        Self::new(DEFAULT_TARGET_TOKENS, DEFAULT_MAX_TOKENS)
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::fallback()
    }
}

/// One row of the budget table: a provider plus a case-insensitive substring
/// pattern matched against the model id.
#[derive(Debug, Clone, Copy)]
struct BudgetRule {
    provider: Provider,
    model_pattern: &'static str,
    budget: Budget,
}

/// `(providerId, modelPattern) -> { targetTokens, maxTokens }`, matched by
/// case-insensitive substring against the model id. Unknown models fall back
/// to [`Budget::fallback`].
///
/// Every lookup returns a fresh [`Budget`] value — callers are free to treat
/// it as owned state without ever touching a shared table entry.
#[derive(Debug, Clone)]
pub struct BudgetTable {
    rules: Vec<BudgetRule>,
}

fn default_rules() -> Vec<BudgetRule> {
    vec![
        BudgetRule { provider: Provider::Claude, model_pattern: "opus", budget: Budget::new(850_000, 980_000) },
        BudgetRule { provider: Provider::Claude, model_pattern: "haiku", budget: Budget::new(170_000, 196_000) },
        BudgetRule { provider: Provider::Claude, model_pattern: "claude", budget: Budget::new(170_000, 196_000) },
        BudgetRule { provider: Provider::OpenAI, model_pattern: "gpt-5.2-pro", budget: Budget::new(340_000, 392_000) },
        BudgetRule { provider: Provider::OpenAI, model_pattern: "gpt", budget: Budget::new(340_000, 392_000) },
        BudgetRule { provider: Provider::Gemini, model_pattern: "flash", budget: Budget::new(900_000, 1_020_000) },
        BudgetRule { provider: Provider::Gemini, model_pattern: "gemini", budget: Budget::new(900_000, 1_020_000) },
    ]
}

impl BudgetTable {
    #[must_use]
    pub fn new() -> Self {
        Self { rules: default_rules() }
    }

    /// First matching rule wins; rules are checked in registration order, so
    /// more specific patterns (e.g. `"opus"`) should be added before their
    /// provider's catch-all (e.g. `"claude"`).
    #[must_use]
    pub fn lookup(&self, model: &ModelName) -> Budget {
        let id_lower = model.as_str().to_ascii_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.provider == model.provider() && id_lower.contains(rule.model_pattern))
            .map_or_else(Budget::fallback, |rule| rule.budget)
    }

    #[cfg(test)]
    pub fn push_rule(&mut self, provider: Provider, model_pattern: &'static str, budget: Budget) {
        self.rules.insert(0, BudgetRule { provider, model_pattern, budget });
    }
}

impl Default for BudgetTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: Provider, id: &str) -> ModelName {
        ModelName::new(provider, id)
    }

    #[test]
    fn lookup_matches_specific_pattern_before_catch_all() {
        let table = BudgetTable::new();
        let budget = table.lookup(&model(Provider::Claude, "claude-opus-4-6"));
        assert_eq!(budget, Budget::new(850_000, 980_000));
    }

    #[test]
    fn lookup_falls_back_to_provider_catch_all() {
        let table = BudgetTable::new();
        let budget = table.lookup(&model(Provider::Claude, "claude-sonnet-4-6"));
        assert_eq!(budget, Budget::new(170_000, 196_000));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let table = BudgetTable::new();
        let budget = table.lookup(&model(Provider::OpenAI, "GPT-5.2-Pro"));
        assert_eq!(budget, Budget::new(340_000, 392_000));
    }

    #[test]
    fn lookup_falls_back_to_default_for_unknown_model() {
        let table = BudgetTable::new();
        let budget = table.lookup(&model(Provider::Gemini, "some-future-model"));
        assert_eq!(budget, Budget::fallback());
    }

    #[test]
    fn lookup_returns_independent_value_each_call() {
        let table = BudgetTable::new();
        let a = table.lookup(&model(Provider::Claude, "claude-opus-4-6"));
        let b = table.lookup(&model(Provider::Claude, "claude-opus-4-6"));
        assert_eq!(a, b);
    }

    #[test]
    fn custom_rule_takes_precedence_when_pushed_first() {
        let mut table = BudgetTable::new();
        table.push_rule(Provider::Claude, "claude-opus-4-6", Budget::new(1, 2));
        let budget = table.lookup(&model(Provider::Claude, "claude-opus-4-6"));
        assert_eq!(budget, Budget::new(1, 2));
    }
}
