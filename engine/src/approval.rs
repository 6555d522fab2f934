//! The approval hook contract: decides whether a tool call needs a
//! confirmation round-trip before it runs, and the channel shape that
//! round-trip takes.

use std::future::Future;
use std::pin::Pin;

use push_tools::{ApprovalDecision, ApprovalMode, ConfirmationRequest, Policy, RiskClass};

/// What the policy says about one tool call before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalGate {
    /// Run it, no confirmation needed.
    Allowed,
    /// Ask the user; proceed only on an affirmative decision.
    NeedsApproval,
    /// Refuse outright, no prompt.
    Denied,
}

/// Applies `policy` to one call. An explicit denylist entry always wins;
/// an explicit allowlist entry always bypasses confirmation (but not a
/// denylist hit — denylist takes priority over allowlist on conflicting
/// configuration).
#[must_use]
pub fn gate(policy: &Policy, tool_name: &str, risk_class: RiskClass, tool_requires_approval: bool) -> ApprovalGate {
    if policy.is_denylisted(tool_name) {
        return ApprovalGate::Denied;
    }
    if policy.is_allowlisted(tool_name) {
        return ApprovalGate::Allowed;
    }

    match policy.mode {
        ApprovalMode::Permissive => {
            if matches!(risk_class, RiskClass::Exec | RiskClass::Net) {
                ApprovalGate::NeedsApproval
            } else {
                ApprovalGate::Allowed
            }
        }
        ApprovalMode::Default => {
            if tool_requires_approval || matches!(risk_class, RiskClass::Write | RiskClass::Exec | RiskClass::Net) {
                ApprovalGate::NeedsApproval
            } else {
                ApprovalGate::Allowed
            }
        }
        ApprovalMode::Strict => ApprovalGate::NeedsApproval,
    }
}

pub type ApprovalFut<'a> = Pin<Box<dyn Future<Output = ApprovalDecision> + Send + 'a>>;

/// The host surface the agent loop asks for a confirmation decision. A CLI
/// implements this by printing the request and reading a line; tests
/// implement it by returning a canned decision.
pub trait ApprovalHook: Send + Sync {
    fn request(&self, request: ConfirmationRequest) -> ApprovalFut<'_>;
}

/// Whether a batch-level decision already resolves this call without
/// asking again: `ApproveAll`/`DenyAll` apply to every remaining call in
/// the round, `ApproveSelected` only to the named tool call ids.
#[must_use]
pub fn decision_allows(decision: &ApprovalDecision, tool_call_id: &str) -> bool {
    match decision {
        ApprovalDecision::ApproveAll => true,
        ApprovalDecision::DenyAll => false,
        ApprovalDecision::ApproveSelected(ids) => ids.iter().any(|id| id == tool_call_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn policy(mode: ApprovalMode) -> Policy {
        Policy { mode, allowlist: HashSet::new(), denylist: HashSet::new() }
    }

    #[test]
    fn permissive_only_gates_exec_and_net() {
        let p = policy(ApprovalMode::Permissive);
        assert_eq!(gate(&p, "read_file", RiskClass::Read, false), ApprovalGate::Allowed);
        assert_eq!(gate(&p, "exec", RiskClass::Exec, false), ApprovalGate::NeedsApproval);
        assert_eq!(gate(&p, "web_search", RiskClass::Net, true), ApprovalGate::NeedsApproval);
    }

    #[test]
    fn default_gates_write_exec_net_and_opt_in_tools() {
        let p = policy(ApprovalMode::Default);
        assert_eq!(gate(&p, "read_file", RiskClass::Read, false), ApprovalGate::Allowed);
        assert_eq!(gate(&p, "write_file", RiskClass::Write, false), ApprovalGate::NeedsApproval);
        assert_eq!(gate(&p, "web_search", RiskClass::Net, true), ApprovalGate::NeedsApproval);
        assert_eq!(gate(&p, "pure_calc", RiskClass::Pure, true), ApprovalGate::NeedsApproval);
    }

    #[test]
    fn strict_gates_everything_not_allowlisted() {
        let p = policy(ApprovalMode::Strict);
        assert_eq!(gate(&p, "read_file", RiskClass::Read, false), ApprovalGate::NeedsApproval);
    }

    #[test]
    fn denylist_wins_over_allowlist() {
        let mut p = policy(ApprovalMode::Permissive);
        p.allowlist.insert("exec".to_string());
        p.denylist.insert("exec".to_string());
        assert_eq!(gate(&p, "exec", RiskClass::Exec, false), ApprovalGate::Denied);
    }

    #[test]
    fn allowlist_bypasses_strict_mode() {
        let mut p = policy(ApprovalMode::Strict);
        p.allowlist.insert("read_file".to_string());
        assert_eq!(gate(&p, "read_file", RiskClass::Read, false), ApprovalGate::Allowed);
    }

    #[test]
    fn decision_allows_respects_selected_ids() {
        let decision = ApprovalDecision::ApproveSelected(vec!["call_1".to_string()]);
        assert!(decision_allows(&decision, "call_1"));
        assert!(!decision_allows(&decision, "call_2"));
    }
}
