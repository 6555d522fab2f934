//! The three-phase trim algorithm: summarize verbose turns, then digest
//! consecutive tool exchanges, then splice the oldest survivors outright.
//!
//! Every phase preserves the system prompt at index 0 and the first real
//! user message untouched — a caller can always point back to "what did I
//! originally ask" even after aggressive trimming.

use push_types::Message;

use crate::budget::Budget;
use crate::token_counter::TokenCounter;

/// How a caller wants an over-budget context handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextMode {
    /// Run the three trim phases when the transcript exceeds its budget.
    #[default]
    Graceful,
    /// Never trim; let the provider call fail with whatever error an
    /// over-length request produces.
    None,
}

/// A transcript that no longer fits and that `ContextMode::None` refused to
/// trim.
#[derive(Debug, Clone, thiserror::Error)]
#[error("context exceeds budget ({used} > {budget} tokens) and context_mode is none")]
pub struct ContextModeNoneExceeded {
    pub used: u32,
    pub budget: u32,
}

/// The protected tail kept untouched by every phase.
const PROTECTED_TAIL: usize = 14;
/// Floor enforced by Phase 3: system + first user message + recent tail.
const MIN_SURVIVING_MESSAGES: usize = 16;
/// An assistant turn longer than this is eligible for Phase 1 summarization.
const VERBOSE_ASSISTANT_TOKENS: u32 = 200;
/// Characters of head/tail kept when a message is summarized.
const SUMMARY_EDGE_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimResult {
    pub messages: Vec<Message>,
    pub trimmed: bool,
}

fn first_user_index(messages: &[Message]) -> Option<usize> {
    messages.iter().position(|m| matches!(m, Message::User(_)))
}

fn protected_indices(messages: &[Message]) -> Vec<bool> {
    let len = messages.len();
    let first_user = first_user_index(messages);
    let tail_start = len.saturating_sub(PROTECTED_TAIL);
    (0..len)
        .map(|i| i == 0 && matches!(messages[0], Message::System(_)) || Some(i) == first_user || i >= tail_start)
        .collect()
}

fn is_tool_result(msg: &Message) -> bool {
    matches!(msg, Message::ToolResult(_))
}

fn is_verbose_assistant(msg: &Message, counter: TokenCounter) -> bool {
    matches!(msg, Message::Assistant(_)) && counter.count_str(msg.content()) > VERBOSE_ASSISTANT_TOKENS
}

fn summarize(content: &str) -> String {
    let char_count = content.chars().count();
    if char_count <= SUMMARY_EDGE_CHARS * 2 {
        return content.to_string();
    }
    let head: String = content.chars().take(SUMMARY_EDGE_CHARS).collect();
    let tail: String = content.chars().rev().take(SUMMARY_EDGE_CHARS).collect::<Vec<_>>().into_iter().rev().collect();
    let summarized_chars = char_count - SUMMARY_EDGE_CHARS * 2;
    format!("{head}\n[...summarized {summarized_chars} chars]\n{tail}")
}

fn phase1_summarize(messages: &[Message], protected: &[bool], counter: TokenCounter) -> Vec<Message> {
    messages
        .iter()
        .zip(protected)
        .map(|(msg, &is_protected)| {
            if is_protected {
                return msg.clone();
            }
            if is_tool_result(msg) || is_verbose_assistant(msg, counter) {
                msg.with_content(summarize(msg.content()))
            } else {
                msg.clone()
            }
        })
        .collect()
}

/// Walk oldest-to-newest folding one `(assistant, tool_result)` pair at a
/// time into a running `[CONTEXT DIGEST]` message, stopping the moment the
/// running total drops to `target_tokens` rather than digesting everything
/// up front.
fn phase2_digest(messages: &[Message], counter: TokenCounter, target_tokens: u32) -> Vec<Message> {
    let mut current = messages.to_vec();
    let mut digest_index: Option<usize> = None;
    let mut digest_parts: Vec<String> = Vec::new();

    loop {
        if counter.count_messages(&current) <= target_tokens {
            return current;
        }

        let protected = protected_indices(&current);
        let pair = (0..current.len().saturating_sub(1)).find(|&i| {
            !protected[i]
                && matches!(current[i], Message::Assistant(_))
                && !protected[i + 1]
                && matches!(current[i + 1], Message::ToolResult(_))
        });

        let Some(i) = pair else {
            return current;
        };

        digest_parts.push(format!("{}: {}", current[i].role_str(), current[i].content()));
        digest_parts.push(format!("{}: {}", current[i + 1].role_str(), current[i + 1].content()));
        let digest_text = format!("[CONTEXT DIGEST]\n{}\n[/CONTEXT DIGEST]", digest_parts.join("\n"));

        match digest_index {
            Some(idx) => {
                current.remove(i + 1);
                current.remove(i);
                let idx = if idx > i { idx - 2 } else { idx };
                current[idx] = current[idx].with_content(digest_text);
                digest_index = Some(idx);
            }
            None => {
                let timestamp = current[i].timestamp();
                current[i] = Message::system(
                    push_types::NonEmptyString::new(digest_text).expect("digest text is non-empty"),
                    timestamp,
                );
                current.remove(i + 1);
                digest_index = Some(i);
            }
        }
    }
}

fn phase3_hard_fallback(messages: &[Message], max_tokens: u32, counter: TokenCounter) -> Vec<Message> {
    let mut messages = messages.to_vec();
    loop {
        if messages.len() <= MIN_SURVIVING_MESSAGES || counter.count_messages(&messages) <= max_tokens {
            return messages;
        }
        let protected = protected_indices(&messages);
        let Some(victim) = (1..messages.len()).find(|&i| !protected[i]) else {
            return messages;
        };
        messages.remove(victim);
    }
}

/// Run the graceful trim pipeline against `messages`, stopping as soon as a
/// phase brings the total at or under `budget.target_tokens`. The input
/// slice is never mutated; the returned `messages` is always a fresh `Vec`.
#[must_use]
pub fn trim_messages(messages: &[Message], budget: Budget, counter: TokenCounter, mode: ContextMode) -> Result<TrimResult, ContextModeNoneExceeded> {
    let total = counter.count_messages(messages);
    if total <= budget.target_tokens {
        return Ok(TrimResult { messages: messages.to_vec(), trimmed: false });
    }

    if mode == ContextMode::None {
        return Err(ContextModeNoneExceeded { used: total, budget: budget.target_tokens });
    }

    let protected = protected_indices(messages);
    let summarized = phase1_summarize(messages, &protected, counter);
    if counter.count_messages(&summarized) <= budget.target_tokens {
        return Ok(TrimResult { messages: summarized, trimmed: true });
    }

    let digested = phase2_digest(&summarized, counter, budget.target_tokens);
    if counter.count_messages(&digested) <= budget.target_tokens {
        return Ok(TrimResult { messages: digested, trimmed: true });
    }

    let spliced = if counter.count_messages(&digested) > budget.max_tokens {
        phase3_hard_fallback(&digested, budget.max_tokens, counter)
    } else {
        digested
    };

    Ok(TrimResult { messages: spliced, trimmed: true })
}
