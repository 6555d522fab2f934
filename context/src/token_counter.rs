//! Character-based token estimation.
//!
//! No provider publishes its exact tokenizer for every model, so rather than
//! bundle one encoding that's only precise for a single vendor, this counter
//! estimates: `ceil(charCount / 3.5)` per string, plus a fixed per-message
//! overhead for role markers and wire framing. Good enough to budget against;
//! not a substitute for a provider's own usage accounting.

use push_types::Message;

const CHARS_PER_TOKEN: f64 = 3.5;
const MESSAGE_OVERHEAD: u32 = 4;

/// Stateless estimator; cheap to construct, safe to share across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Estimated token count for a raw string, `ceil(chars / 3.5)`.
    #[must_use]
    pub fn count_str(self, text: &str) -> u32 {
        let chars = text.chars().count();
        if chars == 0 {
            return 0;
        }
        let estimate = (chars as f64 / CHARS_PER_TOKEN).ceil();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let tokens = estimate as u32;
        tokens
    }

    /// Estimated tokens for one message: its content plus the fixed
    /// per-message overhead.
    #[must_use]
    pub fn count_message(self, msg: &Message) -> u32 {
        self.count_str(msg.content()) + MESSAGE_OVERHEAD
    }

    /// Estimated tokens across a whole transcript.
    #[must_use]
    pub fn count_messages(self, messages: &[Message]) -> u32 {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH
    }

    #[test]
    fn count_str_empty_is_zero() {
        assert_eq!(TokenCounter::new().count_str(""), 0);
    }

    #[test]
    fn count_str_rounds_up() {
        // 7 chars / 3.5 = 2 exactly
        assert_eq!(TokenCounter::new().count_str("1234567"), 2);
        // 8 chars / 3.5 = 2.28... -> 3
        assert_eq!(TokenCounter::new().count_str("12345678"), 3);
    }

    #[test]
    fn count_message_adds_overhead() {
        let counter = TokenCounter::new();
        let msg = Message::try_user("hi", now()).unwrap();
        assert_eq!(counter.count_message(&msg), counter.count_str("hi") + 4);
    }

    #[test]
    fn count_messages_sums_each_with_overhead() {
        let counter = TokenCounter::new();
        let messages = vec![
            Message::try_user("Hello!", now()).unwrap(),
            Message::try_user("How are you today?", now()).unwrap(),
        ];
        let total = counter.count_messages(&messages);
        let expected: u32 = messages.iter().map(|m| counter.count_message(m)).sum();
        assert_eq!(total, expected);
    }

    #[test]
    fn counter_is_copy() {
        let counter = TokenCounter::new();
        let copied = counter;
        assert_eq!(counter.count_str("x"), copied.count_str("x"));
    }
}
