//! Tokenizer utilities.
//!
//! Token counts drive the buffer size trigger, the profile content ceiling
//! and every token-budgeted read, so all counting goes through one shared
//! BPE encoder (o200k, the gpt-4o family encoding).

use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;

fn encoder() -> &'static CoreBPE {
    static ENCODER: OnceLock<CoreBPE> = OnceLock::new();
    ENCODER.get_or_init(|| tiktoken_rs::o200k_base().expect("o200k encoder is embedded"))
}

/// Encode text into BPE token ids.
pub fn encode(content: &str) -> Vec<u32> {
    encoder().encode_with_special_tokens(content)
}

/// Number of tokens in `content`.
pub fn count_tokens(content: &str) -> usize {
    encode(content).len()
}

/// Truncate `content` to at most `max_tokens` tokens.
///
/// Falls back to the untruncated input if the token slice does not decode
/// cleanly (can happen when a cut lands inside a multi-token codepoint).
pub fn truncate_tokens(content: &str, max_tokens: usize) -> String {
    let tokens = encode(content);
    if tokens.len() <= max_tokens {
        return content.to_string();
    }
    let truncated: Vec<u32> = tokens.into_iter().take(max_tokens).collect();
    match encoder().decode(truncated) {
        Ok(text) => text,
        Err(_) => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_tokens_is_nonzero_for_text() {
        assert!(count_tokens("hello world") > 0);
    }

    #[test]
    fn count_tokens_empty_is_zero() {
        assert_eq!(count_tokens(""), 0);
    }

    #[test]
    fn truncate_noop_when_under_budget() {
        let text = "short text";
        assert_eq!(truncate_tokens(text, 100), text);
    }

    #[test]
    fn truncate_shortens_long_text() {
        let text = "word ".repeat(200);
        let truncated = truncate_tokens(&text, 10);
        assert!(count_tokens(&truncated) <= 10);
        assert!(truncated.len() < text.len());
    }

    #[test]
    fn counting_is_stable() {
        assert_eq!(count_tokens("stable input"), count_tokens("stable input"));
    }
}
