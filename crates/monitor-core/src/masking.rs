//! Masking of sensitive values in user-visible output.
//!
//! Bot tokens and chat ids must never appear in full in any log line. The
//! rule: keep a short identifying prefix (3-10 characters), replace the rest
//! with `***`.

use std::sync::OnceLock;

use regex::Regex;

/// Mask a secret, keeping a short identifying prefix.
///
/// Keeps up to 10 leading characters but never more than half the value, and
/// at least 3 when the value is long enough. Values of 3 characters or fewer
/// are fully masked.
pub fn mask_secret(value: &str) -> String {
    let length = value.chars().count();
    if length <= 3 {
        return "***".to_string();
    }
    let keep = (length / 2).clamp(3, 10);
    let prefix: String = value.chars().take(keep).collect();
    format!("{prefix}***")
}

/// Telegram bot token pattern: numeric bot id, a colon, then the secret part.
fn token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{6,12}):[A-Za-z0-9_-]{20,}\b").expect("valid regex"))
}

/// Chat id pattern: channel ids (`-100…`) and long numeric user ids. The
/// trailing group catches a following colon so bot-id prefixes (already
/// handled by the token pattern) are left alone.
fn chat_id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(-100\d{6,}|\b\d{9,12}\b)(:)?").expect("valid regex"))
}

/// Mask every telegram credential that appears inside `text`.
///
/// Applied to log lines and error details before they are written anywhere
/// when `maskSensitiveData` is on.
pub fn mask_text(text: &str) -> String {
    let masked = token_pattern().replace_all(text, |caps: &regex::Captures<'_>| {
        format!("{}:***", &caps[1])
    });
    chat_id_pattern()
        .replace_all(&masked, |caps: &regex::Captures<'_>| {
            if caps.get(2).is_some() {
                // Digits followed by ':' are a bot id, not a chat id.
                caps[0].to_string()
            } else {
                mask_secret(&caps[1])
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret_keeps_prefix() {
        let masked = mask_secret("1234567890abcdefghij");
        assert_eq!(masked, "1234567890***");
    }

    #[test]
    fn test_mask_secret_short_values_fully_masked() {
        assert_eq!(mask_secret("ab"), "***");
        assert_eq!(mask_secret(""), "***");
    }

    #[test]
    fn test_mask_secret_never_keeps_more_than_half() {
        // 8 chars: keep len/2 = 4.
        assert_eq!(mask_secret("abcdefgh"), "abcd***");
    }

    #[test]
    fn test_mask_text_hides_bot_token() {
        let line = "sending via bot 123456789:AAHrz8x2kQvXfKdTLqWn3mPs9yB4cJ1eUgM chat";
        let masked = mask_text(line);
        assert!(!masked.contains("AAHrz8x2kQvXfKdTLqWn3mPs9yB4cJ1eUgM"));
        assert!(masked.contains("123456789:***"));
    }

    #[test]
    fn test_mask_text_hides_channel_id() {
        let masked = mask_text("delivering to -1001234567890 now");
        assert!(!masked.contains("-1001234567890"));
        assert!(masked.starts_with("delivering to -100123"));
    }

    #[test]
    fn test_mask_text_leaves_ordinary_text_alone() {
        let line = "check completed: 3 slots, 1 available, took 450 ms";
        assert_eq!(mask_text(line), line);
    }
}
