//! Tanzanian MSISDN normalisation.
//!
//! Accepted inputs: `0712345678`, `+255 712 345 678`, `255712345678` and the
//! bare subscriber number `712345678`. All of them normalise to `255712345678`.

use regex::Regex;
use std::sync::OnceLock;

pub const DEFAULT_COUNTRY_PREFIX: &str = "255";

fn subscriber_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^\d{9}$").ok())
        .as_ref()
}

/// Strip every non-digit, turn a leading trunk `0` into the country prefix and
/// prepend the prefix when it is absent.
pub fn normalize_phone(raw: &str, country_prefix: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if let Some(rest) = digits.strip_prefix('0') {
        return format!("{}{}", country_prefix, rest);
    }
    if digits.starts_with(country_prefix) {
        return digits;
    }
    format!("{}{}", country_prefix, digits)
}

/// Exactly the country prefix followed by nine subscriber digits.
pub fn is_valid_normalized(phone: &str, country_prefix: &str) -> bool {
    phone
        .strip_prefix(country_prefix)
        .is_some_and(|rest| subscriber_pattern().is_some_and(|re| re.is_match(rest)))
}

/// Normalise and validate in one step.
pub fn normalize_and_validate(raw: &str, country_prefix: &str) -> Option<String> {
    let phone = normalize_phone(raw, country_prefix);
    is_valid_normalized(&phone, country_prefix).then_some(phone)
}
