//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

/// Check whether an email address is plausibly deliverable
///
/// Entry points respond with a generic success either way; this check
/// only decides whether to bother the token store and the mailer.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 254 {
        return false;
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    regex.is_match(email)
}

/// Lowercase and trim an email for use as an identity key
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
