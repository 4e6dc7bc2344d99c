//! Client-side validation performed before any gateway call.
//!
//! A failed guard here never issues a request; it surfaces a synchronous
//! validation error, distinct from anything the gateway reports.

/// Maximum digits a one-time code can have.
pub const CODE_MAX_LEN: usize = 6;

/// Minimum digits a one-time code can have.
pub const CODE_MIN_LEN: usize = 5;

/// Exact length of a Telegram API hash.
pub const API_HASH_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("fill in all required fields")]
    MissingFields,
    #[error("API hash must be exactly 32 characters")]
    BadApiHash,
    #[error("phone number must be in international format, e.g. +79001234567")]
    BadPhone,
    #[error("enter the 5-6 digit code from Telegram")]
    BadCode,
    #[error("the code has expired, request a new one")]
    CodeExpired,
    #[error("enter your two-factor password")]
    EmptyPassword,
}

/// Keep only ASCII digits from typed code input, capped at [`CODE_MAX_LEN`].
///
/// Non-digit characters are stripped rather than rejected, so pasting
/// "1 2 3 4 5" or "code: 12345" still yields a usable value.
#[must_use]
pub fn sanitize_code(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_digit)
        .take(CODE_MAX_LEN)
        .collect()
}

/// International phone format: `+` followed by 10 to 15 digits.
#[must_use]
pub fn is_valid_phone(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (10..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// API hash must be exactly 32 characters.
#[must_use]
pub fn is_valid_api_hash(hash: &str) -> bool {
    hash.chars().count() == API_HASH_LEN
}
