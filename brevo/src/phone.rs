//! Phone-number normalization for SMS/WHATSAPP attribute values. Brevo
//! rejects local-format numbers, so values are rewritten to an
//! international form before submission.

use crate::types::normalize_name;

pub const DEFAULT_COUNTRY_CODE: &str = "32";

/// Attributes whose values carry phone numbers.
pub fn is_phone_attribute(name: &str) -> bool {
    matches!(normalize_name(name).as_str(), "SMS" | "WHATSAPP")
}

/// Format a phone number for submission, in priority order:
/// a leading `+` is kept with the digits; `00…` is already
/// international; a number already starting with `country_code` is kept;
/// a single leading `0` is replaced by `country_code`; anything else
/// gets `country_code` prepended. Input with no digits at all is
/// returned untouched.
pub fn format_phone(raw: &str, country_code: &str) -> String {
    let trimmed = raw.trim();
    let has_plus = trimmed.starts_with('+');

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return raw.to_string();
    }

    if has_plus {
        return format!("+{digits}");
    }

    if digits.starts_with("00") {
        return digits;
    }

    if digits.len() > country_code.len() && digits.starts_with(country_code) {
        return digits;
    }

    if let Some(rest) = digits.strip_prefix('0') {
        return format!("{country_code}{rest}");
    }

    format!("{country_code}{digits}")
}
