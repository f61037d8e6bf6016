// 🧹 Normalizer - dealer names, states, statuses, numbers
//
// One authoritative name normalization, used by matching AND by registry
// validation. All functions here are pure and total.

use crate::model::{ApplicationStatus, FinancingType};

/// Corporate/noise tokens removed wherever they appear as whole words
pub const NAME_SUFFIXES: [&str; 10] = [
    "llc", "inc", "co", "company", "corp", "corporation", "ltd", "the", "auto", "group",
];

/// Normalize a dealer name into a comparable key
///
/// - Lowercase (Unicode-aware; accented letters are kept)
/// - `&` → "and", `@` → "at"
/// - Punctuation → whitespace
/// - Drop corporate suffix tokens (LLC, INC, CORP, GROUP, AUTO, THE, ...),
///   unless nothing else is left
/// - Collapse whitespace
///
/// Example: "ABC Motors, LLC." → "abc motors"
pub fn normalize_name(s: &str) -> String {
    let mut expanded = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => expanded.push_str(" and "),
            '@' => expanded.push_str(" at "),
            c if c.is_alphanumeric() => {
                // Some capitals lowercase to a letter plus a combining mark
                expanded.extend(c.to_lowercase().filter(|l| l.is_alphanumeric()));
            }
            _ => expanded.push(' '),
        }
    }

    let tokens: Vec<&str> = expanded.split_whitespace().collect();
    let kept: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|token| !NAME_SUFFIXES.contains(token))
        .collect();

    // A name made only of suffix words keeps them all
    if kept.is_empty() {
        tokens.join(" ")
    } else {
        kept.join(" ")
    }
}

/// Normalize a state code: trim + uppercase
pub fn normalize_state(s: &str) -> String {
    s.trim().to_uppercase()
}

/// Map free-text application status to a bucket
///
/// Checked in order, first hit wins: fund, approve/booked, counter, pend,
/// denied/decline/reject/turn/ntp.
pub fn normalize_status(s: &str) -> ApplicationStatus {
    let t = s.trim().to_lowercase();
    if t.is_empty() {
        return ApplicationStatus::Other;
    }

    if t.contains("fund") {
        ApplicationStatus::Funded
    } else if t.contains("approve") || t.contains("booked") {
        ApplicationStatus::Approved
    } else if t.contains("counter") {
        ApplicationStatus::Counter
    } else if t.contains("pend") {
        ApplicationStatus::Pending
    } else if ["denied", "decline", "reject", "turn", "ntp"]
        .iter()
        .any(|needle| t.contains(needle))
    {
        ApplicationStatus::Denial
    } else {
        ApplicationStatus::Other
    }
}

/// Blank or unrecognised values default to Independent
pub fn normalize_financing_type(s: &str) -> FinancingType {
    if s.to_lowercase().contains("franch") {
        FinancingType::Franchise
    } else {
        FinancingType::Independent
    }
}

/// Parse spreadsheet numbers like "$15,390.00" or "10%"
///
/// Returns None for empty, unparsable or non-finite input.
pub fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Normalize a lender fee to a fraction of the loan
///
/// - "2.5%" → 0.025
/// - 0.025 → 0.025 (already a fraction)
/// - 375 with loan 15000 → 0.025 (dollar fee)
pub fn normalize_fee_pct(raw: &str, loan_amount: Option<f64>) -> Option<f64> {
    let value = parse_number(raw)?;

    if raw.contains('%') {
        return Some(value / 100.0);
    }
    if value <= 1.0 {
        return Some(value);
    }
    match loan_amount {
        Some(amount) if amount > 0.0 => Some(value / amount),
        _ => None,
    }
}
