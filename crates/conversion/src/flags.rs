//! Fixed-width flag strings of the target archive.
//!
//! Both `controlinfo` and `useinfo` are 16 characters. The first five
//! characters of `useinfo` carry the legacy KDVH flag code; the tail
//! encodes delay information and confidence.

/// Tail appended to a legacy code when the observation delay was not
/// considered.
pub const DELAY_NOT_CONSIDERED: &str = "00900000000";

/// Tail appended to a legacy code when the observation arrived in time.
pub const DELAY_IN_TIME: &str = "00000000000";

/// `useinfo` for rows whose legacy flags cannot be trusted.
pub const INVALID: &str = "9999900900000000";

/// `useinfo` for rows that completed manual quality control.
pub const COMPLETED_HQC: &str = "4000000900000000";

/// `controlinfo` for an ordinary present value.
pub const EMPTY: &str = "0000000000000000";

/// `controlinfo` when the expected value is missing.
pub const EXPECTED_VALUE_MISSING: &str = "0000003000000000";

/// `controlinfo` when the value was removed by quality control.
pub const VALUE_REMOVED_BY_QC: &str = "0000002000000000";

/// Value stored for a missing observation.
pub const MISSING_SENTINEL: f64 = -32767.0;

/// Value stored for an observation removed by quality control.
pub const REMOVED_SENTINEL: f64 = -32766.0;

/// Length of both target flag strings.
pub const FLAG_WIDTH: usize = 16;

/// Length of a legacy KDVH flag code.
pub const LEGACY_FLAG_WIDTH: usize = 5;

/// True when `flags` is a usable five character legacy code.
pub fn flags_are_valid(flags: &str) -> bool {
    flags.len() == LEGACY_FLAG_WIDTH && is_real(flags)
}

/// Decimal literal check: optional leading `-`, digits, at most one `.`.
pub fn is_real(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() {
        return false;
    }

    let mut seen_point = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => {}
            '.' if !seen_point && digits.len() > 1 => seen_point = true,
            _ => return false,
        }
    }
    true
}

/// `useinfo` built from a legacy code and a tail, or [`INVALID`].
pub fn use_flags_for(flags: &str, tail: &str) -> String {
    if flags_are_valid(flags) {
        format!("{}{}", flags, tail)
    } else {
        INVALID.to_string()
    }
}
