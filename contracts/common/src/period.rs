//! Reporting period keys.
//!
//! A period is encoded as `year * 100 + month`, so keys sort chronologically
//! and December rolls over to January of the following year.

pub const MIN_YEAR: u32 = 2000;
pub const MAX_YEAR: u32 = 9999;

pub fn year(period: u32) -> u32 {
    period / 100
}

pub fn month(period: u32) -> u32 {
    period % 100
}

pub fn is_valid(period: u32) -> bool {
    let m = month(period);
    let y = year(period);
    (1..=12).contains(&m) && (MIN_YEAR..=MAX_YEAR).contains(&y)
}

/// Period immediately after `period`. Callers validate the key first.
pub fn next(period: u32) -> u32 {
    if month(period) == 12 {
        (year(period) + 1) * 100 + 1
    } else {
        period + 1
    }
}
