//! Human-readable tracking codes: `<BRANCH>-<YYMMDD>-<SECONDS36>-<R>`.

use chrono::{DateTime, Timelike, Utc};
use rand::Rng;

const DEFAULT_BRANCH: &str = "BR001";
const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Branch prefix taken from the first word of the pickup address.
pub fn branch_code(pickup_address: &str) -> String {
    let branch: String = pickup_address
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if branch.is_empty() {
        DEFAULT_BRANCH.to_string()
    } else {
        branch
    }
}

pub fn generate(branch: &str, now: DateTime<Utc>) -> String {
    let date = now.format("%y%m%d");
    let seconds = to_base36(now.num_seconds_from_midnight());
    let random = BASE36[rand::thread_rng().gen_range(0..BASE36.len())] as char;

    format!("{branch}-{date}-{seconds}-{random}")
}

fn to_base36(mut value: u32) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}
