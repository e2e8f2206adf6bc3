//! Random channel codes and ban codes.

use rand::Rng;

const CODE_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

pub const CHANNEL_CODE_LEN: usize = 5;
pub const BAN_CODE_LEN: usize = 16;

/// A random lower-case alphanumeric string of `len` characters.
pub fn generate(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char)
        .collect()
}

pub fn channel_code() -> String {
    generate(CHANNEL_CODE_LEN)
}

pub fn ban_code() -> String {
    generate(BAN_CODE_LEN)
}

/// Codes are stored and compared lower-cased.
pub fn normalize(code: &str) -> String {
    code.trim().to_lowercase()
}

pub fn is_valid_channel_code(code: &str) -> bool {
    (1..=CHANNEL_CODE_LEN).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric())
}

pub fn is_ban_code(code: &str) -> bool {
    code.len() == BAN_CODE_LEN && code.chars().all(|c| c.is_ascii_alphanumeric())
}
