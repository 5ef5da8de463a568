//! Bearer-token minting for magic links, signer sessions and OTP codes
//!
//! Tokens are 32 bytes of OS randomness, hex-encoded to a fixed 64-char
//! string. OTP codes are 6 decimal digits.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::RngCore;

/// Fixed length of minted bearer tokens (hex characters)
pub const TOKEN_LEN: usize = 64;

/// Mint a cryptographically random bearer token
pub fn mint_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Mint a 6-digit one-time code
pub fn mint_otp() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:06}", code)
}

/// Expiry timestamp a number of hours from now
pub fn expiry_hours(now: DateTime<Utc>, hours: i64) -> DateTime<Utc> {
    now + Duration::hours(hours)
}

/// Expiry timestamp a number of minutes from now
pub fn expiry_minutes(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now + Duration::minutes(minutes)
}

/// Whether a nullable expiry has passed. A missing expiry counts as expired:
/// a token with no recorded lifetime is never honored.
pub fn is_expired(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(at) => now > at,
        None => true,
    }
}
