//! Secret and token generation for the passwordless login flow
//!
//! All randomness comes from the operating system CSPRNG. A failure to
//! obtain randomness is propagated, never papered over with a weaker
//! source.

use anyhow::{Context, Result};
use rand::RngCore;
use rand::rngs::OsRng;

/// Code alphabet: no 0/O/1/I to avoid transcription mistakes. 32 symbols,
/// so indexing with `byte % 32` introduces no modulo bias.
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a cryptographically random 32-byte hex string (magic link token).
pub fn generate_token() -> Result<String> {
    let mut b = [0u8; 32];
    OsRng.try_fill_bytes(&mut b).context("generate token")?;
    Ok(hex::encode(b))
}

/// Generate a 6-character human-entry code formatted as XXX-XXX.
pub fn generate_code() -> Result<String> {
    let mut b = [0u8; 6];
    OsRng.try_fill_bytes(&mut b).context("generate code")?;

    let mut code = String::with_capacity(7);
    for (i, &x) in b.iter().enumerate() {
        if i == 3 {
            code.push('-');
        }
        code.push(CODE_CHARSET[(x as usize) % CODE_CHARSET.len()] as char);
    }
    Ok(code)
}

/// Generate a 16-byte hex string for session identification.
pub fn generate_session_id() -> Result<String> {
    let mut b = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut b)
        .context("generate session id")?;
    Ok(hex::encode(b))
}

/// Remove dashes and uppercase, so entry variants compare equal.
pub fn normalize_code(code: &str) -> String {
    code.replace('-', "").to_uppercase()
}

/// Constant-time string comparison for verifying secrets.
///
/// Returns false for differing lengths without leaking where the first
/// mismatch occurs.
pub fn timing_safe_eq(a: &str, b: &str) -> bool {
    constant_time_eq::constant_time_eq(a.as_bytes(), b.as_bytes())
}
