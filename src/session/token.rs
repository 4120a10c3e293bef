//! Session token generation and optional signing.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_BYTES: usize = 32;

/// A fresh token: 256 bits from the OS generator, cookie-safe base64.
pub(crate) fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn mac(secret: &[u8], token: &str) -> Option<HmacSha256> {
    // HMAC takes keys of any length, so this only fails on a broken build.
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(token.as_bytes());
    Some(mac)
}

/// Cookie value for `token`: `<token>.<mac>`.
pub(crate) fn sign(secret: &[u8], token: &str) -> String {
    match mac(secret, token) {
        Some(mac) => {
            let tag = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
            format!("{token}.{tag}")
        }
        None => token.to_string(),
    }
}

/// Recovers the token from a signed cookie value, or `None` when the
/// signature is missing or wrong.
pub(crate) fn verify<'a>(secret: &[u8], value: &'a str) -> Option<&'a str> {
    let (token, tag) = value.rsplit_once('.')?;
    let tag = URL_SAFE_NO_PAD.decode(tag).ok()?;
    mac(secret, token)?.verify_slice(&tag).ok()?;
    Some(token)
}
