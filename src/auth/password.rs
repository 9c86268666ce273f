//! PBKDF2-HMAC-SHA256 password hashing.
//!
//! Stored form: `pbkdf2-sha256$<iterations>$<salt hex>$<hash hex>`.

use hmac::Hmac;
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const SCHEME: &str = "pbkdf2-sha256";
const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<[u8; HASH_LEN], String> {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2::<HmacSha256>(password.as_bytes(), salt, iterations, &mut out)
        .map_err(|e| format!("PBKDF2 failed: {}", e))?;
    Ok(out)
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, String> {
    let salt: [u8; SALT_LEN] = rand::rng().random();
    let hash = derive(password, &salt, ITERATIONS)?;
    Ok(format!(
        "{}${}${}${}",
        SCHEME,
        ITERATIONS,
        hex::encode(salt),
        hex::encode(hash)
    ))
}

/// Check a password against a stored hash. Malformed hashes never match.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(expected), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };

    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(expected)) else {
        return false;
    };

    match derive(password, &salt, iterations) {
        Ok(actual) => bool::from(actual.as_slice().ct_eq(expected.as_slice())),
        Err(_) => false,
    }
}
