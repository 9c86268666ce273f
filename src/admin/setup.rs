use chrono::Utc;
use rand::Rng;

use crate::auth::password;
use crate::db::DbPool;
use crate::presence::Role;

/// Username of the account created on first boot.
pub const BOOTSTRAP_ADMIN: &str = "admin";

/// Generate a random 12-byte password, hex-encoded (24 chars).
pub fn generate_bootstrap_password() -> String {
    let bytes: [u8; 12] = rand::rng().random();
    hex::encode(bytes)
}

/// Ensure at least one Admin account exists.
/// On a store with no Admin, create `admin` with a random password and
/// return the plaintext so it can be shown once. Returns `None` otherwise.
pub fn maybe_create_bootstrap_admin(db: &DbPool) -> Result<Option<String>, Box<dyn std::error::Error>> {
    let conn = db.lock().map_err(|e| format!("DB lock error: {}", e))?;

    let admin_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE role = ?1",
        [Role::ADMIN],
        |row| row.get(0),
    )?;
    if admin_count > 0 {
        return Ok(None);
    }

    let name_taken: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
        [BOOTSTRAP_ADMIN],
        |row| row.get(0),
    )?;
    if name_taken {
        tracing::warn!(
            "No Admin account exists and username '{}' is taken by a customer; skipping bootstrap",
            BOOTSTRAP_ADMIN
        );
        return Ok(None);
    }

    let plain = generate_bootstrap_password();
    let hash = password::hash_password(&plain)?;
    conn.execute(
        "INSERT INTO users (username, password_hash, role, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![BOOTSTRAP_ADMIN, hash, Role::ADMIN, Utc::now().to_rfc3339()],
    )?;

    Ok(Some(plain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn test_bootstrap_admin_created_once() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::init_db(tmp.path().to_str().unwrap()).unwrap();

        let first = maybe_create_bootstrap_admin(&pool).unwrap();
        let plain = first.expect("fresh store gets an admin");
        assert_eq!(plain.len(), 24);

        assert!(maybe_create_bootstrap_admin(&pool).unwrap().is_none());

        let conn = pool.lock().unwrap();
        let (role, hash): (String, String) = conn
            .query_row(
                "SELECT role, password_hash FROM users WHERE username = 'admin'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(role, "Admin");
        assert!(password::verify_password(&plain, &hash));
    }
}
