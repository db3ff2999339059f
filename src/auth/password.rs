//! Local username and password login.
//!
//! Users carry an Argon2 PHC hash in `password`. Verification runs on the
//! blocking pool; a hash costs tens of milliseconds of CPU.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::{GatewayError, GatewayResult};
use crate::model::User;
use crate::store::{StoreError, UserStore};

/// Hash a password into the PHC string stored on the user.
pub fn hash_password(password: &str) -> GatewayResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GatewayError::Unknown(format!("password hash: {}", e)))
}

/// Check `password` against a PHC hash. Unparseable hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is not a PHC string");
            return false;
        }
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Resolve `username` and check its password.
pub async fn authenticate_local(
    users: &dyn UserStore,
    username: &str,
    password: &str,
) -> GatewayResult<User> {
    if username.is_empty() || password.is_empty() {
        return Err(GatewayError::authentication("missing username or password"));
    }

    let user = match users.get_by_username(username).await {
        Ok(user) => user,
        Err(StoreError::NotFound(_)) => {
            return Err(GatewayError::authentication("unknown username"));
        }
        Err(e) => return Err(e.into()),
    };
    if user.password.is_empty() {
        return Err(GatewayError::authentication("user has no password credential"));
    }

    let hash = user.password.clone();
    let password = password.to_string();
    let matched = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| GatewayError::Unknown(format!("password check: {}", e)))?;
    if !matched {
        return Err(GatewayError::authentication("password mismatch"));
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_user(User {
            id: "u1".into(),
            username: "alice".into(),
            password: hash_password("correct horse").unwrap(),
            ..Default::default()
        });
        store.put_user(User {
            id: "u2".into(),
            username: "token-only".into(),
            ..Default::default()
        });
        store
    }

    #[test]
    fn hash_verifies_only_its_password() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("s3cret", &hash));
        assert!(!verify_password("s3cret!", &hash));
        assert!(!verify_password("s3cret", "plaintext"));
    }

    #[tokio::test]
    async fn local_login_checks_username_and_password() {
        let store = store();

        let user = authenticate_local(&store, "alice", "correct horse").await.unwrap();
        assert_eq!(user.id, "u1");

        for (username, password) in [
            ("alice", "wrong"),
            ("bob", "correct horse"),
            ("token-only", "anything"),
            ("alice", ""),
        ] {
            let err = authenticate_local(&store, username, password).await.unwrap_err();
            assert!(err.is_authentication(), "{}: {}", username, err);
        }
    }
}
