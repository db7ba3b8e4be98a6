//! API token CRUD operations

use anyhow::{Context, Result, bail};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::database::Database;
use super::models::TokenInfo;

const ALLOWED_EXPIRY_DAYS: [u32; 6] = [1, 7, 30, 90, 180, 365];

impl Database {
    /// Create a new API token for the given user.
    /// Returns (plaintext_token, TokenInfo); the plaintext is shown once.
    pub fn create_token(
        &self,
        user_sub: &str,
        name: &str,
        description: &str,
        expires_days: u32,
    ) -> Result<(String, TokenInfo)> {
        if !ALLOWED_EXPIRY_DAYS.contains(&expires_days) {
            bail!("Token expiry must be one of {:?} days", ALLOWED_EXPIRY_DAYS);
        }

        let plaintext = new_token_secret();
        let token_hash = digest(&plaintext);
        let token_prefix = plaintext[..11].to_string(); // "gt_" + 8 hex chars
        let now = chrono::Utc::now();
        let created_at = now.to_rfc3339();
        let expires_at = now
            .checked_add_signed(chrono::Duration::days(i64::from(expires_days)))
            .unwrap_or(now)
            .to_rfc3339();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO api_tokens (user_sub, name, description, token_hash, token_prefix, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![user_sub, name, description, token_hash, &token_prefix, created_at, expires_at],
        )
        .context("Failed to insert API token")?;

        let id = conn.last_insert_rowid();

        debug!(token_id = id, user_sub = %user_sub, name = %name, expires_days, "API token created");

        Ok((
            plaintext,
            TokenInfo {
                id,
                name: name.to_string(),
                description: description.to_string(),
                token_prefix,
                created_at,
                expires_at,
                last_used_at: None,
            },
        ))
    }

    /// List all tokens for the given user (hashes are not included)
    pub fn list_tokens(&self, user_sub: &str) -> Result<Vec<TokenInfo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, name, description, token_prefix, created_at, expires_at, last_used_at \
                 FROM api_tokens WHERE user_sub = ?1 ORDER BY created_at DESC",
            )
            .context("Failed to prepare list_tokens query")?;

        let tokens = stmt
            .query_map([user_sub], |row| {
                Ok(TokenInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    token_prefix: row.get(3)?,
                    created_at: row.get(4)?,
                    expires_at: row.get(5)?,
                    last_used_at: row.get(6)?,
                })
            })
            .context("Failed to execute list_tokens query")?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to collect token rows")?;

        Ok(tokens)
    }

    /// Delete a token by ID, only if it belongs to the given user.
    /// Returns true if a row was deleted.
    pub fn delete_token(&self, user_sub: &str, token_id: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn
            .execute(
                "DELETE FROM api_tokens WHERE id = ?1 AND user_sub = ?2",
                rusqlite::params![token_id, user_sub],
            )
            .context("Failed to delete API token")?;

        if rows > 0 {
            debug!(token_id, user_sub = %user_sub, "API token deleted");
        }

        Ok(rows > 0)
    }

    /// Validate a plaintext token. Returns the user_sub if valid and not
    /// expired, and updates last_used_at.
    pub fn validate_token(&self, plaintext: &str) -> Result<Option<String>> {
        let token_hash = digest(plaintext);

        let conn = self.conn.lock().unwrap();
        let result: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT id, user_sub, expires_at FROM api_tokens WHERE token_hash = ?1",
                [&token_hash],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok();

        let Some((id, user_sub, expires_at)) = result else {
            return Ok(None);
        };

        if let Ok(exp) = chrono::DateTime::parse_from_rfc3339(&expires_at)
            && chrono::Utc::now() >= exp
        {
            debug!(token_id = id, "API token expired");
            return Ok(None);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "UPDATE api_tokens SET last_used_at = ?1 WHERE id = ?2",
            rusqlite::params![now, id],
        );
        debug!(token_id = id, user_sub = %user_sub, "API token validated");
        Ok(Some(user_sub))
    }
}

/// Random API token: "gt_" prefix + 32 random bytes as hex (67 chars total)
fn new_token_secret() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    format!("gt_{}", hex::encode(bytes))
}

/// SHA-256 of a token as a hex string
fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_secret_format() {
        let token = new_token_secret();
        assert!(token.starts_with("gt_"));
        assert_eq!(token.len(), 67); // "gt_" (3) + 64 hex chars
    }

    #[test]
    fn test_digest_deterministic() {
        assert_eq!(digest("gt_abc123"), digest("gt_abc123"));
        assert_ne!(digest("gt_abc123"), digest("gt_def456"));
    }

    #[test]
    fn test_create_and_list_tokens() {
        let db = Database::new(":memory:").expect("Failed to create database");

        let (plaintext, info) = db
            .create_token("alice", "ci-token", "", 30)
            .expect("Failed to create token");

        assert!(plaintext.starts_with("gt_"));
        assert_eq!(info.name, "ci-token");
        assert!(plaintext.starts_with(&info.token_prefix));
        assert!(!info.expires_at.is_empty());

        let tokens = db.list_tokens("alice").expect("Failed to list tokens");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].name, "ci-token");
    }

    #[test]
    fn test_invalid_expiry_rejected() {
        let db = Database::new(":memory:").expect("Failed to create database");
        assert!(db.create_token("alice", "ci-token", "", 13).is_err());
    }

    #[test]
    fn test_validate_token() {
        let db = Database::new(":memory:").expect("Failed to create database");

        let (plaintext, _) = db
            .create_token("alice", "ci-token", "scanner upload", 365)
            .expect("Failed to create token");

        let result = db.validate_token(&plaintext).expect("Failed to validate");
        assert_eq!(result, Some("alice".to_string()));

        let result = db.validate_token("gt_invalidtoken").expect("Failed to validate");
        assert_eq!(result, None);

        let tokens = db.list_tokens("alice").unwrap();
        assert!(tokens[0].last_used_at.is_some());
    }

    #[test]
    fn test_delete_token_wrong_user() {
        let db = Database::new(":memory:").expect("Failed to create database");

        let (_, info) = db
            .create_token("alice", "ci-token", "", 7)
            .expect("Failed to create token");

        assert!(!db.delete_token("bob", info.id).unwrap());
        assert!(db.delete_token("alice", info.id).unwrap());
        assert!(db.list_tokens("alice").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_token_name_fails() {
        let db = Database::new(":memory:").expect("Failed to create database");

        db.create_token("alice", "ci-token", "", 30).unwrap();
        assert!(db.create_token("alice", "ci-token", "", 90).is_err());
        // Same name for a different user is fine
        assert!(db.create_token("bob", "ci-token", "", 30).is_ok());
    }
}
