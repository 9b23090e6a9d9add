//! Encrypted secret storage using SQLite.
//!
//! Stores feed secrets keyed by (service, username). Every secret is
//! encrypted at rest with AES-256-GCM under the machine-fingerprint key.

use super::encryption::{Sealed, SecretCipher, KEY_SIZE};
use super::Fingerprint;
use crate::keyring::{KeyringBackend, KeyringError};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const STORE_FILE_NAME: &str = "artifacts_keyring.db";

// Canary row checked on unlock
const CANARY_SERVICE: &str = "keyring-setting";
const CANARY_USERNAME: &str = "password reference";
const CANARY_VALUE: &str = "password reference value";

/// Default location: `<data_local_dir>/artifacts-keyring/artifacts_keyring.db`.
pub fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("artifacts-keyring")
        .join(STORE_FILE_NAME)
}

/// Encrypted secret storage backed by one SQLite file.
///
/// # Schema
/// ```sql
/// CREATE TABLE secrets (
///     id INTEGER PRIMARY KEY,
///     service TEXT NOT NULL,
///     username TEXT NOT NULL,
///     secret TEXT NOT NULL,       -- Encrypted
///     nonce TEXT NOT NULL,        -- Nonce for secret
///     created_at TEXT NOT NULL,   -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL,   -- ISO 8601 timestamp
///     UNIQUE(service, username)
/// );
/// ```
///
/// # Unlock
/// The file is opened lazily on first use. A canary row must decrypt to a
/// known sentinel; if it does not, the key no longer matches the file (the
/// fingerprint drifted) and the file is deleted and recreated empty. Callers
/// then see an empty, usable store rather than an error.
///
/// # Thread Safety
/// The connection lives behind a `Mutex`, and unlocking happens while that
/// lock is held, so two threads can never both reset the file.
pub struct EncryptedFileStore {
    path: PathBuf,
    cipher: SecretCipher,
    conn: Mutex<Option<Connection>>,
}

impl EncryptedFileStore {
    /// Store at `path` keyed by this machine's fingerprint.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let fingerprint = Fingerprint::collect();
        tracing::debug!(key_id = %fingerprint.key_id(), "Derived store key from machine fingerprint");
        Self::with_key(path, fingerprint.derive_key())
    }

    /// Store at `path` with an explicit key.
    pub fn with_key<P: AsRef<Path>>(path: P, key: [u8; KEY_SIZE]) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cipher: SecretCipher::new(&key),
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stores a secret, replacing any previous value (upsert).
    pub fn store(&self, service: &str, username: &str, secret: &str) -> Result<()> {
        let guard = self.unlocked()?;
        let conn = guard.as_ref().context("Store is not open")?;
        self.write_secret(conn, service, username, secret)
    }

    /// Retrieves a secret.
    ///
    /// # Returns
    /// * `Ok(Some(secret))` - Secret found and decrypted
    /// * `Ok(None)` - Nothing stored
    /// * `Err` - If decryption or the database operation fails
    pub fn get(&self, service: &str, username: &str) -> Result<Option<String>> {
        let guard = self.unlocked()?;
        let conn = guard.as_ref().context("Store is not open")?;
        self.read_secret(conn, service, username)
    }

    /// Deletes a secret.
    ///
    /// # Returns
    /// * `Ok(true)` - Secret deleted
    /// * `Ok(false)` - Nothing stored
    pub fn delete(&self, service: &str, username: &str) -> Result<bool> {
        let guard = self.unlocked()?;
        let conn = guard.as_ref().context("Store is not open")?;
        let rows_affected = conn
            .execute(
                "DELETE FROM secrets WHERE service = ?1 AND username = ?2",
                params![service, username],
            )
            .context("Failed to delete secret")?;
        Ok(rows_affected > 0)
    }

    /// Lists all (service, username) pairs, canary excluded.
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let guard = self.unlocked()?;
        let conn = guard.as_ref().context("Store is not open")?;
        let mut stmt = conn
            .prepare(
                "SELECT service, username FROM secrets WHERE service != ?1 ORDER BY service, username",
            )
            .context("Failed to prepare query")?;

        let pairs = stmt
            .query_map(params![CANARY_SERVICE], |row| Ok((row.get(0)?, row.get(1)?)))
            .context("Failed to execute query")?
            .collect::<Result<Vec<(String, String)>, _>>()
            .context("Failed to read results")?;

        Ok(pairs)
    }

    /// Lock the connection, opening and verifying the file on first use.
    fn unlocked(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        let mut guard = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            *guard = Some(self.unlock()?);
        }
        Ok(guard)
    }

    fn unlock(&self) -> Result<Connection> {
        let conn = self.open()?;

        match self.read_secret(&conn, CANARY_SERVICE, CANARY_USERNAME) {
            Ok(Some(value)) if value == CANARY_VALUE => Ok(conn),
            Ok(None) if Self::count_rows(&conn)? == 0 => {
                tracing::debug!(path = %self.path.display(), "Initializing new encrypted store");
                self.write_secret(&conn, CANARY_SERVICE, CANARY_USERNAME, CANARY_VALUE)?;
                Ok(conn)
            }
            outcome => {
                let reason = match outcome {
                    Err(e) => format!("{:#}", e),
                    Ok(Some(_)) => "canary value mismatch".to_string(),
                    Ok(None) => "canary missing".to_string(),
                };
                tracing::warn!(
                    path = %self.path.display(),
                    reason = %reason,
                    "Store key does not match (machine fingerprint changed?), reinitializing store"
                );
                drop(conn);
                self.reset()
            }
        }
    }

    fn reset(&self) -> Result<Connection> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to remove store file {}", self.path.display())
                })
            }
        }
        let conn = self.open()?;
        self.write_secret(&conn, CANARY_SERVICE, CANARY_USERNAME, CANARY_VALUE)?;
        Ok(conn)
    }

    fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let conn = Connection::open(&self.path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS secrets (
                id INTEGER PRIMARY KEY,
                service TEXT NOT NULL,
                username TEXT NOT NULL,
                secret TEXT NOT NULL,
                nonce TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(service, username)
            )
            "#,
            [],
        )
        .context("Failed to create secrets table")?;

        Ok(conn)
    }

    fn count_rows(conn: &Connection) -> Result<i64> {
        conn.query_row("SELECT COUNT(*) FROM secrets", [], |row| row.get(0))
            .context("Failed to count secrets")
    }

    fn write_secret(&self, conn: &Connection, service: &str, username: &str, secret: &str) -> Result<()> {
        let sealed = self
            .cipher
            .seal(service, username, secret)
            .context("Failed to encrypt secret")?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            r#"
            INSERT INTO secrets (service, username, secret, nonce, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(service, username) DO UPDATE SET
                secret = excluded.secret,
                nonce = excluded.nonce,
                updated_at = excluded.updated_at
            "#,
            params![service, username, sealed.ciphertext, sealed.nonce, now, now],
        )
        .context("Failed to store secret")?;

        Ok(())
    }

    fn read_secret(&self, conn: &Connection, service: &str, username: &str) -> Result<Option<String>> {
        let sealed: Option<Sealed> = conn
            .query_row(
                "SELECT secret, nonce FROM secrets WHERE service = ?1 AND username = ?2",
                params![service, username],
                |row| {
                    Ok(Sealed {
                        ciphertext: row.get(0)?,
                        nonce: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to query secret")?;

        sealed
            .map(|sealed| {
                self.cipher
                    .open(service, username, &sealed)
                    .context("Failed to decrypt secret")
            })
            .transpose()
    }
}

impl KeyringBackend for EncryptedFileStore {
    fn priority(&self) -> f64 {
        3.0
    }

    fn get_password(&self, service: &str, username: &str) -> Result<Option<String>, KeyringError> {
        Ok(self.get(service, username)?)
    }

    fn set_password(&self, service: &str, username: &str, password: &str) -> Result<(), KeyringError> {
        Ok(self.store(service, username, password)?)
    }

    fn delete_password(&self, service: &str, username: &str) -> Result<(), KeyringError> {
        // Deleting something that is not there is not an error for the host
        self.delete(service, username)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = "https://pkgs.dev.azure.com/org/project/_packaging/feed/pypi/upload";

    fn create_test_store(dir: &tempfile::TempDir, key: u8) -> EncryptedFileStore {
        EncryptedFileStore::with_key(dir.path().join("keyring.db"), [key; 32])
    }

    #[test]
    fn test_store_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_test_store(&dir, 0);

        store.store(SERVICE, "username1", "password1").unwrap();

        assert_eq!(store.get(SERVICE, "username1").unwrap().as_deref(), Some("password1"));
        assert!(store.get(SERVICE, "username2").unwrap().is_none());
    }

    #[test]
    fn test_update_replaces_secret() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_test_store(&dir, 0);

        store.store(SERVICE, "username1", "old").unwrap();
        store.store(SERVICE, "username1", "new").unwrap();

        assert_eq!(store.get(SERVICE, "username1").unwrap().as_deref(), Some("new"));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_test_store(&dir, 0);

        store.store(SERVICE, "username1", "password1").unwrap();
        assert!(store.delete(SERVICE, "username1").unwrap());
        assert!(store.get(SERVICE, "username1").unwrap().is_none());

        // Deleting again should return false
        assert!(!store.delete(SERVICE, "username1").unwrap());
        // ...and is not an error through the keyring interface
        assert!(store.delete_password(SERVICE, "username1").is_ok());
    }

    #[test]
    fn test_secrets_survive_reopen_with_same_key() {
        let dir = tempfile::tempdir().unwrap();
        create_test_store(&dir, 7).store(SERVICE, "u", "p").unwrap();

        let reopened = create_test_store(&dir, 7);
        assert_eq!(reopened.get(SERVICE, "u").unwrap().as_deref(), Some("p"));
    }

    #[test]
    fn test_key_change_resets_store() {
        let dir = tempfile::tempdir().unwrap();
        let original = create_test_store(&dir, 1);
        original.store(SERVICE, "u", "p").unwrap();
        drop(original);

        // Different fingerprint: the canary no longer decrypts
        let drifted = create_test_store(&dir, 2);
        assert!(drifted.get(SERVICE, "u").unwrap().is_none());
        assert!(drifted.list().unwrap().is_empty());

        // The reset store is immediately usable
        drifted.store(SERVICE, "u", "p2").unwrap();
        assert_eq!(drifted.get(SERVICE, "u").unwrap().as_deref(), Some("p2"));
    }

    #[test]
    fn test_rows_without_canary_reset_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyring.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE secrets (id INTEGER PRIMARY KEY, service TEXT NOT NULL, username TEXT NOT NULL,
                 secret TEXT NOT NULL, nonce TEXT NOT NULL, created_at TEXT NOT NULL, updated_at TEXT NOT NULL,
                 UNIQUE(service, username));
                 INSERT INTO secrets (service, username, secret, nonce, created_at, updated_at)
                 VALUES ('svc', 'user', 'garbage', 'garbage', 'now', 'now');",
            )
            .unwrap();
        }

        let store = EncryptedFileStore::with_key(&path, [0u8; 32]);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_excludes_canary() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_test_store(&dir, 0);

        store.store(SERVICE, "username1", "password1").unwrap();
        store.store(SERVICE, "username2", "password2").unwrap();

        let pairs = store.list().unwrap();
        assert_eq!(
            pairs,
            vec![
                (SERVICE.to_string(), "username1".to_string()),
                (SERVICE.to_string(), "username2".to_string()),
            ]
        );
    }

    #[test]
    fn test_secret_not_stored_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = create_test_store(&dir, 0);
        store.store(SERVICE, "u", "very-secret-token").unwrap();
        drop(store);

        let raw = std::fs::read(dir.path().join("keyring.db")).unwrap();
        let needle = b"very-secret-token";
        assert!(!raw.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_concurrent_first_access() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(create_test_store(&dir, 3));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || store.store(SERVICE, &format!("user{}", i), "p").unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.list().unwrap().len(), 8);
    }
}
