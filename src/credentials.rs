use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

const KEYRING_SERVICE: &str = "replywright";

pub const SMTP_SENDER: &str = "SMTP_SENDER";
pub const SMTP_PASSWORD: &str = "SMTP_PASSWORD";
pub const SMTP_HOST: &str = "SMTP_HOST";
pub const SMTP_PORT: &str = "SMTP_PORT";

/// Every key the tool knows how to look up
pub const KNOWN_KEYS: &[&str] = &[
    "OPENAI_API_KEY",
    "GROQ_API_KEY",
    SMTP_SENDER,
    SMTP_PASSWORD,
    SMTP_HOST,
    SMTP_PORT,
];

/// Debug information about credential storage backends
#[derive(Debug, Clone)]
pub struct CredentialDebugInfo {
    pub keyring_available: bool,
    pub secrets_file: PathBuf,
    pub secrets_file_exists: bool,
    pub env_keys_set: Vec<&'static str>,
}

impl std::fmt::Display for CredentialDebugInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Credential Storage Status:")?;
        writeln!(f, "  Secrets file: {}", self.secrets_file.display())?;
        writeln!(f, "  Secrets file exists: {}", self.secrets_file_exists)?;
        writeln!(
            f,
            "  Keyring: {}",
            if self.keyring_available {
                "available"
            } else {
                "unavailable"
            }
        )?;
        if self.env_keys_set.is_empty() {
            writeln!(f, "  Environment: no known keys set")?;
        } else {
            writeln!(f, "  Environment: {}", self.env_keys_set.join(", "))?;
        }
        Ok(())
    }
}

/// Key-value secret lookup: secrets file, then OS keyring, then environment
pub struct CredentialStore {
    secrets_file: PathBuf,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        let secrets_file = crate::config::Config::config_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("secrets.toml");
        Self { secrets_file }
    }

    pub fn with_secrets_file(path: impl Into<PathBuf>) -> Self {
        Self {
            secrets_file: path.into(),
        }
    }

    /// Get diagnostic info about credential storage backends
    pub fn debug_info(&self) -> CredentialDebugInfo {
        let keyring_available =
            if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, "__probe__") {
                entry.set_password("__test__").is_ok()
                    && entry.get_password().is_ok()
                    && entry.delete_credential().is_ok()
            } else {
                false
            };

        CredentialDebugInfo {
            keyring_available,
            secrets_file: self.secrets_file.clone(),
            secrets_file_exists: self.secrets_file.exists(),
            env_keys_set: KNOWN_KEYS
                .iter()
                .copied()
                .filter(|key| Self::env_get(key).is_some())
                .collect(),
        }
    }

    /// Look a key up in each backend in turn
    pub fn get(&self, key: &str) -> Option<String> {
        // 1. Secrets file
        if let Some(value) = self.file_get(key) {
            return Some(value);
        }

        // 2. Keyring
        if let Some(value) = self.keyring_get(key) {
            return Some(value);
        }

        // 3. Environment variable of the same name
        Self::env_get(key)
    }

    /// Like `get`, but a missing key is an error naming where to put it
    pub fn require(&self, key: &str) -> Result<String> {
        self.get(key).with_context(|| {
            format!(
                "{} not found. Add it to {}, run 'replywright setup', or set the {} environment variable.",
                key,
                self.secrets_file.display(),
                key
            )
        })
    }

    /// Store a secret in the keyring, falling back to the secrets file
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.keyring_set(key, value) && self.keyring_get(key).as_deref() == Some(value) {
            return Ok(());
        }

        eprintln!("Note: Keyring unavailable, using file-based storage.");
        self.file_set(key, value)
    }

    fn env_get(key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    fn keyring_get(&self, key: &str) -> Option<String> {
        let entry = keyring::Entry::new(KEYRING_SERVICE, key).ok()?;
        entry.get_password().ok()
    }

    fn keyring_set(&self, key: &str, value: &str) -> bool {
        if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, key) {
            entry.set_password(value).is_ok()
        } else {
            false
        }
    }

    fn read_secrets(&self) -> BTreeMap<String, toml::Value> {
        let Ok(content) = fs::read_to_string(&self.secrets_file) else {
            return BTreeMap::new();
        };
        match toml::from_str(&content) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(
                    "Ignoring unparseable secrets file {}: {}",
                    self.secrets_file.display(),
                    e
                );
                BTreeMap::new()
            }
        }
    }

    fn file_get(&self, key: &str) -> Option<String> {
        let value = match self.read_secrets().remove(key)? {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            other => other.to_string(),
        };
        let value = value.trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    /// Write a key into the secrets file (with restricted permissions)
    fn file_set(&self, key: &str, value: &str) -> Result<()> {
        if let Some(parent) = self.secrets_file.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut secrets = self.read_secrets();
        secrets.insert(key.to_string(), toml::Value::String(value.to_string()));
        let content = toml::to_string(&secrets).context("Failed to serialize secrets")?;

        // Create file with restricted permissions atomically to avoid TOCTOU
        #[cfg(unix)]
        {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.secrets_file)
                .with_context(|| {
                    format!("Failed to open {}", self.secrets_file.display())
                })?;
            file.write_all(content.as_bytes())?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&self.secrets_file, content)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to prevent parallel test interference with env vars
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn set_env(key: &str, value: &str) {
        // SAFETY: env-touching tests hold ENV_MUTEX
        unsafe { env::set_var(key, value) };
    }

    fn remove_env(key: &str) {
        // SAFETY: env-touching tests hold ENV_MUTEX
        unsafe { env::remove_var(key) };
    }

    #[test]
    fn test_env_fallback() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_secrets_file(dir.path().join("secrets.toml"));

        set_env("REPLYWRIGHT_TEST_ENV_ONLY", "from-env");
        assert_eq!(
            store.get("REPLYWRIGHT_TEST_ENV_ONLY"),
            Some("from-env".to_string())
        );
        remove_env("REPLYWRIGHT_TEST_ENV_ONLY");
        assert_eq!(store.get("REPLYWRIGHT_TEST_ENV_ONLY"), None);
    }

    #[test]
    fn test_secrets_file_takes_priority_over_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "REPLYWRIGHT_TEST_PRIORITY = \"from-file\"\n").unwrap();
        let store = CredentialStore::with_secrets_file(&path);

        set_env("REPLYWRIGHT_TEST_PRIORITY", "from-env");
        assert_eq!(
            store.get("REPLYWRIGHT_TEST_PRIORITY"),
            Some("from-file".to_string())
        );
        remove_env("REPLYWRIGHT_TEST_PRIORITY");
    }

    #[test]
    fn test_integer_values_read_as_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "SMTP_PORT = 2525\n").unwrap();
        let store = CredentialStore::with_secrets_file(&path);

        assert_eq!(store.file_get(SMTP_PORT), Some("2525".to_string()));
    }

    #[test]
    fn test_file_set_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("secrets.toml");
        let store = CredentialStore::with_secrets_file(&path);

        store.file_set("FIRST", "one").unwrap();
        store.file_set("SECOND", "two").unwrap();

        assert_eq!(store.file_get("FIRST"), Some("one".to_string()));
        assert_eq!(store.file_get("SECOND"), Some("two".to_string()));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_unparseable_secrets_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        let store = CredentialStore::with_secrets_file(&path);

        assert_eq!(store.file_get("ANY"), None);
    }

    #[test]
    fn test_require_names_missing_key() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_secrets_file(dir.path().join("secrets.toml"));

        let err = store.require("REPLYWRIGHT_TEST_MISSING").unwrap_err();
        assert!(err.to_string().contains("REPLYWRIGHT_TEST_MISSING not found"));
    }

    #[test]
    fn test_debug_info() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::with_secrets_file(dir.path().join("secrets.toml"));
        let info = store.debug_info();

        assert!(!info.secrets_file_exists);
        let display = format!("{}", info);
        assert!(display.contains("Credential Storage Status:"));
        assert!(display.contains("Keyring:"));
        assert!(display.contains("Secrets file:"));
    }
}
