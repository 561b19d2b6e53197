use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// Environment variable holding a base64-encoded age identity
pub const ENCRYPTION_KEY_ENV: &str = "NIMBUS_ENCRYPTION_KEY";

/// Environment variable that disables the OS keychain backend
pub const DISABLE_KEYRING_ENV: &str = "NIMBUS_DISABLE_KEYRING";

/// Keychain service name used for durable session storage
const KEYRING_SERVICE: &str = "nimbus";

type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Key/value storage used to persist session state
///
/// Keys are slash-separated paths (e.g. `nimbus/session.json`). Backends decide
/// how a path maps to their medium: a file under a base directory, a keychain
/// entry, or an in-memory slot.
pub trait StorageBackend: Send + Sync {
    /// Write data under the given key, replacing any previous value
    fn write(&self, key: &str, data: &[u8]) -> StorageFuture<'_, ()>;

    /// Read the data stored under the given key
    fn read(&self, key: &str) -> StorageFuture<'_, Vec<u8>>;

    /// Check whether a value is stored under the given key
    fn exists(&self, key: &str) -> bool;

    /// Remove the value stored under the given key
    fn remove(&self, key: &str) -> StorageFuture<'_, ()>;

    /// Short backend name for log output
    fn name(&self) -> &'static str;
}

/// Storage errors
#[derive(Debug)]
pub enum StorageError {
    /// IO error
    Io(std::io::Error),
    /// Configuration or serialization error
    Config(String),
    /// Keyring error
    Keyring(String),
    /// Path error
    Path(String),
    /// Encryption error
    Encryption(String),
    /// Key generation error
    KeyGeneration(String),
    /// Key storage error
    KeyStorage(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "IO error: {}", e),
            StorageError::Config(msg) => write!(f, "Configuration error: {}", msg),
            StorageError::Keyring(msg) => write!(f, "Keyring error: {}", msg),
            StorageError::Path(msg) => write!(f, "Path error: {}", msg),
            StorageError::Encryption(msg) => write!(f, "Encryption error: {}", msg),
            StorageError::KeyGeneration(msg) => write!(f, "Key generation error: {}", msg),
            StorageError::KeyStorage(msg) => write!(f, "Key storage error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<keyring::Error> for StorageError {
    fn from(err: keyring::Error) -> Self {
        StorageError::Keyring(err.to_string())
    }
}

/// Reject keys that would escape the storage root
fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::Path("storage key is empty".to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|part| part == "..") {
        return Err(StorageError::Path(format!(
            "storage key must be relative and stay inside the root: {}",
            key
        )));
    }
    Ok(())
}

/// In-process storage that lives as long as the value does
///
/// This is the counterpart of a browser's session storage: nothing survives
/// the process. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StorageError {
        StorageError::Config("memory storage lock poisoned".to_string())
    }
}

impl StorageBackend for MemoryStorage {
    fn write(&self, key: &str, data: &[u8]) -> StorageFuture<'_, ()> {
        let key = key.to_string();
        let data = data.to_vec();

        Box::pin(async move {
            validate_key(&key)?;
            let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
            entries.insert(key, data);
            Ok(())
        })
    }

    fn read(&self, key: &str) -> StorageFuture<'_, Vec<u8>> {
        let key = key.to_string();

        Box::pin(async move {
            validate_key(&key)?;
            let entries = self.entries.read().map_err(|_| Self::poisoned())?;
            entries.get(&key).cloned().ok_or_else(|| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no value stored under {}", key),
                ))
            })
        })
    }

    fn exists(&self, key: &str) -> bool {
        if validate_key(key).is_err() {
            return false;
        }
        self.entries
            .read()
            .map(|entries| entries.contains_key(key))
            .unwrap_or(false)
    }

    fn remove(&self, key: &str) -> StorageFuture<'_, ()> {
        let key = key.to_string();

        Box::pin(async move {
            validate_key(&key)?;
            let mut entries = self.entries.write().map_err(|_| Self::poisoned())?;
            entries.remove(&key);
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Keyring-based storage for secure credentials
///
/// This implementation uses the OS-native credential store:
/// - macOS: Keychain
/// - Linux: Secret Service API (freedesktop.org)
/// - Windows: Credential Manager
pub struct KeyringStorage {
    service_name: String,
}

impl KeyringStorage {
    /// Create a new keyring storage with the specified service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    /// Keyring entry for a key; the key is used as the account name
    fn entry(service_name: &str, key: &str) -> Result<keyring::Entry, StorageError> {
        keyring::Entry::new(service_name, key)
            .map_err(|e| StorageError::Keyring(format!("Failed to create keyring entry: {}", e)))
    }
}

impl StorageBackend for KeyringStorage {
    fn write(&self, key: &str, data: &[u8]) -> StorageFuture<'_, ()> {
        let key = key.to_string();
        let data = data.to_vec();

        Box::pin(async move {
            validate_key(&key)?;
            let entry = Self::entry(&self.service_name, &key)?;

            let secret = String::from_utf8(data)
                .map_err(|e| StorageError::Config(format!("Invalid UTF-8 data: {}", e)))?;

            entry.set_password(&secret)?;
            tracing::debug!(
                "Stored data in keyring: service={}, key={}",
                self.service_name,
                key
            );
            Ok(())
        })
    }

    fn read(&self, key: &str) -> StorageFuture<'_, Vec<u8>> {
        let key = key.to_string();

        Box::pin(async move {
            validate_key(&key)?;
            let entry = Self::entry(&self.service_name, &key)?;
            let secret = entry.get_password()?;
            Ok(secret.into_bytes())
        })
    }

    fn exists(&self, key: &str) -> bool {
        if validate_key(key).is_err() {
            return false;
        }
        Self::entry(&self.service_name, key)
            .map(|entry| entry.get_password().is_ok())
            .unwrap_or(false)
    }

    fn remove(&self, key: &str) -> StorageFuture<'_, ()> {
        let key = key.to_string();

        Box::pin(async move {
            validate_key(&key)?;
            let entry = Self::entry(&self.service_name, &key)?;
            entry.delete_credential()?;
            tracing::debug!(
                "Removed data from keyring: service={}, key={}",
                self.service_name,
                key
            );
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "keyring"
    }
}

/// Plain filesystem storage
///
/// Data is written **unencrypted**. Only use this for non-sensitive data or in
/// development; sessions hold access tokens and should go to
/// [`KeyringStorage`] or [`EncryptedFilesystemStorage`].
pub struct FilesystemStorage {
    base_path: PathBuf,
}

impl FilesystemStorage {
    /// Create a new filesystem storage rooted at `base_path`
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();

        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }

        Ok(Self { base_path })
    }

    fn resolve_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }
}

impl StorageBackend for FilesystemStorage {
    fn write(&self, key: &str, data: &[u8]) -> StorageFuture<'_, ()> {
        let key = key.to_string();
        let data = data.to_vec();

        Box::pin(async move {
            let full_path = self.resolve_path(&key)?;
            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            tokio::fs::write(&full_path, data).await?;
            tracing::debug!("Wrote data to filesystem: {:?}", full_path);
            Ok(())
        })
    }

    fn read(&self, key: &str) -> StorageFuture<'_, Vec<u8>> {
        let full_path = self.resolve_path(key);

        Box::pin(async move {
            let full_path = full_path?;
            let data = tokio::fs::read(&full_path).await?;
            tracing::debug!("Read data from filesystem: {:?}", full_path);
            Ok(data)
        })
    }

    fn exists(&self, key: &str) -> bool {
        self.resolve_path(key).map(|path| path.exists()).unwrap_or(false)
    }

    fn remove(&self, key: &str) -> StorageFuture<'_, ()> {
        let full_path = self.resolve_path(key);

        Box::pin(async move {
            let full_path = full_path?;
            tokio::fs::remove_file(&full_path).await?;
            tracing::debug!("Removed file from filesystem: {:?}", full_path);
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "filesystem"
    }
}

/// Encrypted filesystem storage
///
/// Values are encrypted at rest with an `age` x25519 identity. The identity is
/// taken from the `NIMBUS_ENCRYPTION_KEY` environment variable (base64 of the
/// `AGE-SECRET-KEY-...` string) when set, otherwise it is loaded from
/// `<base_path>/encryption.key`, generating one on first use. Generated key
/// files get 0600 permissions on Unix.
pub struct EncryptedFilesystemStorage {
    base_path: PathBuf,
    recipient: age::x25519::Recipient,
    identity: age::x25519::Identity,
}

impl EncryptedFilesystemStorage {
    /// Storage isolated per application instance under `~/.nimbus/<instance_id>`
    pub async fn new_with_instance(instance_id: &str) -> Result<Self, StorageError> {
        let home = dirs::home_dir().ok_or_else(|| {
            StorageError::KeyStorage("Cannot determine home directory".to_string())
        })?;

        Self::new(home.join(".nimbus").join(instance_id)).await
    }

    /// Storage rooted at `base_path`, with its key file alongside the data
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        let key_path = base_path.join("encryption.key");
        Self::new_with_key_path(base_path, key_path).await
    }

    async fn new_with_key_path(base_path: PathBuf, key_path: PathBuf) -> Result<Self, StorageError> {
        if !base_path.exists() {
            tokio::fs::create_dir_all(&base_path).await?;
        }

        let (recipient, identity) = Self::setup_encryption(&key_path).await?;

        Ok(Self {
            base_path,
            recipient,
            identity,
        })
    }

    async fn setup_encryption(
        key_path: &Path,
    ) -> Result<(age::x25519::Recipient, age::x25519::Identity), StorageError> {
        if let Ok(key_base64) = std::env::var(ENCRYPTION_KEY_ENV) {
            tracing::debug!("Using encryption key from {}", ENCRYPTION_KEY_ENV);
            return Self::load_key_from_string(&key_base64);
        }

        if key_path.exists() {
            tracing::debug!("Loading existing encryption key from {:?}", key_path);
            let contents = tokio::fs::read_to_string(key_path)
                .await
                .map_err(|e| StorageError::KeyStorage(format!("Failed to read key file: {}", e)))?;
            Self::load_key_from_string(contents.trim())
        } else {
            tracing::info!("Generating new encryption key at {:?}", key_path);
            Self::generate_and_store_key(key_path).await
        }
    }

    fn load_key_from_string(
        key_base64: &str,
    ) -> Result<(age::x25519::Recipient, age::x25519::Identity), StorageError> {
        use base64::{engine::general_purpose, Engine as _};

        let key_bytes = general_purpose::STANDARD
            .decode(key_base64)
            .map_err(|e| StorageError::KeyStorage(format!("Invalid base64 key: {}", e)))?;

        let key_str = String::from_utf8(key_bytes)
            .map_err(|e| StorageError::KeyStorage(format!("Invalid UTF-8 in key: {}", e)))?;

        let identity = key_str
            .parse::<age::x25519::Identity>()
            .map_err(|e| StorageError::KeyStorage(format!("Invalid age identity: {}", e)))?;

        Ok((identity.to_public(), identity))
    }

    async fn generate_and_store_key(
        key_path: &Path,
    ) -> Result<(age::x25519::Recipient, age::x25519::Identity), StorageError> {
        use base64::{engine::general_purpose, Engine as _};
        use secrecy::ExposeSecret;

        let identity = age::x25519::Identity::generate();
        let secret = identity.to_string();
        let key_base64 = general_purpose::STANDARD.encode(secret.expose_secret().as_bytes());

        if let Some(parent) = key_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::KeyStorage(format!("Failed to create key directory: {}", e))
            })?;
        }

        tokio::fs::write(key_path, &key_base64)
            .await
            .map_err(|e| StorageError::KeyStorage(format!("Failed to write key file: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(key_path, permissions).map_err(|e| {
                StorageError::KeyStorage(format!("Failed to set key file permissions: {}", e))
            })?;
        }

        Ok((identity.to_public(), identity))
    }

    fn resolve_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        use std::io::Write;

        let encryptor = age::Encryptor::with_recipients(vec![Box::new(self.recipient.clone())])
            .ok_or_else(|| StorageError::Encryption("No recipients for encryptor".to_string()))?;

        let mut encrypted = Vec::new();
        let mut writer = encryptor
            .wrap_output(&mut encrypted)
            .map_err(|e| StorageError::Encryption(format!("Failed to wrap output: {}", e)))?;

        writer
            .write_all(data)
            .map_err(|e| StorageError::Encryption(format!("Failed to encrypt data: {}", e)))?;

        writer
            .finish()
            .map_err(|e| StorageError::Encryption(format!("Failed to finalize encryption: {}", e)))?;

        Ok(encrypted)
    }

    fn decrypt(&self, encrypted: &[u8]) -> Result<Vec<u8>, StorageError> {
        use std::io::Read;

        let decryptor = match age::Decryptor::new(encrypted)
            .map_err(|e| StorageError::Encryption(format!("Failed to create decryptor: {}", e)))?
        {
            age::Decryptor::Recipients(d) => d,
            _ => {
                return Err(StorageError::Encryption(
                    "Unexpected decryptor type".to_string(),
                ))
            }
        };

        let mut decrypted = Vec::new();
        let mut reader = decryptor
            .decrypt(std::iter::once(&self.identity as &dyn age::Identity))
            .map_err(|e| StorageError::Encryption(format!("Failed to decrypt data: {}", e)))?;

        reader
            .read_to_end(&mut decrypted)
            .map_err(|e| StorageError::Encryption(format!("Failed to read decrypted data: {}", e)))?;

        Ok(decrypted)
    }
}

impl StorageBackend for EncryptedFilesystemStorage {
    fn write(&self, key: &str, data: &[u8]) -> StorageFuture<'_, ()> {
        let key = key.to_string();
        let data = data.to_vec();

        Box::pin(async move {
            let full_path = self.resolve_path(&key)?;
            let encrypted = self.encrypt(&data)?;

            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            tokio::fs::write(&full_path, encrypted).await?;
            tracing::debug!("Wrote encrypted data to filesystem: {:?}", full_path);
            Ok(())
        })
    }

    fn read(&self, key: &str) -> StorageFuture<'_, Vec<u8>> {
        let full_path = self.resolve_path(key);

        Box::pin(async move {
            let full_path = full_path?;
            let encrypted = tokio::fs::read(&full_path).await?;
            let decrypted = self.decrypt(&encrypted)?;
            tracing::debug!("Read and decrypted data from filesystem: {:?}", full_path);
            Ok(decrypted)
        })
    }

    fn exists(&self, key: &str) -> bool {
        self.resolve_path(key).map(|path| path.exists()).unwrap_or(false)
    }

    fn remove(&self, key: &str) -> StorageFuture<'_, ()> {
        let full_path = self.resolve_path(key);

        Box::pin(async move {
            let full_path = full_path?;
            tokio::fs::remove_file(&full_path).await?;
            tracing::debug!("Removed encrypted file from filesystem: {:?}", full_path);
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "encrypted-filesystem"
    }
}

/// Keychain service name holding one instance's entries
fn keyring_service(instance_id: &str) -> String {
    format!("{}-{}", KEYRING_SERVICE, instance_id)
}

/// Pick the most secure durable backend available
///
/// Tries the OS keychain first unless `NIMBUS_DISABLE_KEYRING` is set, then
/// falls back to [`EncryptedFilesystemStorage`] under `~/.nimbus/<instance_id>`.
pub async fn select_durable_backend(
    instance_id: &str,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let keyring_disabled = std::env::var(DISABLE_KEYRING_ENV).is_ok();

    let keyring_works = if keyring_disabled {
        tracing::debug!("Keyring disabled via {}", DISABLE_KEYRING_ENV);
        false
    } else {
        let service = keyring_service(instance_id);
        let check = tokio::task::spawn_blocking(move || {
            keyring::Entry::new(&service, "availability-check").and_then(|entry| {
                match entry.get_password() {
                    Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
                    Err(e) => Err(e),
                }
            })
        })
        .await;

        match check {
            Ok(Ok(())) => {
                tracing::debug!("Keyring storage is available");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!("Keyring storage is unavailable ({}), falling back", e);
                false
            }
            Err(e) => {
                tracing::debug!("Keyring availability check failed ({}), falling back", e);
                false
            }
        }
    };

    if keyring_works {
        return Ok(Arc::new(KeyringStorage::new(keyring_service(instance_id))));
    }

    tracing::debug!(
        "Using encrypted filesystem storage at ~/.nimbus/{} ({} can override the key)",
        instance_id,
        ENCRYPTION_KEY_ENV
    );
    let encrypted = EncryptedFilesystemStorage::new_with_instance(instance_id)
        .await
        .map_err(|e| {
            tracing::error!("Failed to initialize encrypted storage: {}", e);
            e
        })?;
    Ok(Arc::new(encrypted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn test_key_base64() -> String {
        use base64::Engine;
        use secrecy::ExposeSecret;

        let identity = age::x25519::Identity::generate();
        base64::engine::general_purpose::STANDARD
            .encode(identity.to_string().expose_secret().as_bytes())
    }

    #[tokio::test]
    async fn test_memory_storage_roundtrip_and_remove() {
        let storage = MemoryStorage::new();
        storage.write("nimbus/session.json", b"{}").await.unwrap();

        assert!(storage.exists("nimbus/session.json"));
        assert_eq!(storage.read("nimbus/session.json").await.unwrap(), b"{}");

        storage.remove("nimbus/session.json").await.unwrap();
        assert!(!storage.exists("nimbus/session.json"));
        assert!(storage.read("nimbus/session.json").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_storage_clones_share_entries() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage.write("a", b"1").await.unwrap();
        assert!(other.exists("a"));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path()).unwrap();

        assert!(matches!(
            storage.write("../outside.txt", b"x").await,
            Err(StorageError::Path(_))
        ));
        assert!(matches!(
            storage.write("/etc/passwd", b"x").await,
            Err(StorageError::Path(_))
        ));
        assert!(matches!(
            MemoryStorage::new().write("", b"x").await,
            Err(StorageError::Path(_))
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_every_path_operation_rejects_escaping_keys() {
        std::env::remove_var(ENCRYPTION_KEY_ENV);
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("outside.txt"), b"keep me").unwrap();
        let inner = root.path().join("inner");

        let plain = FilesystemStorage::new(&inner).unwrap();
        let encrypted = EncryptedFilesystemStorage::new(root.path().join("sealed"))
            .await
            .unwrap();
        let backends: Vec<Box<dyn StorageBackend>> = vec![
            Box::new(plain),
            Box::new(encrypted),
            Box::new(MemoryStorage::new()),
        ];

        for backend in &backends {
            assert!(
                matches!(backend.read("../outside.txt").await, Err(StorageError::Path(_))),
                "{} read",
                backend.name()
            );
            assert!(
                matches!(backend.remove("../outside.txt").await, Err(StorageError::Path(_))),
                "{} remove",
                backend.name()
            );
            assert!(!backend.exists("../outside.txt"), "{} exists", backend.name());
        }
        assert!(root.path().join("outside.txt").exists());
    }

    #[test]
    fn test_keyring_service_is_per_instance() {
        assert_eq!(keyring_service("cli"), "nimbus-cli");
        assert_ne!(keyring_service("cli"), keyring_service("daemon"));
    }

    #[tokio::test]
    async fn test_keyring_instances_do_not_share_entries_when_available() {
        let first = KeyringStorage::new(keyring_service("sdk-test-first"));
        let second = KeyringStorage::new(keyring_service("sdk-test-second"));

        if let Err(e) = first.write("nimbus/session.json", b"first").await {
            eprintln!("Skipping keyring test - keyring unavailable: {}", e);
            return;
        }

        let _ = second.remove("nimbus/session.json").await;
        assert!(!second.exists("nimbus/session.json"));
        if let Ok(data) = first.read("nimbus/session.json").await {
            assert_eq!(data, b"first");
        }
        let _ = first.remove("nimbus/session.json").await;
    }

    #[tokio::test]
    async fn test_filesystem_storage_nested_paths() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FilesystemStorage::new(temp_dir.path()).unwrap();

        storage
            .write("nested/path/test.txt", b"nested data")
            .await
            .unwrap();

        assert!(storage.exists("nested/path/test.txt"));
        let read_data = storage.read("nested/path/test.txt").await.unwrap();
        assert_eq!(read_data, b"nested data");

        storage.remove("nested/path/test.txt").await.unwrap();
        assert!(!storage.exists("nested/path/test.txt"));
    }

    #[tokio::test]
    #[serial]
    async fn test_encrypted_storage_is_not_plaintext_on_disk() {
        std::env::remove_var(ENCRYPTION_KEY_ENV);
        let temp_dir = TempDir::new().unwrap();
        let storage = EncryptedFilesystemStorage::new(temp_dir.path())
            .await
            .unwrap();

        let secret = b"access-token-abc";
        storage.write("session.json", secret).await.unwrap();

        let raw = std::fs::read(temp_dir.path().join("session.json")).unwrap();
        assert_ne!(raw.as_slice(), secret);
        assert!(!raw.windows(secret.len()).any(|w| w == secret));

        assert_eq!(storage.read("session.json").await.unwrap(), secret);
    }

    #[tokio::test]
    #[serial]
    async fn test_encrypted_storage_reuses_generated_key_file() {
        std::env::remove_var(ENCRYPTION_KEY_ENV);
        let temp_dir = TempDir::new().unwrap();

        let first = EncryptedFilesystemStorage::new(temp_dir.path())
            .await
            .unwrap();
        first.write("data.txt", b"persistent").await.unwrap();
        drop(first);

        let second = EncryptedFilesystemStorage::new(temp_dir.path())
            .await
            .unwrap();
        assert_eq!(second.read("data.txt").await.unwrap(), b"persistent");
    }

    #[tokio::test]
    #[serial]
    async fn test_encrypted_storage_env_key_shared_across_roots() {
        std::env::set_var(ENCRYPTION_KEY_ENV, test_key_base64());
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();

        let a = EncryptedFilesystemStorage::new(dir_a.path()).await.unwrap();
        a.write("blob", b"shared key").await.unwrap();

        std::fs::copy(dir_a.path().join("blob"), dir_b.path().join("blob")).unwrap();
        let b = EncryptedFilesystemStorage::new(dir_b.path()).await.unwrap();
        assert_eq!(b.read("blob").await.unwrap(), b"shared key");
        assert!(!dir_b.path().join("encryption.key").exists());

        std::env::remove_var(ENCRYPTION_KEY_ENV);
    }

    #[tokio::test]
    #[serial]
    #[cfg(unix)]
    async fn test_generated_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        std::env::remove_var(ENCRYPTION_KEY_ENV);
        let temp_dir = TempDir::new().unwrap();
        let _storage = EncryptedFilesystemStorage::new(temp_dir.path())
            .await
            .unwrap();

        let metadata = std::fs::metadata(temp_dir.path().join("encryption.key")).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_keyring_storage_roundtrip_when_available() {
        let storage = KeyringStorage::new("nimbus-sdk-test");

        if let Err(e) = storage.write("test-key", b"{\"k\":1}").await {
            eprintln!("Skipping keyring test - keyring unavailable: {}", e);
            return;
        }

        match storage.read("test-key").await {
            Ok(data) => assert_eq!(data, b"{\"k\":1}"),
            Err(e) => eprintln!("Skipping keyring test - read failed: {}", e),
        }
        let _ = storage.remove("test-key").await;
    }
}
