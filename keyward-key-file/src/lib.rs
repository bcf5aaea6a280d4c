//! Local master key file for `keyward`.
//!
//! The local provider's 96 bytes of key material are generated once and
//! persisted, so data keys wrapped in one process run can be unwrapped in the
//! next. Suitable for development and testing only.

#![warn(clippy::pedantic, clippy::nursery)]

use keyward::error::ConfigError;
use keyward::provider::{LocalProvider, MasterKeyProvider, LOCAL_MASTER_KEY_SIZE};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Errors raised while loading or creating a local master key file.
#[derive(Debug, thiserror::Error)]
pub enum KeyFileError {
    /// The file could not be read or written
    #[error("master key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file does not hold exactly one master key
    #[error("master key file {path} holds {actual} bytes, expected {expected}")]
    Length { path: PathBuf, expected: usize, actual: usize },

    /// The key material was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A file holding the local master key.
///
/// ```text
/// master-key.txt   (96 raw bytes, 0600 permissions)
/// ```
#[derive(Debug, Clone)]
pub struct LocalKeyFile {
    path: PathBuf,
}

impl LocalKeyFile {
    /// Creates a handle; nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads an existing key file.
    ///
    /// # Errors
    ///
    /// Returns `KeyFileError::Io` if the file cannot be read, or
    /// `KeyFileError::Length` unless it holds exactly 96 bytes.
    pub fn load(&self) -> Result<LocalProvider, KeyFileError> {
        let file = File::open(&self.path).map_err(|e| self.io(e))?;
        self.read_key(file)
    }

    /// Reads the key file, generating and persisting a fresh key if absent.
    ///
    /// A new key is written to a private temporary file next to `path` and
    /// then linked into place, so the key file is never visible half written.
    /// If another process publishes first, its key is used. An existing empty
    /// file holds no key and is replaced.
    ///
    /// # Errors
    ///
    /// Returns `KeyFileError` if the file cannot be read or written, or holds
    /// the wrong number of bytes.
    pub fn load_or_create(&self) -> Result<LocalProvider, KeyFileError> {
        match File::open(&self.path) {
            Ok(file) => {
                if file.metadata().map_err(|e| self.io(e))?.len() > 0 {
                    debug!(path = %self.path.display(), "reusing local master key");
                    return self.read_key(file);
                }
                warn!(path = %self.path.display(), "local master key file is empty, replacing it");
                let key = generate_key();
                self.publish(&key, true).map_err(|e| self.io(e))?;
                info!(path = %self.path.display(), "generated local master key");
                return Ok(LocalProvider::new(key.to_vec())?);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(self.io(e)),
        }

        let key = generate_key();
        match self.publish(&key, false) {
            Ok(()) => {
                info!(path = %self.path.display(), "generated local master key");
                Ok(LocalProvider::new(key.to_vec())?)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %self.path.display(), "local master key created concurrently");
                self.load()
            }
            Err(e) => Err(self.io(e)),
        }
    }

    /// Loads or creates the key and wraps it as a provider.
    ///
    /// # Errors
    ///
    /// See [`load_or_create`](Self::load_or_create).
    pub fn provider(&self) -> Result<MasterKeyProvider, KeyFileError> {
        self.load_or_create().map(MasterKeyProvider::from)
    }

    fn read_key(&self, file: File) -> Result<LocalProvider, KeyFileError> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(LOCAL_MASTER_KEY_SIZE));
        // One byte past the key size is enough to detect an oversized file.
        file.take(LOCAL_MASTER_KEY_SIZE as u64 + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| self.io(e))?;
        if bytes.len() != LOCAL_MASTER_KEY_SIZE {
            return Err(KeyFileError::Length {
                path: self.path.clone(),
                expected: LOCAL_MASTER_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(LocalProvider::new(bytes.to_vec())?)
    }

    /// Writes `key` to a temporary file and moves it to `path`.
    ///
    /// Without `replace` the key is hard linked, which fails with
    /// `AlreadyExists` if `path` appeared in the meantime.
    fn publish(&self, key: &[u8], replace: bool) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.temp_path();
        let result = write_private(&tmp, key).and_then(|()| {
            if replace {
                fs::rename(&tmp, &self.path)
            } else {
                fs::hard_link(&tmp, &self.path)
            }
        });
        // Gone already after a rename.
        let _ = fs::remove_file(&tmp);
        result
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| String::from("master-key"), |name| name.to_string_lossy().into_owned());
        self.path.with_file_name(format!(".{name}.{:08x}.tmp", OsRng.next_u32()))
    }

    fn io(&self, source: io::Error) -> KeyFileError {
        KeyFileError::Io { path: self.path.clone(), source }
    }
}

fn generate_key() -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; LOCAL_MASTER_KEY_SIZE]);
    OsRng.fill_bytes(&mut key);
    key
}

fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    #[test]
    fn test_second_load_reuses_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master-key.txt");

        let first = LocalKeyFile::new(&path).load_or_create().unwrap();
        let second = LocalKeyFile::new(&path).load_or_create().unwrap();

        assert_eq!(first.key().expose_secret(), second.key().expose_secret());
        assert_eq!(fs::read(&path).unwrap().len(), LOCAL_MASTER_KEY_SIZE);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys").join("master-key.txt");

        LocalKeyFile::new(&path).load_or_create().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let dir = TempDir::new().unwrap();
        let short = dir.path().join("short.key");
        let long = dir.path().join("long.key");
        fs::write(&short, [1u8; 32]).unwrap();
        fs::write(&long, [1u8; 200]).unwrap();

        assert!(matches!(
            LocalKeyFile::new(&short).load_or_create(),
            Err(KeyFileError::Length { actual: 32, .. })
        ));
        assert!(matches!(
            LocalKeyFile::new(&long).load(),
            Err(KeyFileError::Length { actual: 97, .. })
        ));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let err = LocalKeyFile::new(dir.path().join("absent.key")).load().unwrap_err();
        assert!(matches!(err, KeyFileError::Io { .. }));
    }

    #[test]
    fn test_provider_is_local() {
        let dir = TempDir::new().unwrap();
        let provider = LocalKeyFile::new(dir.path().join("master-key.txt")).provider().unwrap();
        assert_eq!(provider.name(), "local");
        assert!(provider.credentials().get("local").is_some());
    }

    #[test]
    fn test_empty_key_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master-key.txt");
        File::create(&path).unwrap();

        let created = LocalKeyFile::new(&path).load_or_create().unwrap();
        assert_eq!(fs::read(&path).unwrap(), created.key().expose_secret().as_slice());

        let reloaded = LocalKeyFile::new(&path).load().unwrap();
        assert_eq!(reloaded.key().expose_secret(), created.key().expose_secret());
    }

    #[test]
    fn test_no_temporary_files_remain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master-key.txt");
        LocalKeyFile::new(&path).load_or_create().unwrap();
        LocalKeyFile::new(&path).load_or_create().unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, ["master-key.txt"]);
    }

    #[test]
    fn test_concurrent_creators_agree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master-key.txt");

        let keys: Vec<Vec<u8>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let path = &path;
                    scope.spawn(move || {
                        LocalKeyFile::new(path).load_or_create().unwrap().key().expose_secret().clone()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(keys.iter().all(|key| key == &keys[0]));
        assert_eq!(fs::read(&path).unwrap(), keys[0]);
    }

    #[cfg(unix)]
    #[test]
    fn test_created_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master-key.txt");
        LocalKeyFile::new(&path).load_or_create().unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
