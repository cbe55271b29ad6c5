//! Artifact store
//!
//! Persists named blobs produced by stages. Layout under the store root:
//!
//! ```text
//! data/<key>            content
//! meta/<key>.json       kind, digest and size
//! ```
//!
//! Fingerprint artifacts are immutable: writing identical content again is a
//! no-op, writing different content under the same key is refused. Mutable
//! artifacts are replaced atomically on every write.

use conveyor_core::domain::artifact::{ArtifactKind, ArtifactRef};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact key '{0}'")]
    InvalidKey(String),

    #[error("Fingerprint artifact '{key}' already exists with different content")]
    FingerprintConflict { key: String },

    #[error("Artifact I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt artifact metadata for '{key}': {message}")]
    Metadata { key: String, message: String },
}

/// Content handed to [`ArtifactStore::put`]
#[derive(Debug, Clone, Copy)]
pub enum ArtifactContent<'a> {
    Bytes(&'a [u8]),
    File(&'a Path),
}

/// Storage for artifacts produced by a run
pub trait ArtifactStore: Send + Sync {
    /// Stores content under a logical key
    ///
    /// # Arguments
    /// * `key` - Slash separated logical key (e.g., "42-abc1234/test-report.json")
    /// * `content` - Bytes or a file to copy
    /// * `kind` - Fingerprint (immutable) or mutable
    fn put(
        &self,
        key: &str,
        content: ArtifactContent<'_>,
        kind: ArtifactKind,
    ) -> Result<ArtifactRef, ArtifactError>;

    /// Reads an artifact's content
    fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError>;

    /// Lists keys starting with `prefix`
    ///
    /// The listing is lazy and can be iterated any number of times.
    fn list(&self, prefix: &str) -> ArtifactListing;
}

/// Lazy, restartable listing of artifact keys
#[derive(Debug, Clone)]
pub struct ArtifactListing {
    data_dir: PathBuf,
    prefix: String,
}

impl ArtifactListing {
    /// Walks the store, yielding keys in lexicographic order
    pub fn iter(&self) -> impl Iterator<Item = String> + '_ {
        WalkDir::new(&self.data_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(move |entry| {
                let relative = entry.path().strip_prefix(&self.data_dir).ok()?;
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                key.starts_with(&self.prefix).then_some(key)
            })
    }
}

/// Filesystem-backed artifact store
pub struct FsArtifactStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct Metadata {
    kind: ArtifactKind,
    digest: String,
    size: u64,
}

impl FsArtifactStore {
    /// Creates a store rooted at `root`; directories are created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.data_dir().join(key)
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.root.join("meta").join(format!("{}.json", key))
    }

    fn read_metadata(&self, key: &str) -> Result<Option<Metadata>, ArtifactError> {
        let path = self.meta_path(key);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| ArtifactError::Metadata {
                key: key.to_string(),
                message: e.to_string(),
            })
    }
}

impl ArtifactStore for FsArtifactStore {
    fn put(
        &self,
        key: &str,
        content: ArtifactContent<'_>,
        kind: ArtifactKind,
    ) -> Result<ArtifactRef, ArtifactError> {
        validate_key(key)?;

        let bytes = match content {
            ArtifactContent::Bytes(bytes) => bytes.to_vec(),
            ArtifactContent::File(path) => {
                std::fs::read(path).map_err(|source| match source.kind() {
                    std::io::ErrorKind::NotFound => {
                        ArtifactError::NotFound(path.display().to_string())
                    }
                    _ => ArtifactError::Io {
                        path: path.to_path_buf(),
                        source,
                    },
                })?
            }
        };

        let digest = hex_digest(&bytes);
        let reference = ArtifactRef {
            key: key.to_string(),
            kind,
            digest: digest.clone(),
            size: bytes.len() as u64,
        };

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = self.read_metadata(key)? {
            if existing.kind == ArtifactKind::Fingerprint || kind == ArtifactKind::Fingerprint {
                if existing.digest == digest {
                    debug!("Artifact {} unchanged ({})", key, &digest[..12]);
                    return Ok(reference);
                }
                return Err(ArtifactError::FingerprintConflict {
                    key: key.to_string(),
                });
            }
        }

        write_atomic(&self.data_path(key), &bytes)?;
        let metadata = Metadata {
            kind,
            digest,
            size: reference.size,
        };
        let raw = serde_json::to_vec_pretty(&metadata).map_err(|e| ArtifactError::Metadata {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        write_atomic(&self.meta_path(key), &raw)?;

        debug!("Stored artifact {} ({} bytes)", key, reference.size);
        Ok(reference)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, ArtifactError> {
        validate_key(key)?;
        let path = self.data_path(key);
        if !path.is_file() {
            return Err(ArtifactError::NotFound(key.to_string()));
        }
        std::fs::read(&path).map_err(|source| ArtifactError::Io { path, source })
    }

    fn list(&self, prefix: &str) -> ArtifactListing {
        ArtifactListing {
            data_dir: self.data_dir(),
            prefix: prefix.to_string(),
        }
    }
}

/// Rejects keys that would escape the store root
fn validate_key(key: &str) -> Result<(), ArtifactError> {
    let invalid = || ArtifactError::InvalidKey(key.to_string());

    if key.is_empty() || key.starts_with('/') || key.ends_with('/') || key.contains('\\') {
        return Err(invalid());
    }
    for component in Path::new(key).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(invalid());
        }
    }
    if key.split('/').any(str::is_empty) {
        return Err(invalid());
    }
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| ArtifactError::Io { path, source }
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io(parent))?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp, bytes).map_err(io(&tmp))?;
    std::fs::rename(&tmp, path).map_err(io(path))
}

/// Hex encoded SHA-256 digest
pub fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path().join("artifacts"));
        (dir, store)
    }

    #[test]
    fn test_put_and_get() {
        let (dir, store) = store();
        let reference = store
            .put("42-abc/report.json", ArtifactContent::Bytes(b"{}"), ArtifactKind::Mutable)
            .unwrap();

        assert_eq!(reference.size, 2);
        assert_eq!(reference.digest.len(), 64);
        assert_eq!(store.get("42-abc/report.json").unwrap(), b"{}");
        assert!(dir.path().join("artifacts/data/42-abc/report.json").is_file());
    }

    #[test]
    fn test_fingerprint_identical_content_is_noop() {
        let (_dir, store) = store();
        let content = || ArtifactContent::Bytes(b"kind: Deployment");
        let first = store
            .put("m/deployment.yaml", content(), ArtifactKind::Fingerprint)
            .unwrap();
        let second = store
            .put("m/deployment.yaml", content(), ArtifactKind::Fingerprint)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(store.list("m/").iter().count(), 1);
    }

    #[test]
    fn test_fingerprint_refuses_different_content() {
        let (_dir, store) = store();
        store
            .put("m/a.yaml", ArtifactContent::Bytes(b"one"), ArtifactKind::Fingerprint)
            .unwrap();
        let err = store
            .put("m/a.yaml", ArtifactContent::Bytes(b"two"), ArtifactKind::Fingerprint)
            .unwrap_err();

        assert!(matches!(err, ArtifactError::FingerprintConflict { .. }));
        assert_eq!(store.get("m/a.yaml").unwrap(), b"one");
    }

    #[test]
    fn test_mutable_overwrites() {
        let (_dir, store) = store();
        store
            .put("b/build-info.json", ArtifactContent::Bytes(b"1"), ArtifactKind::Mutable)
            .unwrap();
        store
            .put("b/build-info.json", ArtifactContent::Bytes(b"2"), ArtifactKind::Mutable)
            .unwrap();

        assert_eq!(store.get("b/build-info.json").unwrap(), b"2");
    }

    #[test]
    fn test_put_from_file() {
        let (dir, store) = store();
        let source = dir.path().join("test-report.json");
        std::fs::write(&source, r#"{"passed":3}"#).unwrap();

        store
            .put("b/test-report.json", ArtifactContent::File(&source), ArtifactKind::Mutable)
            .unwrap();
        assert_eq!(store.get("b/test-report.json").unwrap(), br#"{"passed":3}"#);

        let missing = store.put(
            "b/missing.json",
            ArtifactContent::File(&dir.path().join("missing.json")),
            ArtifactKind::Mutable,
        );
        assert!(matches!(missing, Err(ArtifactError::NotFound(_))));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, store) = store();
        assert!(matches!(store.get("nope"), Err(ArtifactError::NotFound(_))));
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let (_dir, store) = store();
        for key in ["", "/abs", "../escape", "a//b", "a/../b", "trailing/"] {
            let result = store.put(key, ArtifactContent::Bytes(b"x"), ArtifactKind::Mutable);
            assert!(matches!(result, Err(ArtifactError::InvalidKey(_))), "key {:?}", key);
        }
    }

    #[test]
    fn test_list_is_lazy_and_restartable() {
        let (_dir, store) = store();
        let listing = store.list("1-a/");

        // Created before any write; sees later writes
        for key in ["1-a/x.json", "1-a/manifests/staging/d.yaml", "2-b/x.json"] {
            store
                .put(key, ArtifactContent::Bytes(b"x"), ArtifactKind::Mutable)
                .unwrap();
        }

        let first: Vec<String> = listing.iter().collect();
        let second: Vec<String> = listing.iter().collect();
        assert_eq!(first, vec!["1-a/manifests/staging/d.yaml", "1-a/x.json"]);
        assert_eq!(first, second);
    }
}
