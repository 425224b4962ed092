use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::eid::Eid;

/// Keyed blob storage used by every persisted artifact in the pipeline.
///
/// Idents are relative slash-separated keys ("users/alice/analysis-index.json");
/// the backend owns layout and atomicity.
pub trait StorageManager: Send + Sync {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn append(&self, ident: &str, data: &[u8]) -> std::io::Result<()>;
    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>>;
    fn exists(&self, ident: &str) -> bool;
    fn delete(&self, ident: &str) -> std::io::Result<()>;
    /// List file names directly under a key prefix (non-recursive).
    fn list(&self, prefix: &str) -> Vec<String>;
}

#[derive(Clone)]
pub struct BackendLocal {
    pub base_dir: PathBuf,
}

impl BackendLocal {
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(BackendLocal { base_dir })
    }

    fn resolve(&self, ident: &str) -> std::io::Result<PathBuf> {
        let rel = Path::new(ident);
        // idents come from our own key builders, but a stray ".." must not
        // escape the base directory
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid storage ident: {ident}"),
            ));
        }
        Ok(self.base_dir.join(rel))
    }
}

impl StorageManager for BackendLocal {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.resolve(ident)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // atomic write: temp file in the same directory, then rename
        let temp_path = path.with_file_name(format!(
            ".{}-{}",
            Eid::new(),
            path.file_name().and_then(|n| n.to_str()).unwrap_or("blob")
        ));
        std::fs::write(&temp_path, data)?;
        std::fs::rename(&temp_path, &path)
    }

    fn append(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.resolve(ident)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        file.write_all(data)
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.resolve(ident)?)
    }

    fn exists(&self, ident: &str) -> bool {
        self.resolve(ident)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    fn delete(&self, ident: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.resolve(ident)?)
    }

    fn list(&self, prefix: &str) -> Vec<String> {
        let dir = match self.resolve(prefix) {
            Ok(dir) => dir,
            Err(_) => return vec![],
        };

        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.path().is_file())
                    .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, BackendLocal) {
        let dir = tempfile::tempdir().unwrap();
        let backend = BackendLocal::new(dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (_dir, store) = backend();
        store.write("a/b/c.json", b"{}").unwrap();
        assert!(store.exists("a/b/c.json"));
        assert_eq!(store.read("a/b/c.json").unwrap(), b"{}");
    }

    #[test]
    fn test_write_replaces_whole_file() {
        let (_dir, store) = backend();
        store.write("k", b"first-longer-content").unwrap();
        store.write("k", b"second").unwrap();
        assert_eq!(store.read("k").unwrap(), b"second");
    }

    #[test]
    fn test_append_accumulates() {
        let (_dir, store) = backend();
        store.append("log.jsonl", b"one\n").unwrap();
        store.append("log.jsonl", b"two\n").unwrap();
        assert_eq!(store.read("log.jsonl").unwrap(), b"one\ntwo\n");
    }

    #[test]
    fn test_list_is_non_recursive() {
        let (_dir, store) = backend();
        store.write("users/u/analyses/a.json", b"{}").unwrap();
        store.write("users/u/analyses/b.json", b"{}").unwrap();
        store.write("users/u/other.json", b"{}").unwrap();

        let mut names = store.list("users/u/analyses");
        names.sort();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_parent_traversal_rejected() {
        let (_dir, store) = backend();
        assert!(store.write("../escape", b"x").is_err());
        assert!(!store.exists("../escape"));
    }

    #[test]
    fn test_delete_missing_is_error() {
        let (_dir, store) = backend();
        assert!(store.delete("nope").is_err());
    }
}
