//! Local file catalog served by a Peer File Service.
//!
//! Every operation is confined to one root directory. Names must be a single plain path
//! component and must resolve inside the root after symlinks are followed.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::protocol::FILE_DOES_NOT_EXIST;

/// Which files the service never exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogPolicy {
    /// Extensions (without the dot, case-insensitive) that are hidden.
    pub exclude_extensions: Vec<String>,
    /// Hide dot-files.
    pub exclude_hidden: bool,
}

impl Default for CatalogPolicy {
    fn default() -> Self {
        Self {
            exclude_extensions: Vec::new(),
            exclude_hidden: true,
        }
    }
}

impl CatalogPolicy {
    pub fn is_excluded(&self, filename: &str) -> bool {
        if self.exclude_hidden && filename.starts_with('.') {
            return true;
        }
        match Path::new(filename).extension().and_then(|e| e.to_str()) {
            Some(ext) => self
                .exclude_extensions
                .iter()
                .any(|x| x.trim_start_matches('.').eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

/// A file present in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub filename: String,
    pub size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("{}", FILE_DOES_NOT_EXIST)]
    NotFound,
    #[error("invalid filename: {0:?}")]
    InvalidName(String),
    #[error("filename not permitted: {0:?}")]
    Excluded(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// File catalog rooted at one directory, read live from disk on every call.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
    policy: CatalogPolicy,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>, policy: CatalogPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> &CatalogPolicy {
        &self.policy
    }

    /// Plain files directly under the root, sorted by name.
    pub async fn list(&self) -> Result<Vec<CatalogEntry>, CatalogError> {
        let mut out = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            if self.policy.is_excluded(&filename) {
                continue;
            }
            // Follows symlinks; a link that escapes the root is skipped.
            if self.resolve_existing(&filename).await.is_err() {
                continue;
            }
            let meta = match tokio::fs::metadata(entry.path()).await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.is_file() {
                out.push(CatalogEntry {
                    filename,
                    size: meta.len(),
                });
            }
        }
        out.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(out)
    }

    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, CatalogError> {
        let path = self.resolve_existing(filename).await?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Create or overwrite `filename`.
    pub async fn write(&self, filename: &str, bytes: &[u8]) -> Result<(), CatalogError> {
        let path = self.join(filename)?;
        if self.policy.is_excluded(filename) {
            return Err(CatalogError::Excluded(filename.to_string()));
        }
        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            // Existing entry: refuse to write through a link that leaves the root.
            self.resolve_existing(filename).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn remove(&self, filename: &str) -> Result<(), CatalogError> {
        self.resolve_existing(filename).await?;
        tokio::fs::remove_file(self.join(filename)?).await?;
        Ok(())
    }

    fn join(&self, filename: &str) -> Result<PathBuf, CatalogError> {
        let invalid = || CatalogError::InvalidName(filename.to_string());
        if filename.is_empty() || filename.contains(['/', '\\', '\0']) {
            return Err(invalid());
        }
        let mut components = Path::new(filename).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(filename)),
            _ => Err(invalid()),
        }
    }

    /// Path of an existing, exposed regular file that canonicalizes inside the root.
    async fn resolve_existing(&self, filename: &str) -> Result<PathBuf, CatalogError> {
        let path = self.join(filename)?;
        if self.policy.is_excluded(filename) {
            return Err(CatalogError::NotFound);
        }
        let root = tokio::fs::canonicalize(&self.root).await?;
        let real = match tokio::fs::canonicalize(&path).await {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(CatalogError::NotFound),
            Err(e) => return Err(e.into()),
        };
        if !real.starts_with(&root) {
            return Err(CatalogError::InvalidName(filename.to_string()));
        }
        if !tokio::fs::metadata(&real).await?.is_file() {
            return Err(CatalogError::NotFound);
        }
        Ok(real)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog(dir: &TempDir) -> Catalog {
        Catalog::new(dir.path(), CatalogPolicy::default())
    }

    #[tokio::test]
    async fn list_is_sorted_plain_files_only() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join(".secret"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let entries = catalog(&dir).list().await.unwrap();
        assert_eq!(
            entries,
            vec![
                CatalogEntry {
                    filename: "a.txt".into(),
                    size: 1
                },
                CatalogEntry {
                    filename: "b.txt".into(),
                    size: 2
                },
            ]
        );
    }

    #[tokio::test]
    async fn excluded_extensions_are_invisible() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("tool.py"), b"print()").unwrap();
        std::fs::write(dir.path().join("keep.md"), b"#").unwrap();
        let policy = CatalogPolicy {
            exclude_extensions: vec![".PY".into()],
            exclude_hidden: true,
        };
        let cat = Catalog::new(dir.path(), policy);
        let names: Vec<_> = cat.list().await.unwrap().into_iter().map(|e| e.filename).collect();
        assert_eq!(names, vec!["keep.md"]);
        assert!(matches!(cat.read("tool.py").await, Err(CatalogError::NotFound)));
        assert!(matches!(
            cat.write("other.py", b"").await,
            Err(CatalogError::Excluded(_))
        ));
    }

    #[tokio::test]
    async fn write_read_remove() {
        let dir = TempDir::new().unwrap();
        let cat = catalog(&dir);
        cat.write("data.bin", &[0, 1, 2, 255]).await.unwrap();
        assert_eq!(cat.read("data.bin").await.unwrap(), vec![0, 1, 2, 255]);
        cat.write("data.bin", b"new").await.unwrap();
        assert_eq!(cat.read("data.bin").await.unwrap(), b"new");
        cat.remove("data.bin").await.unwrap();
        assert!(matches!(cat.read("data.bin").await, Err(CatalogError::NotFound)));
        assert!(matches!(cat.remove("data.bin").await, Err(CatalogError::NotFound)));
    }

    #[tokio::test]
    async fn rejects_paths_outside_root() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("outside.txt"), b"secret").unwrap();
        let cat = Catalog::new(&root, CatalogPolicy::default());
        for name in ["../outside.txt", "/etc/passwd", "..", ".", "", "a/b", "a\\b"] {
            assert!(
                matches!(cat.read(name).await, Err(CatalogError::InvalidName(_))),
                "{:?} should be rejected",
                name
            );
        }
        assert!(matches!(
            cat.write("../escape.txt", b"x").await,
            Err(CatalogError::InvalidName(_))
        ));
        assert!(!outer.path().join("escape.txt").exists());
        assert!(matches!(
            cat.remove("../outside.txt").await,
            Err(CatalogError::InvalidName(_))
        ));
        assert!(outer.path().join("outside.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_escaping_root_is_rejected() {
        let outer = TempDir::new().unwrap();
        let root = outer.path().join("root");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(outer.path().join("outside.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(outer.path().join("outside.txt"), root.join("link.txt"))
            .unwrap();
        let cat = Catalog::new(&root, CatalogPolicy::default());
        assert!(cat.read("link.txt").await.is_err());
        assert!(cat.write("link.txt", b"overwrite").await.is_err());
        assert!(cat.list().await.unwrap().is_empty());
        assert_eq!(std::fs::read(outer.path().join("outside.txt")).unwrap(), b"secret");
    }

    #[test]
    fn not_found_message() {
        assert_eq!(CatalogError::NotFound.to_string(), "file does not exist");
    }
}
