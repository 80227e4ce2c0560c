//! Temporary directory suppliers.

use std::path::PathBuf;

use tempfile::TempDir;

/// Source of private scratch directories for an embedded service.
///
/// Every call returns a fresh directory whose name starts with `prefix`. The
/// returned [`TempDir`] is owned by the caller and the directory is removed
/// when it is closed or dropped.
pub trait DirSupplier: Send + Sync {
    fn acquire(&self, prefix: &str) -> std::io::Result<TempDir>;
}

/// Creates prefixed directories under the system temp dir, or under an
/// explicit root when one is configured.
#[derive(Debug, Clone, Default)]
pub struct TempDirSupplier {
    root: Option<PathBuf>,
}

impl TempDirSupplier {
    /// Directories go to the system temp dir.
    pub fn system() -> Self {
        Self::default()
    }

    /// Directories go under `root`, which is created on demand.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl DirSupplier for TempDirSupplier {
    fn acquire(&self, prefix: &str) -> std::io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        match &self.root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_acquire_returns_a_distinct_prefixed_directory() {
        let root = tempfile::tempdir().unwrap();
        let supplier = TempDirSupplier::under(root.path());

        let first = supplier.acquire("zookeeper-log").unwrap();
        let second = supplier.acquire("zookeeper-log").unwrap();

        assert_ne!(first.path(), second.path());
        for dir in [&first, &second] {
            assert!(dir.path().is_dir());
            assert!(dir.path().starts_with(root.path()));
            let name = dir.path().file_name().unwrap().to_string_lossy();
            assert!(name.starts_with("zookeeper-log"), "unexpected name {name}");
        }
    }

    #[test]
    fn closing_removes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = TempDirSupplier::under(root.path()).acquire("kafka").unwrap();
        let path = dir.path().to_path_buf();
        std::fs::write(path.join("segment.log"), b"data").unwrap();

        dir.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn missing_root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let dir = TempDirSupplier::under(&nested).acquire("x").unwrap();
        assert!(dir.path().starts_with(&nested));
    }

    #[test]
    fn system_supplier_uses_the_temp_dir() {
        let dir = TempDirSupplier::system().acquire("ebh-test").unwrap();
        assert!(dir.path().starts_with(std::env::temp_dir()));
    }
}
