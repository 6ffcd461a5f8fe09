//! Artifact storage on a mounted directory.
use std::{
    fs::{copy, create_dir_all},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::{external::Storage, georef::world_file_path};

/// Copies artifacts under a root directory (in production a
/// mounted blob container). Keys are relative paths; a key
/// is acknowledged once its file exists under the root.
#[derive(Debug, Clone)]
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectoryStorage { root: root.into() }
    }

    fn target(&self, key: &str) -> Result<PathBuf> {
        let key_path = Path::new(key);
        if key.is_empty()
            || key_path.is_absolute()
            || key_path.components().any(|c| c.as_os_str() == "..")
        {
            bail!("invalid storage key `{}`", key);
        }
        Ok(self.root.join(key_path))
    }
}

impl Storage for DirectoryStorage {
    fn push(&self, artifact: &Path, key: &str) -> Result<()> {
        let target = self.target(key)?;
        if let Some(dir) = target.parent() {
            create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        copy(artifact, &target)
            .with_context(|| format!("copying {} to {}", artifact.display(), target.display()))?;

        // the world file travels with its raster
        let sidecar = world_file_path(artifact);
        if sidecar.is_file() {
            copy(&sidecar, world_file_path(&target))?;
        }
        debug!(key, "artifact stored");
        Ok(())
    }

    fn acknowledged(&self, key: &str) -> Result<bool> {
        Ok(self.target(key)?.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;

    #[test]
    fn push_copies_raster_and_world_file() -> Result<()> {
        let src = tempfile::tempdir()?;
        let root = tempfile::tempdir()?;
        let raster = src.path().join("000001.tif");
        write(&raster, b"tiff")?;
        write(src.path().join("000001.tfw"), b"1\n0\n0\n-1\n0\n0\n")?;

        let storage = DirectoryStorage::new(root.path());
        let key = "FireFlight_20230110_0200_images/000001.tif";
        assert!(!storage.acknowledged(key)?);
        storage.push(&raster, key)?;
        assert!(storage.acknowledged(key)?);
        assert!(root
            .path()
            .join("FireFlight_20230110_0200_images/000001.tfw")
            .is_file());
        Ok(())
    }

    #[test]
    fn rejects_escaping_keys() {
        let storage = DirectoryStorage::new("/tmp/storage");
        assert!(storage.target("../etc/passwd").is_err());
        assert!(storage.target("/abs.tif").is_err());
        assert!(storage.target("").is_err());
    }
}
