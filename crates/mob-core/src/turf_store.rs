//! The turf registry: which repositories the mob operates on, loaded from
//! `turfs.toml` in the mob directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Turf;

#[derive(Debug, Error)]
pub enum TurfStoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, TurfStoreError>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TurfsFile {
    #[serde(default)]
    turfs: Vec<Turf>,
}

pub struct TurfStore {
    path: PathBuf,
}

impl TurfStore {
    pub fn new(mob_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: Self::default_path(&mob_dir.into()),
        }
    }

    pub fn default_path(mob_dir: &Path) -> PathBuf {
        mob_dir.join("turfs.toml")
    }

    /// All configured turfs. Missing `turfs.toml` is not an error -- it
    /// just means no turf has been registered yet.
    pub fn list(&self) -> Result<Vec<Turf>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let file: TurfsFile =
                    toml::from_str(&text).map_err(|e| TurfStoreError::Parse(e.to_string()))?;
                Ok(file.turfs)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, name: &str) -> Result<Turf> {
        self.list()?
            .into_iter()
            .find(|t| t.name == name)
            .ok_or_else(|| TurfStoreError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_empty_list() {
        let dir = tempdir().unwrap();
        let store = TurfStore::new(dir.path());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn round_trips_a_turf() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join("turfs.toml"),
            "[[turfs]]\nname = \"backend\"\npath = \"/repos/backend\"\nmain_branch = \"main\"\n",
        )
        .unwrap();
        let store = TurfStore::new(dir.path());
        let turf = store.get("backend").unwrap();
        assert_eq!(turf.path, "/repos/backend");
        assert_eq!(turf.main_branch, "main");
    }

    #[test]
    fn unknown_turf_is_not_found() {
        let dir = tempdir().unwrap();
        let store = TurfStore::new(dir.path());
        assert!(matches!(store.get("ghost"), Err(TurfStoreError::NotFound(_))));
    }
}
