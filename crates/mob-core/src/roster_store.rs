//! Durable set of persistent-worker identities, one TOML file per name
//! under `soldati/<name>.toml`.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RosterEntry;

#[derive(Debug, Error)]
pub enum RosterStoreError {
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, RosterStoreError>;

const MAX_NAME_LEN: usize = 64;

/// Slug rule: leading alphanumeric, then `[A-Za-z0-9_-]*`, no `.`, `/`, `\`.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(RosterStoreError::InvalidName(name.to_string()));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphanumeric() {
        return Err(RosterStoreError::InvalidName(name.to_string()));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(RosterStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub struct RosterStore {
    root: PathBuf,
}

impl RosterStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.toml"))
    }

    pub fn register(&self, name: &str) -> Result<RosterEntry> {
        validate_name(name)?;
        let path = self.path_for(name);
        if path.exists() {
            return Err(RosterStoreError::AlreadyExists(name.to_string()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let entry = RosterEntry::new(name);
        let text = toml::to_string_pretty(&entry).map_err(|e| RosterStoreError::Parse(e.to_string()))?;
        std::fs::write(&path, text)?;
        Ok(entry)
    }

    pub fn get(&self, name: &str) -> Result<RosterEntry> {
        let text = std::fs::read_to_string(self.path_for(name))
            .map_err(|_| RosterStoreError::NotFound(name.to_string()))?;
        toml::from_str(&text).map_err(|e| RosterStoreError::Parse(e.to_string()))
    }

    pub fn update(&self, entry: &RosterEntry) -> Result<()> {
        let path = self.path_for(&entry.name);
        if !path.exists() {
            return Err(RosterStoreError::NotFound(entry.name.clone()));
        }
        let text = toml::to_string_pretty(entry).map_err(|e| RosterStoreError::Parse(e.to_string()))?;
        std::fs::write(&path, text)?;
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(RosterStoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self) -> Result<Vec<RosterEntry>> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            if let Ok(roster) = toml::from_str::<RosterEntry>(&text) {
                out.push(roster);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_invalid_names() {
        for bad in ["..", "a/b", ".hidden", "", &"x".repeat(65)] {
            assert!(validate_name(bad).is_err(), "expected {bad:?} to be invalid");
        }
    }

    #[test]
    fn accepts_valid_names() {
        for good in ["vinnie", "crew-1", "soldier_7", "A9"] {
            assert!(validate_name(good).is_ok());
        }
    }

    #[test]
    fn duplicate_registration_fails() {
        let dir = tempdir().unwrap();
        let store = RosterStore::new(dir.path());
        store.register("vinnie").unwrap();
        assert!(matches!(
            store.register("vinnie"),
            Err(RosterStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn unregister_missing_fails() {
        let dir = tempdir().unwrap();
        let store = RosterStore::new(dir.path());
        assert!(matches!(
            store.unregister("ghost"),
            Err(RosterStoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_round_trips() {
        let dir = tempdir().unwrap();
        let store = RosterStore::new(dir.path());
        store.register("a").unwrap();
        store.register("b").unwrap();
        let names: Vec<_> = store.list().unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a".to_string()));
        assert!(names.contains(&"b".to_string()));
    }
}
