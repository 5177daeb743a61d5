use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use mob_core::types::RegistryRecord;
use rand::RngCore;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("could not acquire registry lock within {0:?}")]
    LockTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

const LOCK_STALE_AFTER: Duration = Duration::from_secs(10);
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON-object-of-records persistence: `{"agents": {<id>: record, ...}}`.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct RegistryFile {
    #[serde(default)]
    agents: HashMap<String, RegistryRecord>,
}

pub struct Registry {
    mob_dir: PathBuf,
}

impl Registry {
    pub fn new(mob_dir: impl Into<PathBuf>) -> Self {
        Self { mob_dir: mob_dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.mob_dir.join(".mob").join("agents.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.mob_dir.join(".mob").join("agents.json.lock")
    }

    /// Acquire the sidecar lock via O_CREAT|O_EXCL, spin-retrying until
    /// `LOCK_TIMEOUT`. A lock file older than `LOCK_STALE_AFTER` is assumed
    /// to be abandoned by a crashed holder and is removed.
    fn acquire_lock(&self) -> Result<()> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let deadline = Instant::now() + LOCK_TIMEOUT;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Ok(meta) = std::fs::metadata(&lock_path) {
                        if let Ok(age) = meta.modified().and_then(|m| m.elapsed().map_err(|e| {
                            std::io::Error::new(std::io::ErrorKind::Other, e)
                        })) {
                            if age > LOCK_STALE_AFTER {
                                let _ = std::fs::remove_file(&lock_path);
                                continue;
                            }
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(RegistryError::LockTimeout(LOCK_TIMEOUT));
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn release_lock(&self) {
        let _ = std::fs::remove_file(self.lock_path());
    }

    fn read_file(&self) -> Result<RegistryFile> {
        match std::fs::read_to_string(self.path()) {
            Ok(text) => Ok(serde_json::from_str(&text).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, file: &RegistryFile) -> Result<()> {
        let path = self.path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(file)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Run `f` against the current record map under the cross-process lock,
    /// persisting whatever mutation `f` makes.
    fn with_lock<T>(&self, f: impl FnOnce(&mut HashMap<String, RegistryRecord>) -> T) -> Result<T> {
        self.acquire_lock()?;
        let result = (|| {
            let mut file = self.read_file()?;
            let result = f(&mut file.agents);
            self.write_file(&file)?;
            Ok(result)
        })();
        self.release_lock();
        result
    }

    pub fn register(&self, record: RegistryRecord) -> Result<RegistryRecord> {
        let out = record.clone();
        self.with_lock(move |agents| {
            agents.insert(record.id.clone(), record);
        })?;
        Ok(out)
    }

    pub fn get(&self, id: &str) -> Result<RegistryRecord> {
        self.with_lock(|agents| agents.get(id).cloned())?
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Result<Vec<RegistryRecord>> {
        self.with_lock(|agents| agents.values().cloned().collect())
    }

    pub fn update(&self, id: &str, mutate: impl FnOnce(&mut RegistryRecord)) -> Result<RegistryRecord> {
        let id = id.to_string();
        self.with_lock(move |agents| {
            agents.get_mut(&id).map(|r| {
                mutate(r);
                r.clone()
            })
        })?
        .ok_or_else(|| RegistryError::NotFound("unknown agent".into()))
    }

    pub fn unregister(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        let removed = self.with_lock(move |agents| agents.remove(&id).is_some())?;
        if removed {
            Ok(())
        } else {
            Err(RegistryError::NotFound("unknown agent".into()))
        }
    }

    /// Purge terminal-state records older than `ttl` since `completed_at`.
    pub fn purge_stale_terminal(&self, ttl: Duration) -> Result<Vec<String>> {
        self.with_lock(|agents| {
            let now = Utc::now();
            let stale: Vec<String> = agents
                .values()
                .filter(|r| r.status.is_terminal())
                .filter(|r| {
                    r.completed_at
                        .map(|c| (now - c).to_std().map(|d| d > ttl).unwrap_or(false))
                        .unwrap_or(false)
                })
                .map(|r| r.id.clone())
                .collect();
            for id in &stale {
                agents.remove(id);
            }
            stale
        })
    }
}

/// Cryptographically random hex agent ID.
pub fn generate_agent_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
